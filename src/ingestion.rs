use std::collections::HashMap;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// One source line keyed by the header text exactly as it appeared.
pub type RawRecord = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRow {
    pub name: String,
    pub city: String,
    pub country: String,
    pub score: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<String>,
}

impl NormalizedRow {
    /// A row is worth resolving when it is named and has somewhere to put it.
    pub fn is_usable(&self) -> bool {
        !self.name.is_empty()
            && (!self.city.is_empty() || (self.lat.is_some() && self.lon.is_some()))
    }

    /// Supplied coordinates, when both parse as finite numbers.
    pub fn provided_coordinates(&self) -> Option<(f64, f64)> {
        let lat = parse_coordinate(self.lat.as_deref()?)?;
        let lon = parse_coordinate(self.lon.as_deref()?)?;
        Some((lat, lon))
    }
}

fn parse_coordinate(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    Name,
    City,
    Country,
    Score,
    SocialLink,
    Lat,
    Lon,
    NameLocation,
    Location,
}

/// Candidate source columns per field, in priority order. Keys are compared
/// after trimming and lowercasing.
pub const FIELD_RULES: &[(CanonicalField, &[&str])] = &[
    (CanonicalField::Name, &["name"]),
    (CanonicalField::City, &["city"]),
    (CanonicalField::Country, &["country"]),
    (CanonicalField::Score, &["score", "score (out of 5)"]),
    (CanonicalField::SocialLink, &["instagram link", "instagram"]),
    (CanonicalField::Lat, &["lat", "latitude"]),
    (CanonicalField::Lon, &["lon", "lng", "longitude"]),
    (CanonicalField::NameLocation, &["name, location", "name,location"]),
    (CanonicalField::Location, &["location", "city, country"]),
];

/// Header-insensitive view over a raw record.
struct FieldLookup {
    values: HashMap<String, String>,
}

impl FieldLookup {
    fn new(raw: &RawRecord) -> Self {
        let values = raw
            .iter()
            .map(|(key, value)| (normalize_key(key), value.clone()))
            .collect();
        Self { values }
    }

    fn resolve(&self, field: CanonicalField) -> String {
        FIELD_RULES
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .and_then(|(_, keys)| {
                keys.iter()
                    .filter_map(|key| self.values.get(*key))
                    .find(|value| !value.is_empty())
            })
            .cloned()
            .unwrap_or_default()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim_start_matches('\u{feff}').trim().to_lowercase()
}

pub fn normalize(raw: &RawRecord) -> NormalizedRow {
    let fields = FieldLookup::new(raw);

    let mut name = fields.resolve(CanonicalField::Name);
    let mut city = fields.resolve(CanonicalField::City);
    let mut country = fields.resolve(CanonicalField::Country);

    // The combined column only fills in for a missing name; its location part
    // belongs to whichever venue it names.
    let mut combined_location = None;
    if name.is_empty() {
        let name_location = fields.resolve(CanonicalField::NameLocation);
        let (combined_name, location) = split_name_location(&name_location);
        name = combined_name;
        combined_location = location;
    }

    if city.is_empty() && country.is_empty() {
        let location = fields.resolve(CanonicalField::Location);
        let derived = if !location.is_empty() {
            Some(split_location(location.trim()))
        } else {
            combined_location.map(|loc| split_location(&loc))
        };
        if let Some((derived_city, derived_country)) = derived {
            city = derived_city;
            country = derived_country;
        }
    }

    NormalizedRow {
        name,
        city,
        country,
        score: fields.resolve(CanonicalField::Score),
        social_link: non_empty(fields.resolve(CanonicalField::SocialLink)),
        lat: non_empty(fields.resolve(CanonicalField::Lat)),
        lon: non_empty(fields.resolve(CanonicalField::Lon)),
    }
}

/// Splits `"Name, City, Country"`; the location part is absent without a comma.
pub fn split_name_location(value: &str) -> (String, Option<String>) {
    match value.split_once(',') {
        Some((name, rest)) => (name.trim().to_string(), Some(rest.trim().to_string())),
        None => (value.trim().to_string(), None),
    }
}

/// The last comma-delimited segment is the country; everything before it is the city.
pub fn split_location(value: &str) -> (String, String) {
    match value.rsplit_once(',') {
        Some((city, country)) => (city.trim().to_string(), country.trim().to_string()),
        None => (value.to_string(), String::new()),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub fn parse_table(text: &str) -> Vec<NormalizedRow> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::None)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => {
            debug!(?err, "table has no readable header row");
            return Vec::new();
        }
    };

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                debug!(?err, line = index + 2, "skipping unreadable record");
                continue;
            }
        };
        if record.iter().all(str::is_empty) {
            continue;
        }

        let row = normalize(&raw_record(&headers, &record));
        if row.is_usable() {
            rows.push(row);
        } else {
            trace!(line = index + 2, name = %row.name, "dropping incomplete row");
        }
    }
    rows
}

fn raw_record(headers: &StringRecord, record: &StringRecord) -> RawRecord {
    headers
        .iter()
        .zip(record.iter())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
