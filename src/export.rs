use serde_json::{json, Value};

use crate::errors::AppResult;
use crate::pipeline::LocatedEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    GeoJson,
}

pub fn render(entities: &[LocatedEntity], format: ExportFormat) -> AppResult<String> {
    let value = match format {
        ExportFormat::Json => to_json(entities)?,
        ExportFormat::GeoJson => to_geojson(entities),
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn to_json(entities: &[LocatedEntity]) -> AppResult<Value> {
    Ok(serde_json::to_value(entities)?)
}

/// Fraction of the marker span added on every side of the collection `bbox`.
pub const BOUNDS_PADDING: f64 = 0.2;

/// Point features use GeoJSON's `[lon, lat]` axis order. A non-empty
/// collection carries a padded `bbox` a renderer can fit its view to.
pub fn to_geojson(entities: &[LocatedEntity]) -> Value {
    let features = entities
        .iter()
        .map(|entity| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [entity.lon, entity.lat],
                },
                "properties": {
                    "name": entity.name,
                    "city": entity.city,
                    "country": entity.country,
                    "place": place_label(entity),
                    "score": entity.score,
                    "scoreLabel": score_label(&entity.score),
                    "socialLink": entity.social_link,
                    "source": entity.source,
                },
            })
        })
        .collect::<Vec<_>>();

    let mut collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if let Some(bbox) = padded_bounds(entities, BOUNDS_PADDING) {
        collection["bbox"] = json!(bbox);
    }
    collection
}

/// `[west, south, east, north]` grown by `ratio` of the span on each side.
pub fn padded_bounds(entities: &[LocatedEntity], ratio: f64) -> Option<[f64; 4]> {
    let first = entities.first()?;
    let [mut west, mut south, mut east, mut north] = [first.lon, first.lat, first.lon, first.lat];
    for entity in &entities[1..] {
        west = west.min(entity.lon);
        east = east.max(entity.lon);
        south = south.min(entity.lat);
        north = north.max(entity.lat);
    }
    let lon_pad = (east - west) * ratio;
    let lat_pad = (north - south) * ratio;
    Some([west - lon_pad, south - lat_pad, east + lon_pad, north + lat_pad])
}

fn place_label(entity: &LocatedEntity) -> String {
    [entity.city.as_str(), entity.country.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn score_label(score: &str) -> String {
    if score.is_empty() {
        "\u{2014}".to_string()
    } else {
        format!("{score} / 5")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocoder::CoordinateSource;

    fn entity(name: &str, lat: f64, lon: f64) -> LocatedEntity {
        LocatedEntity {
            name: name.into(),
            city: "Cork".into(),
            country: "Ireland".into(),
            score: "4.5".into(),
            social_link: None,
            lat,
            lon,
            source: CoordinateSource::Lookup,
        }
    }

    #[test]
    fn geojson_uses_lon_lat_order_and_keeps_sequence() {
        let value = to_geojson(&[entity("A", 51.9, -8.5), entity("B", 53.5, -6.0)]);
        assert_eq!(value["type"], "FeatureCollection");
        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["geometry"]["coordinates"], json!([-8.5, 51.9]));
        assert_eq!(features[0]["properties"]["name"], "A");
        assert_eq!(features[1]["properties"]["name"], "B");
        assert_eq!(features[1]["properties"]["socialLink"], Value::Null);
        assert_eq!(features[0]["properties"]["place"], "Cork, Ireland");
        assert_eq!(features[0]["properties"]["scoreLabel"], "4.5 / 5");
    }

    #[test]
    fn geojson_bbox_pads_the_marker_span() {
        let value = to_geojson(&[entity("A", 50.0, -10.0), entity("B", 55.0, 0.0)]);
        let bbox = value["bbox"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect::<Vec<_>>();
        let expected = [-12.0, 49.0, 2.0, 56.0];
        for (got, want) in bbox.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{bbox:?}");
        }

        assert!(to_geojson(&[]).get("bbox").is_none());
        let single = padded_bounds(&[entity("A", 51.9, -8.5)], BOUNDS_PADDING).unwrap();
        assert_eq!(single, [-8.5, 51.9, -8.5, 51.9]);
    }

    #[test]
    fn labels_handle_missing_parts() {
        let mut bare = entity("A", 1.0, 2.0);
        bare.country.clear();
        bare.score.clear();
        assert_eq!(place_label(&bare), "Cork");
        assert_eq!(score_label(&bare.score), "\u{2014}");
    }

    #[test]
    fn json_export_is_an_ordered_array() {
        let rendered = render(&[entity("A", 1.0, 2.0), entity("B", 3.0, 4.0)], ExportFormat::Json)
            .unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        let names = value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(value[0]["source"], "lookup");
    }
}
