use std::sync::Arc;

use serde::Serialize;
use tracing::{trace, warn};

use crate::errors::AppResult;
use crate::geocoder::{CoordinateSource, Geocoder};
use crate::ingestion::NormalizedRow;

/// A review row with resolved coordinates, ready for a marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatedEntity {
    pub name: String,
    pub city: String,
    pub country: String,
    pub score: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_link: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub source: CoordinateSource,
}

impl LocatedEntity {
    fn new(row: NormalizedRow, lat: f64, lon: f64, source: CoordinateSource) -> Self {
        Self {
            name: row.name,
            city: row.city,
            country: row.country,
            score: row.score,
            social_link: row.social_link,
            lat,
            lon,
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub row: NormalizedRow,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub total_rows: usize,
    pub provided: usize,
    pub cache_hits: usize,
    pub lookups: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

impl ResolutionStats {
    fn with_total(total_rows: usize) -> Self {
        Self {
            total_rows,
            ..Self::default()
        }
    }

    fn count(&mut self, source: CoordinateSource) {
        match source {
            CoordinateSource::Provided => self.provided += 1,
            CoordinateSource::Cache => self.cache_hits += 1,
            CoordinateSource::Lookup => self.lookups += 1,
        }
        self.resolved += 1;
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub entities: Vec<LocatedEntity>,
    pub failures: Vec<RowFailure>,
    pub stats: ResolutionStats,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolutionProgress {
    pub total_rows: usize,
    pub processed: usize,
    pub resolved: usize,
}

pub type ProgressObserver = Arc<dyn Fn(ResolutionProgress) + Send + Sync>;

pub struct ResolutionPipeline<'a> {
    geocoder: &'a Geocoder,
    observer: Option<ProgressObserver>,
}

impl<'a> ResolutionPipeline<'a> {
    pub fn new(geocoder: &'a Geocoder) -> Self {
        Self {
            geocoder,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Resolves rows one at a time, in order. Failed rows are left out of
    /// `entities` and reported in `failures`.
    pub async fn resolve_all(&self, rows: Vec<NormalizedRow>) -> Resolution {
        let total_rows = rows.len();
        let mut stats = ResolutionStats::with_total(total_rows);
        let mut entities = Vec::with_capacity(total_rows);
        let mut failures = Vec::new();

        for (index, row) in rows.into_iter().enumerate() {
            match self.locate(&row).await {
                Ok((lat, lon, source)) => {
                    trace!(name = %row.name, ?source, "row located");
                    stats.count(source);
                    entities.push(LocatedEntity::new(row, lat, lon, source));
                }
                Err(err) => {
                    warn!(?row, error = %err, "skipping row (no geocode)");
                    stats.unresolved += 1;
                    failures.push(RowFailure {
                        row,
                        error: err.to_string(),
                    });
                }
            }

            if let Some(callback) = &self.observer {
                callback(ResolutionProgress {
                    total_rows,
                    processed: index + 1,
                    resolved: stats.resolved,
                });
            }
        }

        Resolution {
            entities,
            failures,
            stats,
        }
    }

    async fn locate(&self, row: &NormalizedRow) -> AppResult<(f64, f64, CoordinateSource)> {
        if let Some((lat, lon)) = row.provided_coordinates() {
            return Ok((lat, lon, CoordinateSource::Provided));
        }
        let (result, source) = self
            .geocoder
            .resolve_traced(&row.city, &row.country)
            .await?;
        Ok((result.lat, result.lon, source))
    }
}
