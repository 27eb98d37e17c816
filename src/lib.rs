mod cache;
mod config;
mod diagnostics;
mod errors;
mod export;
mod geocoder;
mod ingestion;
mod pipeline;
mod rate_limit;
mod source;
mod store;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{CacheStore, GeocodeCache, GeocodeKey, GeocodeResult};
pub use crate::config::{
    AppConfig, PublicAppConfig, DEFAULT_CACHE_NAMESPACE, DEFAULT_GEOCODER_ENDPOINT,
    DEFAULT_RATE_DELAY_MS,
};
pub use crate::diagnostics::{DiagnosticEvent, DiagnosticsLog};
pub use crate::errors::{AppError, AppResult};
pub use crate::export::{render, to_geojson, to_json, ExportFormat};
pub use crate::geocoder::{
    build_query, CoordinateSource, GeocodeCandidate, GeocodeLookup, Geocoder, NominatimClient,
};
pub use crate::ingestion::{
    normalize, parse_table, split_location, split_name_location, CanonicalField, NormalizedRow,
    RawRecord, FIELD_RULES,
};
pub use crate::pipeline::{
    LocatedEntity, ProgressObserver, Resolution, ResolutionPipeline, ResolutionProgress,
    ResolutionStats, RowFailure,
};
pub use crate::rate_limit::RateLimiter;
pub use crate::source::CsvSource;
pub use crate::store::{KeyValueStore, MemoryStore, SqliteStore, StoreBootstrap};

pub struct ReviewsMap {
    config: AppConfig,
    http: reqwest::Client,
    cache_store: CacheStore,
    geocoder: Geocoder,
    diagnostics: DiagnosticsLog,
    store_path: Option<String>,
    store_recovered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapData {
    pub entities: Vec<LocatedEntity>,
    pub failures: Vec<RowFailure>,
    pub stats: ResolutionStats,
}

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub store_path: Option<String>,
    pub store_recovered: bool,
    pub namespace: String,
    pub cached_entries: usize,
    pub config: PublicAppConfig,
}

impl ReviewsMap {
    /// Opens the cache store and loads the geocode cache; call once per process.
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let (backend, store_path, store_recovered) = open_backend(&config);
        let cache_store = CacheStore::new(backend, config.cache_namespace.clone());
        let geocoder = Geocoder::from_config(&config, cache_store.clone())?;
        let http = reqwest::Client::builder()
            .user_agent(config.geocoder_user_agent.as_str())
            .build()?;
        let diagnostics = DiagnosticsLog::new(config.diagnostics_path.clone());

        info!(
            cached_entries = geocoder.cached_entries(),
            namespace = %config.cache_namespace,
            "geocode cache ready"
        );

        Ok(Self {
            config,
            http,
            cache_store,
            geocoder,
            diagnostics,
            store_path,
            store_recovered,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }

    pub fn geocoder(&self) -> &Geocoder {
        &self.geocoder
    }

    /// Fetches the table, normalizes it and resolves every usable row.
    /// Only a transport failure aborts the run.
    pub async fn load(&self, observer: Option<ProgressObserver>) -> AppResult<MapData> {
        let source = CsvSource::from_config(&self.config)?;
        let text = source.read_text(&self.http).await?;
        Ok(self.load_from_text(&text, observer).await)
    }

    pub async fn load_from_text(&self, text: &str, observer: Option<ProgressObserver>) -> MapData {
        let rows = parse_table(text);
        info!(rows = rows.len(), "parsed review rows");

        let mut pipeline = ResolutionPipeline::new(&self.geocoder);
        if let Some(observer) = observer {
            pipeline = pipeline.with_observer(observer);
        }
        let Resolution {
            entities,
            failures,
            stats,
        } = pipeline.resolve_all(rows).await;

        for failure in &failures {
            self.diagnostics.record(
                "row_skipped",
                json!({
                    "row": failure.row,
                    "error": failure.error,
                }),
            );
        }
        self.diagnostics.record("run_completed", json!(stats));
        if let Err(err) = self.diagnostics.flush() {
            warn!(?err, "failed to write diagnostics");
        }

        info!(
            total = stats.total_rows,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            lookups = stats.lookups,
            cache_hits = stats.cache_hits,
            "review rows resolved"
        );

        MapData {
            entities,
            failures,
            stats,
        }
    }

    pub fn cache_health(&self) -> CacheHealth {
        CacheHealth {
            store_path: self.store_path.clone(),
            store_recovered: self.store_recovered,
            namespace: self.cache_store.namespace().to_string(),
            cached_entries: self.geocoder.cached_entries(),
            config: self.config.public_profile(),
        }
    }

    pub fn clear_cache(&self) {
        self.geocoder.clear_cache();
    }
}

fn open_backend(config: &AppConfig) -> (Arc<dyn KeyValueStore>, Option<String>, bool) {
    if !config.persist_cache {
        return (Arc::new(MemoryStore::default()), None, false);
    }

    match SqliteStore::open(&config.cache_database_path) {
        Ok(StoreBootstrap { store, recovered }) => {
            let path = store.path().map(|p| p.to_string_lossy().to_string());
            (Arc::new(store), path, recovered)
        }
        Err(err) => {
            warn!(
                ?err,
                path = %config.cache_database_path.display(),
                "geocode cache store unavailable; caching for this session only"
            );
            (Arc::new(MemoryStore::default()), None, false)
        }
    }
}

fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,reviews_map=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn test_config(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            csv_url: None,
            csv_fallback_path: dir.join("reviews.csv"),
            geocoder_endpoint: "http://127.0.0.1:9/search".into(),
            geocoder_api_key: None,
            geocoder_user_agent: "reviews-map-tests".into(),
            geocode_rate_delay_ms: 1,
            cache_database_path: dir.join("cache/geocode.db"),
            cache_namespace: DEFAULT_CACHE_NAMESPACE.into(),
            persist_cache: true,
            diagnostics_path: None,
        }
    }

    #[test]
    fn reports_cache_health() {
        let dir = tempdir().unwrap();
        let app = ReviewsMap::initialize(test_config(dir.path())).unwrap();
        let health = app.cache_health();
        assert!(health.store_path.unwrap().ends_with("geocode.db"));
        assert!(!health.store_recovered);
        assert_eq!(health.cached_entries, 0);
        assert_eq!(health.namespace, DEFAULT_CACHE_NAMESPACE);
        assert!(!health.config.has_geocoder_key);
    }

    #[test]
    fn falls_back_to_memory_when_store_cannot_open() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let mut config = test_config(dir.path());
        config.cache_database_path = blocker.join("geocode.db");

        let app = ReviewsMap::initialize(config).unwrap();
        assert!(app.cache_health().store_path.is_none());
    }

    #[test]
    fn skips_disk_when_persistence_disabled() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.persist_cache = false;
        let app = ReviewsMap::initialize(config).unwrap();
        assert!(app.cache_health().store_path.is_none());
        assert!(!dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn records_dropped_rows_as_diagnostics() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.persist_cache = false;
        let app = ReviewsMap::initialize(config).unwrap();

        let text = "Name,City,Country,Lat,Lon\nA,,,53.5,-6.0\nB,Cork,Ireland,,\n";
        let data = app.load_from_text(text, None).await;
        assert_eq!(data.entities.len(), 1);
        assert_eq!(data.entities[0].name, "A");
        assert_eq!(data.failures.len(), 1);

        let kinds = app
            .diagnostics()
            .events()
            .into_iter()
            .map(|e| e.kind)
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["row_skipped", "run_completed"]);
    }

    #[tokio::test]
    async fn missing_fallback_file_aborts_the_run() {
        let dir = tempdir().unwrap();
        let app = ReviewsMap::initialize(test_config(dir.path())).unwrap();
        let err = app.load(None).await.unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
    }
}
