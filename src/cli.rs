//! Command-line interface for the reviews map pipeline.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use reviews_map::{AppConfig, ExportFormat};

/// Normalize a venue review spreadsheet and geocode it into map markers.
#[derive(Debug, Clone, Parser)]
#[command(name = "reviews-map", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Load the review table and emit located entities (default command)
    Resolve(ResolveArgs),
    /// Inspect or clear the persisted geocode cache
    Cache(CacheArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Geocode cache database location (overrides CACHE_DATABASE_PATH)
    #[arg(long = "cache-db", value_name = "PATH")]
    pub cache_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ResolveArgs {
    /// Published CSV URL (overrides CSV_URL)
    #[arg(long = "csv-url", value_name = "URL")]
    pub csv_url: Option<String>,

    /// Local CSV used when no URL is configured (overrides CSV_FALLBACK_PATH)
    #[arg(long = "csv-path", value_name = "PATH")]
    pub csv_path: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Keep geocode results in memory only
    #[arg(long = "no-persist")]
    pub no_persist: bool,

    /// Delay before each uncached geocode request, in milliseconds
    #[arg(long = "rate-delay-ms", value_name = "MS")]
    pub rate_delay_ms: Option<u64>,

    /// Output encoding
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CacheArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Remove every persisted geocode result
    #[arg(long)]
    pub clear: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Geojson,
}

impl From<OutputFormat> for ExportFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Json => ExportFormat::Json,
            OutputFormat::Geojson => ExportFormat::GeoJson,
        }
    }
}

impl StoreArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(path) = &self.cache_db {
            config.cache_database_path = path.clone();
        }
    }
}

impl ResolveArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.csv_url {
            config.set_csv_url(url);
        }
        if let Some(path) = &self.csv_path {
            config.csv_fallback_path = path.clone();
        }
        self.store.apply(config);
        if self.no_persist {
            config.persist_cache = false;
        }
        if let Some(ms) = self.rate_delay_ms {
            config.geocode_rate_delay_ms = ms.max(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resolve_flags() {
        let cli = Cli::try_parse_from([
            "reviews-map",
            "resolve",
            "--csv-path",
            "data/other.csv",
            "--cache-db",
            "/tmp/cache.db",
            "--rate-delay-ms",
            "0",
            "--format",
            "geojson",
            "-o",
            "out.geojson",
        ])
        .unwrap();
        let Some(Commands::Resolve(args)) = cli.command else {
            panic!("expected resolve command");
        };
        assert_eq!(args.format, OutputFormat::Geojson);

        let mut config = AppConfig::from_env();
        args.apply(&mut config);
        assert_eq!(config.csv_fallback_path, PathBuf::from("data/other.csv"));
        assert_eq!(config.cache_database_path, PathBuf::from("/tmp/cache.db"));
        assert_eq!(config.geocode_rate_delay_ms, 1);
        assert_eq!(args.output, Some(PathBuf::from("out.geojson")));
    }

    #[test]
    fn placeholder_url_flag_leaves_source_local() {
        let cli =
            Cli::try_parse_from(["reviews-map", "resolve", "--csv-url", "PASTE_CSV_URL_HERE"])
                .unwrap();
        let Some(Commands::Resolve(args)) = cli.command else {
            panic!("expected resolve command");
        };
        let mut config = AppConfig::from_env();
        config.csv_url = Some("https://example.com/a.csv".into());
        args.apply(&mut config);
        assert!(config.csv_url.is_none());
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["reviews-map"]).unwrap();
        assert!(cli.command.is_none());
    }
}
