use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_CACHE_NAMESPACE: &str = "gg_geocode_cache_v1";
pub const DEFAULT_RATE_DELAY_MS: u64 = 350;
const DEFAULT_CSV_FALLBACK_PATH: &str = "data/reviews.csv";
const CSV_URL_PLACEHOLDER: &str = "PASTE_CSV_URL_HERE";
const CACHE_DATABASE_FILE: &str = "geocode-cache.db";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub csv_url: Option<String>,
    pub csv_fallback_path: PathBuf,
    pub geocoder_endpoint: String,
    pub geocoder_api_key: Option<SecretString>,
    pub geocoder_user_agent: String,
    pub geocode_rate_delay_ms: u64,
    pub cache_database_path: PathBuf,
    pub cache_namespace: String,
    pub persist_cache: bool,
    pub diagnostics_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub csv_url: Option<String>,
    pub csv_fallback_path: String,
    pub geocoder_endpoint: String,
    pub geocoder_user_agent: String,
    pub geocode_rate_delay_ms: u64,
    pub cache_database_path: String,
    pub cache_namespace: String,
    pub persist_cache: bool,
    pub diagnostics_path: Option<String>,
    pub has_geocoder_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            csv_url: env::var("CSV_URL")
                .ok()
                .and_then(|v| sanitize_csv_url(&v)),
            csv_fallback_path: env::var("CSV_FALLBACK_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CSV_FALLBACK_PATH)),
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEOCODER_ENDPOINT.to_string()),
            geocoder_api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(default_user_agent),
            geocode_rate_delay_ms: parse_u64("GEOCODE_RATE_DELAY_MS", DEFAULT_RATE_DELAY_MS)
                .max(1),
            cache_database_path: env::var("CACHE_DATABASE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_database_path),
            cache_namespace: env::var("GEOCODE_CACHE_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string()),
            persist_cache: parse_bool("PERSIST_GEOCODE_CACHE", true),
            diagnostics_path: env::var("DIAGNOSTICS_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Overrides the remote source; the placeholder URL leaves it unset.
    pub fn set_csv_url(&mut self, url: &str) {
        self.csv_url = sanitize_csv_url(url);
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            csv_url: self.csv_url.clone(),
            csv_fallback_path: self.csv_fallback_path.to_string_lossy().to_string(),
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            geocoder_user_agent: self.geocoder_user_agent.clone(),
            geocode_rate_delay_ms: self.geocode_rate_delay_ms,
            cache_database_path: self.cache_database_path.to_string_lossy().to_string(),
            cache_namespace: self.cache_namespace.clone(),
            persist_cache: self.persist_cache,
            diagnostics_path: self
                .diagnostics_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            has_geocoder_key: self.geocoder_api_key.is_some(),
        }
    }
}

fn sanitize_csv_url(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(CSV_URL_PLACEHOLDER) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn default_user_agent() -> String {
    format!("reviews-map/{}", env!("CARGO_PKG_VERSION"))
}

fn default_cache_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("reviews-map").join(CACHE_DATABASE_FILE))
        .unwrap_or_else(|| PathBuf::from(CACHE_DATABASE_FILE))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GEOCODER_API_KEY", "secret");
        env::set_var("CSV_URL", "https://example.com/sheet.csv");
        env::set_var("GEOCODE_RATE_DELAY_MS", "500");
        env::set_var("CACHE_DATABASE_PATH", "/tmp/custom.db");
        env::set_var("PERSIST_GEOCODE_CACHE", "false");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.csv_url.as_deref(), Some("https://example.com/sheet.csv"));
        assert_eq!(public.geocode_rate_delay_ms, 500);
        assert_eq!(public.cache_database_path, "/tmp/custom.db");
        assert_eq!(public.cache_namespace, DEFAULT_CACHE_NAMESPACE);
        assert!(!public.persist_cache);
        assert!(public.has_geocoder_key);
        assert!(config.geocoder_api_key.is_some());
        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));
    }

    #[test]
    fn placeholder_url_counts_as_unset() {
        assert_eq!(sanitize_csv_url("PASTE_CSV_URL_HERE"), None);
        assert_eq!(sanitize_csv_url("   "), None);
        assert_eq!(
            sanitize_csv_url(" https://example.com/a.csv "),
            Some("https://example.com/a.csv".to_string())
        );
    }
}
