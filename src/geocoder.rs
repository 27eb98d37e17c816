use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cache::{CacheStore, GeocodeCache, GeocodeKey, GeocodeResult};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::rate_limit::RateLimiter;

const RESULT_LIMIT: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    Provided,
    Cache,
    Lookup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeCandidate {
    pub lat: f64,
    pub lon: f64,
    pub display_name: Option<String>,
}

/// External free-text geocoding service.
#[async_trait]
pub trait GeocodeLookup: Send + Sync {
    async fn search(&self, query: &str, limit: u8) -> AppResult<Vec<GeocodeCandidate>>;
}

pub struct Geocoder {
    store: CacheStore,
    cache: Mutex<GeocodeCache>,
    lookup: Arc<dyn GeocodeLookup>,
    rate_limiter: RateLimiter,
}

impl Geocoder {
    /// Loads the persisted cache once; later inserts write through to `store`.
    pub fn new(store: CacheStore, lookup: Arc<dyn GeocodeLookup>, rate_limiter: RateLimiter) -> Self {
        let cache = store.load();
        Self {
            store,
            cache: Mutex::new(cache),
            lookup,
            rate_limiter,
        }
    }

    pub fn from_config(config: &AppConfig, store: CacheStore) -> AppResult<Self> {
        let lookup = NominatimClient::from_config(config)?;
        let rate_limiter = RateLimiter::new(Duration::from_millis(config.geocode_rate_delay_ms));
        Ok(Self::new(store, Arc::new(lookup), rate_limiter))
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    /// Forgets every stored result, in memory and in the store.
    pub fn clear_cache(&self) {
        *self.cache.lock() = GeocodeCache::default();
        self.store.clear();
    }

    pub async fn resolve(&self, city: &str, country: &str) -> AppResult<GeocodeResult> {
        self.resolve_traced(city, country)
            .await
            .map(|(result, _)| result)
    }

    pub(crate) async fn resolve_traced(
        &self,
        city: &str,
        country: &str,
    ) -> AppResult<(GeocodeResult, CoordinateSource)> {
        let key = GeocodeKey::new(city, country);
        if let Some(hit) = self.cache.lock().get(&key) {
            trace!(%key, "geocode cache hit");
            return Ok((hit, CoordinateSource::Cache));
        }

        let query = build_query(city, country);
        if query.is_empty() {
            return Err(AppError::NotFound(query));
        }

        self.rate_limiter.throttle().await;
        let candidates = self.lookup.search(&query, RESULT_LIMIT).await?;
        let first = candidates
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(query.clone()))?;
        let result = GeocodeResult {
            lat: first.lat,
            lon: first.lon,
        };

        {
            let mut cache = self.cache.lock();
            if !cache.insert(key.clone(), result) {
                // A concurrent resolve stored this key first; keep its result.
                let stored = cache.get(&key).unwrap_or(result);
                return Ok((stored, CoordinateSource::Lookup));
            }
            // Persist under the lock so writes land in insertion order.
            self.store.save(&cache);
        }
        debug!(%key, query = %query, lat = result.lat, lon = result.lon, "geocoded location");
        Ok((result, CoordinateSource::Lookup))
    }
}

/// Joins the non-empty parts with ", ".
pub fn build_query(city: &str, country: &str) -> String {
    [city.trim(), country.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Client for Nominatim's `/search` endpoint or a compatible host.
pub struct NominatimClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<SecretString>,
}

impl NominatimClient {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.geocoder_user_agent.as_str())
            .build()?;
        Self::with_client(
            http,
            &config.geocoder_endpoint,
            config.geocoder_api_key.clone(),
        )
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: &str,
        api_key: Option<SecretString>,
    ) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AppError::Config(format!("invalid geocoder endpoint {endpoint}: {err}")))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    fn search_url(&self, query: &str, limit: u8) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("format", "json")
                .append_pair("limit", &limit.to_string())
                .append_pair("q", query);
            if let Some(key) = &self.api_key {
                pairs.append_pair("key", key.expose_secret());
            }
        }
        url
    }
}

#[async_trait]
impl GeocodeLookup for NominatimClient {
    async fn search(&self, query: &str, limit: u8) -> AppResult<Vec<GeocodeCandidate>> {
        #[derive(Deserialize)]
        struct ResponsePlace {
            lat: ResponseCoordinate,
            lon: ResponseCoordinate,
            display_name: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ResponseCoordinate {
            Text(String),
            Number(f64),
        }

        impl ResponseCoordinate {
            fn value(&self) -> Option<f64> {
                let parsed = match self {
                    ResponseCoordinate::Text(text) => text.trim().parse::<f64>().ok()?,
                    ResponseCoordinate::Number(value) => *value,
                };
                parsed.is_finite().then_some(parsed)
            }
        }

        let response = self
            .http
            .get(self.search_url(query, limit))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| AppError::Service(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Service(format!("geocode failed: {status}")));
        }

        let places: Vec<ResponsePlace> = response
            .json()
            .await
            .map_err(|err| AppError::Service(format!("malformed payload: {err}")))?;

        places
            .into_iter()
            .map(|place| {
                match (place.lat.value(), place.lon.value()) {
                    (Some(lat), Some(lon)) => Ok(GeocodeCandidate {
                        lat,
                        lon,
                        display_name: place.display_name,
                    }),
                    _ => Err(AppError::Service(
                        "malformed payload: candidate coordinates are not numeric".into(),
                    )),
                }
            })
            .collect()
    }
}
