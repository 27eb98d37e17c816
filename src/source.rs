use std::path::PathBuf;

use reqwest::header::CACHE_CONTROL;
use reqwest::Url;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const TRANSPORT_HINT: &str =
    "check your CSV_URL or ensure the fallback CSV file exists";

/// Where the review table comes from. A configured URL always wins; the
/// local file is only used when no URL is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvSource {
    Remote(Url),
    Local(PathBuf),
}

impl CsvSource {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        match &config.csv_url {
            Some(url) => Url::parse(url)
                .map(CsvSource::Remote)
                .map_err(|err| AppError::Config(format!("invalid CSV_URL {url}: {err}"))),
            None => Ok(CsvSource::Local(config.csv_fallback_path.clone())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CsvSource::Remote(url) => url.to_string(),
            CsvSource::Local(path) => path.display().to_string(),
        }
    }

    pub async fn read_text(&self, http: &reqwest::Client) -> AppResult<String> {
        info!(source = %self.describe(), "loading review table");
        let text = match self {
            CsvSource::Remote(url) => fetch_remote(http, url.clone()).await,
            CsvSource::Local(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|err| format!("{}: {err}", path.display())),
        }
        .map_err(|detail| AppError::Transport(format!("{detail} ({TRANSPORT_HINT})")))?;
        debug!(bytes = text.len(), "review table loaded");
        Ok(text)
    }
}

async fn fetch_remote(http: &reqwest::Client, url: Url) -> Result<String, String> {
    let response = http
        .get(url)
        .header(CACHE_CONTROL, "no-store")
        .send()
        .await
        .map_err(|err| format!("CSV fetch failed: {err}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("CSV fetch failed: {status}"));
    }
    response
        .text()
        .await
        .map_err(|err| format!("CSV fetch failed: {err}"))
}
