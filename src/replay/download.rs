//! Replay File Download
//!
//! The replay REST API answers a `{name, url}` manifest per subsource and
//! trading day; the named URL serves the raw binary tick file, which is
//! streamed straight to disk.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::ReplayError;
use crate::config::ConfigError;

/// Production replay manifest endpoint.
const REPLAY_API_URL: &str = "https://api-v2.intrinio.com/securities/replay";

/// Manifest entry for one subsource and date.
#[derive(Debug, Deserialize)]
struct ReplayManifest {
    name: String,
    url: String,
}

/// Downloads per-subsource tick files for a trading day.
pub struct ReplayDownloader {
    http: reqwest::Client,
    access_key: String,
    api_url: String,
}

impl std::fmt::Debug for ReplayDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayDownloader")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl ReplayDownloader {
    /// Build a downloader for the given access key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(access_key: impl Into<String>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            http,
            access_key: access_key.into(),
            api_url: REPLAY_API_URL.to_string(),
        })
    }

    /// Point the downloader at a different manifest endpoint.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Download one subsource's tick file for `date` into `dest_dir`.
    ///
    /// Returns the path of the downloaded file.
    ///
    /// # Errors
    ///
    /// Surfaces manifest rejections (401 and other statuses), transport
    /// failures, and file I/O errors.
    pub async fn download(
        &self,
        subsource: &str,
        date: NaiveDate,
        dest_dir: &Path,
    ) -> Result<PathBuf, ReplayError> {
        let manifest = self.fetch_manifest(subsource, date).await?;

        // Only the final path component of the advertised name is trusted.
        let file_name = Path::new(&manifest.name)
            .file_name()
            .map_or_else(
                || format!("{subsource}_{date}.bin"),
                |name| name.to_string_lossy().to_string(),
            );
        let dest = dest_dir.join(file_name);

        tracing::info!(subsource, %date, dest = %dest.display(), "downloading tick file");

        let response = self
            .http
            .get(&manifest.url)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(&dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(subsource, bytes = written, "tick file downloaded");
        Ok(dest)
    }

    /// Ask the replay API where the tick file lives.
    async fn fetch_manifest(
        &self,
        subsource: &str,
        date: NaiveDate,
    ) -> Result<ReplayManifest, ReplayError> {
        let date = date.format("%Y-%m-%d").to_string();
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("subsource", subsource),
                ("date", date.as_str()),
                ("api_key", self.access_key.as_str()),
            ])
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let body = response.text().await?;
                Ok(serde_json::from_str::<ReplayManifest>(&body)?)
            }
            401 => {
                tracing::error!(subsource, "replay API rejected the access key (HTTP 401)");
                Err(ReplayError::Unauthorized)
            }
            other => Err(ReplayError::UnexpectedStatus(other)),
        }
    }
}
