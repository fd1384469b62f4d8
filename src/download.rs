use std::{path::Path, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[cfg(test)]
use mockall::automock;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("request to {0} failed: {1}")]
    Request(String, String),
    #[error("{0} answered with status {1}")]
    Status(String, u16),
    #[error("could not write {0}: {1}")]
    Write(String, String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Downloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

pub(crate) struct HttpDownloader {
    client: reqwest::Client,
}
impl HttpDownloader {
    pub fn new() -> Result<Self, DownloadError> {
        HttpDownloader::with_timeout(DOWNLOAD_TIMEOUT)
    }
    /// `timeout` covers the whole request, body included.
    pub fn with_timeout(timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("codetun/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Request(String::from("client setup"), e.to_string()))?;
        Ok(HttpDownloader { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Request(url.to_string(), e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(url.to_string(), status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Request(url.to_string(), e.to_string()))?;

        let write_err = |e: std::io::Error| DownloadError::Write(dest.display().to_string(), e.to_string());
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(dest, &body).await.map_err(write_err)?;
        info!("downloaded {} to {} ({} bytes)", url, dest.display(), body.len());
        Ok(())
    }
}

/// Downloads `url` to `dest` unless `dest` is already there. Returns whether
/// a download happened.
pub(crate) async fn fetch_if_missing(
    downloader: &dyn Downloader,
    url: &str,
    dest: &Path,
) -> Result<bool, DownloadError> {
    if dest.exists() {
        info!("{} exists. skipping...", dest.display());
        return Ok(false);
    }
    downloader.download(url, dest).await?;
    Ok(true)
}
