use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;

use crate::audio::errors::FetchError;

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send>>;

/// Retrieves encoded audio bytes for a track locator.
///
/// Fetches are cancelled by dropping or aborting the task awaiting them.
pub trait AudioFetcher: Send + Sync {
    fn fetch(&self, locator: &str) -> FetchFuture;
}

/// `http://` and `https://` locators.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher { client: Client::new() }
    }
}

impl AudioFetcher for HttpFetcher {
    fn fetch(&self, locator: &str) -> FetchFuture {
        let client = self.client.clone();
        let url = locator.to_string();
        Box::pin(async move {
            log::debug!("Fetch: GET {}", url);
            let response = client.get(&url).send().await.map_err(|e| FetchError::Http {
                url: url.clone(),
                source: e,
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    url,
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().await.map_err(|e| FetchError::Http {
                url: url.clone(),
                source: e,
            })?;
            log::debug!("Fetch: {} bytes from {}", bytes.len(), url);
            Ok(bytes.to_vec())
        })
    }
}

/// Local paths and `file://` locators.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileFetcher;

impl FileFetcher {
    fn path_for(locator: &str) -> PathBuf {
        PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator))
    }
}

impl AudioFetcher for FileFetcher {
    fn fetch(&self, locator: &str) -> FetchFuture {
        let path = Self::path_for(locator);
        Box::pin(async move {
            let display = path.display().to_string();
            tokio::task::spawn_blocking(move || std::fs::read(&path))
                .await
                .map_err(|e| FetchError::Worker(e.to_string()))?
                .map_err(|e| FetchError::FileRead {
                    path: display,
                    source: e,
                })
        })
    }
}

/// Dispatches on the locator scheme.
#[derive(Clone)]
pub struct SourceFetcher {
    http: Arc<dyn AudioFetcher>,
    file: Arc<dyn AudioFetcher>,
}

impl Default for SourceFetcher {
    fn default() -> Self {
        SourceFetcher {
            http: Arc::new(HttpFetcher::new()),
            file: Arc::new(FileFetcher),
        }
    }
}

impl SourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioFetcher for SourceFetcher {
    fn fetch(&self, locator: &str) -> FetchFuture {
        let lower = locator.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.http.fetch(locator)
        } else if lower.starts_with("file://") || !lower.contains("://") {
            self.file.fetch(locator)
        } else {
            let locator = locator.to_string();
            Box::pin(async move { Err(FetchError::UnsupportedLocator(locator)) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_fetcher_reads_plain_and_file_urls() {
        let path = std::env::temp_dir().join(format!("twin-deck-fetch-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3]).expect("write temp file");

        let plain = FileFetcher.fetch(&path.display().to_string()).await.expect("plain path");
        assert_eq!(plain, vec![1, 2, 3]);
        let url = format!("file://{}", path.display());
        let via_url = SourceFetcher::new().fetch(&url).await.expect("file url");
        assert_eq!(via_url, vec![1, 2, 3]);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let result = FileFetcher.fetch("/definitely/not/here.wav").await;
        assert!(matches!(result, Err(FetchError::FileRead { .. })));
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        let result = SourceFetcher::new().fetch("ftp://example.com/a.mp3").await;
        assert!(matches!(result, Err(FetchError::UnsupportedLocator(_))));
    }
}
