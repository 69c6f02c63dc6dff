use crate::config::NetworkConfig;
use crate::error::{Result, StigError};
use crate::pipeline::ArchiveSource;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Response, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Downloads benchmark archives into a cache directory keyed by file name
pub struct ArchiveFetcher {
    client: Client,
    timeout_seconds: u64,
}

impl ArchiveFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StigError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout_seconds: config.timeout_seconds,
        })
    }

    /// Cache location for `url`: the last segment of its path inside `cache_dir`
    pub fn cache_path(url: &str, cache_dir: &Path) -> Result<PathBuf> {
        let invalid = |reason: &str| StigError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        let name = parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| invalid("URL path has no file name"))?;

        Ok(cache_dir.join(name))
    }

    /// Return the cached archive for `url`, downloading it first when absent.
    ///
    /// The body is written to a uniquely named `.part` file next to the cache
    /// path and renamed into place only once the download has completed, so an
    /// interrupted or timed-out transfer never leaves a file under the cache
    /// name.
    pub async fn fetch(&self, url: &str, cache_dir: &Path) -> Result<PathBuf> {
        let target = Self::cache_path(url, cache_dir)?;
        if tokio::fs::try_exists(&target).await? {
            debug!(url, path = %target.display(), "archive cache hit");
            return Ok(target);
        }

        tokio::fs::create_dir_all(cache_dir).await?;
        let response = self.request(url).await?;

        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part = cache_dir.join(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        let outcome = timeout(
            Duration::from_secs(self.timeout_seconds),
            stream_to_file(url, response, &part),
        )
        .await;

        match outcome {
            Ok(Ok(bytes)) => {
                if let Err(e) = tokio::fs::rename(&part, &target).await {
                    remove_partial(&part).await;
                    return Err(e.into());
                }
                info!(url, bytes, path = %target.display(), "archive downloaded");
                Ok(target)
            }
            Ok(Err(e)) => {
                remove_partial(&part).await;
                Err(e)
            }
            Err(_) => {
                remove_partial(&part).await;
                warn!(url, timeout_seconds = self.timeout_seconds, "archive download timed out");
                Err(StigError::Timeout {
                    url: url.to_string(),
                    timeout_seconds: self.timeout_seconds,
                })
            }
        }
    }

    /// Issue the GET request, bounded by the configured timeout
    async fn request(&self, url: &str) -> Result<Response> {
        debug!(url, "requesting archive");
        let response = timeout(
            Duration::from_secs(self.timeout_seconds),
            self.client.get(url).send(),
        )
        .await
        .map_err(|_| StigError::Timeout {
            url: url.to_string(),
            timeout_seconds: self.timeout_seconds,
        })?
        .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StigError::Network {
                url: url.to_string(),
                details: format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        Ok(response)
    }

    fn transport_error(&self, url: &str, error: reqwest::Error) -> StigError {
        if error.is_timeout() {
            StigError::Timeout {
                url: url.to_string(),
                timeout_seconds: self.timeout_seconds,
            }
        } else {
            StigError::Network {
                url: url.to_string(),
                details: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl ArchiveSource for ArchiveFetcher {
    async fn fetch_archive(&self, url: &str, cache_dir: &Path) -> Result<PathBuf> {
        self.fetch(url, cache_dir).await
    }
}

async fn stream_to_file(url: &str, response: Response, part: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.try_next().await.map_err(|e| StigError::Network {
        url: url.to_string(),
        details: e.to_string(),
    })? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_partial(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %part.display(), error = %e, "failed to remove partial download");
        }
    }
}
