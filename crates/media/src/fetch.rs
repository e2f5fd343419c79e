use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::BytesMut,
    herald_common::MediaPayload,
    reqwest::{Client, header::CONTENT_TYPE},
    thiserror::Error,
    tracing::{info, warn},
};

use crate::mime;

/// Default size cap for downloaded media.
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Default whole-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid media url '{0}'")]
    InvalidUrl(String),

    #[error("media download timed out after {0:?}")]
    Timeout(Duration),

    #[error("media server returned HTTP {0}")]
    Status(u16),

    #[error("media exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("media download failed: {0}")]
    Request(#[source] reqwest::Error),
}

/// Resolves a media URL into bytes.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<MediaPayload, MediaError>;
}

/// HTTP downloader with a size cap and timeout.
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    client: Client,
    max_bytes: usize,
    timeout: Duration,
}

impl Default for MediaFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES, DEFAULT_TIMEOUT)
    }
}

impl MediaFetcher {
    #[must_use]
    pub fn new(max_bytes: usize, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            max_bytes,
            timeout,
        }
    }

    fn map_err(&self, err: reqwest::Error) -> MediaError {
        if err.is_timeout() {
            MediaError::Timeout(self.timeout)
        } else {
            MediaError::Request(err)
        }
    }

    async fn download(&self, url: &str) -> Result<MediaPayload, MediaError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| MediaError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MediaError::InvalidUrl(url.to_string()));
        }

        let mut response = self
            .client
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        if !response.status().is_success() {
            return Err(MediaError::Status(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len > self.max_bytes as u64
        {
            return Err(MediaError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| mime::essence(v).to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| mime::mime_from_url(url).map(str::to_string))
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        // Content-Length may be absent or wrong; the cap holds per chunk.
        let mut buf = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_err(e))? {
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(MediaPayload::new(buf.freeze(), mime_type))
    }
}

#[async_trait]
impl MediaSource for MediaFetcher {
    async fn fetch(&self, url: &str) -> Result<MediaPayload, MediaError> {
        info!(url, "downloading media");
        match self.download(url).await {
            Ok(media) => {
                info!(
                    url,
                    mime = %media.mime_type,
                    size_mib = %format!("{:.2}", media.size_mib()),
                    "media downloaded"
                );
                Ok(media)
            },
            Err(e) => {
                warn!(url, error = %e, "media download failed");
                Err(e)
            },
        }
    }
}
