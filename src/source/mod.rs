//! Source backup API
//!
//! Handles:
//! - Listing available backups (catalog)
//! - Downloading one backup payload under a size cap

mod catalog;

pub use catalog::{BackupCandidate, VERSION_FORMAT, select_latest};

use reqwest::Response;

use crate::config::{Secret, SourceConfig};
use crate::error::{CatalogError, RelayError, Result};
use crate::http::RetryingClient;

/// In-memory payload of one cycle, bounded by a byte cap
#[derive(Debug)]
pub struct TransferBuffer {
    data: Vec<u8>,
    limit: u64,
}

impl TransferBuffer {
    pub fn new(limit: u64) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    /// Append a chunk, refusing to grow past the cap
    ///
    /// # Returns
    /// `false` (and nothing appended) if the chunk would exceed the cap
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if self.data.len() as u64 + chunk.len() as u64 > self.limit {
            return false;
        }
        self.data.extend_from_slice(chunk);
        true
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Client for the source backup API
pub struct SourceClient {
    http: RetryingClient,
    token: Secret,
    catalog_url: String,
    max_catalog_bytes: u64,
}

impl SourceClient {
    pub fn new(http: RetryingClient, config: &SourceConfig) -> Self {
        Self {
            http,
            token: config.api_token.clone(),
            catalog_url: config.catalog_url.clone(),
            max_catalog_bytes: config.max_catalog_bytes,
        }
    }

    /// List the backups currently offered by the source
    ///
    /// # Errors
    /// Returns error if the request fails after retries or the body is not
    /// a JSON array of `{version, url}`
    pub async fn fetch_catalog(&self) -> Result<Vec<BackupCandidate>> {
        let response = self.get(&self.catalog_url).await?;
        let body = read_capped(response, &self.catalog_url, self.max_catalog_bytes).await?;

        let candidates: Vec<BackupCandidate> =
            serde_json::from_slice(&body.into_inner()).map_err(|e| CatalogError::Malformed {
                url: self.catalog_url.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(count = candidates.len(), "Fetched backup catalog");
        Ok(candidates)
    }

    /// Download the payload at `url`
    ///
    /// # Errors
    /// Returns `SizeExceeded` as soon as more than `max_bytes` arrive, even
    /// if the transfer itself would have completed
    pub async fn fetch_payload(&self, url: &str, max_bytes: u64) -> Result<TransferBuffer> {
        let response = self.get(url).await?;
        read_capped(response, url, max_bytes).await
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let request = self
            .http
            .client()
            .get(url)
            .bearer_auth(self.token.expose())
            .build()
            .map_err(|source| RelayError::Transport {
                url: url.to_string(),
                source,
            })?;
        self.http.execute(request).await
    }
}

/// Stream `response` into a buffer of at most `limit` bytes
async fn read_capped(mut response: Response, url: &str, limit: u64) -> Result<TransferBuffer> {
    if let Some(length) = response.content_length() {
        if length > limit {
            return Err(RelayError::SizeExceeded {
                url: url.to_string(),
                limit,
            });
        }
    }

    let mut buffer = TransferBuffer::new(limit);
    while let Some(chunk) = response.chunk().await.map_err(|source| RelayError::Transport {
        url: url.to_string(),
        source,
    })? {
        if !buffer.push(&chunk) {
            return Err(RelayError::SizeExceeded {
                url: url.to_string(),
                limit,
            });
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::TransferBuffer;

    #[test]
    fn transfer_buffer_accepts_exactly_the_limit() {
        let mut buffer = TransferBuffer::new(4);
        assert!(buffer.push(b"ab"));
        assert!(buffer.push(b"cd"));
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.push(b"e"));
        assert_eq!(buffer.into_inner(), b"abcd");
    }

    #[test]
    fn transfer_buffer_rejects_oversized_first_chunk() {
        let mut buffer = TransferBuffer::new(2);
        assert!(!buffer.push(b"abc"));
        assert!(buffer.is_empty());
    }
}
