//! Outbound HTTP with bounded retries
//!
//! Every outbound request (source and destination) goes through
//! `RetryingClient`. Only server errors (5xx) are retried; transport
//! failures, client errors and unexpected codes end the exchange on the
//! first attempt.

use std::time::Duration;

use reqwest::{Client, Request, Response, StatusCode};

use crate::error::{RelayError, Result};
use crate::metrics::{HTTP_ATTEMPTS_TOTAL, HTTP_RETRIES_TOTAL};

/// Wait interval and retry budget for server errors
///
/// Pure configuration, shared by every request for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before each resend
    pub interval: Duration,
    /// Resends allowed after the first attempt
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            max_retries: 6,
        }
    }
}

/// How a single response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
    Unexpected,
}

impl StatusClass {
    /// Classify by the hundreds digit of the code
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() / 100 {
            2 => StatusClass::Success,
            4 => StatusClass::ClientError,
            5 => StatusClass::ServerError,
            _ => StatusClass::Unexpected,
        }
    }
}

/// `reqwest::Client` paired with a retry policy
#[derive(Debug, Clone)]
pub struct RetryingClient {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Build a client with a per-request timeout
    ///
    /// # Errors
    /// Returns error if the TLS backend cannot be initialized
    pub fn with_timeout(timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("backup-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client, policy))
    }

    /// Underlying client, for building requests
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request` under the client's own policy
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with(request, self.policy).await
    }

    /// Send `request`, resending it after 5xx responses
    ///
    /// At most `policy.max_retries + 1` attempts are made. The wait between
    /// attempts holds up the caller; nothing else on this path runs meanwhile.
    ///
    /// # Errors
    /// * `Transport` - no response was obtained (never retried)
    /// * `ClientStatus` - 4xx (never retried), with a body excerpt
    /// * `ServerStatus` - 5xx on every attempt, with the last body excerpt
    /// * `UnexpectedStatus` - any other non-2xx code
    pub async fn execute_with(&self, request: Request, policy: RetryPolicy) -> Result<Response> {
        let url = request.url().to_string();
        let mut remaining = policy.max_retries;

        loop {
            let attempt = request.try_clone().ok_or_else(|| {
                RelayError::Internal(anyhow::anyhow!(
                    "request to {} has a body that cannot be resent",
                    url
                ))
            })?;

            let response = match self.client.execute(attempt).await {
                Ok(response) => response,
                Err(source) => {
                    HTTP_ATTEMPTS_TOTAL.with_label_values(&["transport"]).inc();
                    return Err(RelayError::Transport { url, source });
                }
            };

            let status = response.status();
            match StatusClass::of(status) {
                StatusClass::Success => {
                    HTTP_ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
                    tracing::debug!(url = %url, status = %status, "Request succeeded");
                    return Ok(response);
                }
                StatusClass::ClientError => {
                    HTTP_ATTEMPTS_TOTAL.with_label_values(&["client_error"]).inc();
                    let body = body_excerpt(response).await;
                    return Err(RelayError::ClientStatus { url, status, body });
                }
                StatusClass::ServerError => {
                    HTTP_ATTEMPTS_TOTAL.with_label_values(&["server_error"]).inc();
                    if remaining == 0 {
                        let body = body_excerpt(response).await;
                        return Err(RelayError::ServerStatus {
                            url,
                            status,
                            retries: policy.max_retries,
                            body,
                        });
                    }
                    remaining -= 1;
                    HTTP_RETRIES_TOTAL.inc();
                    tracing::warn!(
                        url = %url,
                        status = %status,
                        remaining,
                        wait_ms = policy.interval.as_millis() as u64,
                        "Server error, retrying"
                    );
                    drop(response);
                    tokio::time::sleep(policy.interval).await;
                }
                StatusClass::Unexpected => {
                    HTTP_ATTEMPTS_TOTAL.with_label_values(&["unexpected"]).inc();
                    return Err(RelayError::UnexpectedStatus { url, status });
                }
            }
        }
    }
}

/// Leading bytes of an error response kept for diagnostics
pub const BODY_EXCERPT_BYTES: usize = 512;

/// First `BODY_EXCERPT_BYTES` of the body as trimmed, lossy UTF-8
///
/// Read failures end the excerpt early; they never replace the status error.
async fn body_excerpt(mut response: Response) -> String {
    let mut bytes = Vec::new();
    while bytes.len() < BODY_EXCERPT_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(%error, "Failed to read error response body");
                break;
            }
        }
    }
    excerpt(&bytes)
}

fn excerpt(bytes: &[u8]) -> String {
    let truncated = bytes.len() > BODY_EXCERPT_BYTES;
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(BODY_EXCERPT_BYTES)]);
    let text = text.trim();
    if truncated {
        format!("{}...", text)
    } else {
        text.to_string()
    }
}
