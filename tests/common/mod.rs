//! Common test utilities for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use backup_relay::config::{FailurePolicy, RetryConfig, Secret, SourceConfig};
use backup_relay::http::{RetryPolicy, RetryingClient};
use backup_relay::naming::{NameSanitizer, SanitizedName};
use backup_relay::relay::{BackupRelay, RelaySettings, RunMode};
use backup_relay::source::SourceClient;
use backup_relay::{Destination, RelayError, Result};
use tokio::net::TcpListener;

pub const API_TOKEN: &str = "test-api-token";

/// Serve the router built by `build` on an ephemeral port
///
/// `build` receives the base URL so handlers can hand out links to the
/// same server.
pub async fn serve<F>(build: F) -> String
where
    F: FnOnce(&str) -> Router,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = build(&base);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

/// Client that retries quickly enough for tests
pub fn fast_client(max_retries: u32) -> RetryingClient {
    RetryingClient::new(
        reqwest::Client::new(),
        RetryPolicy {
            interval: Duration::from_millis(10),
            max_retries,
        },
    )
}

pub fn source_config(catalog_url: &str) -> SourceConfig {
    SourceConfig {
        api_token: Secret::new(API_TOKEN),
        catalog_url: catalog_url.to_string(),
        max_payload_bytes: 4_000_000,
        max_catalog_bytes: 5_000_000,
        request_timeout: "5s".to_string(),
        retry: RetryConfig {
            interval: "10ms".to_string(),
            max_retries: 1,
        },
    }
}

pub fn settings(mode: RunMode) -> RelaySettings {
    RelaySettings {
        interval: Duration::from_millis(20),
        mode,
        on_failure: FailurePolicy::Exit,
        path_prefix: "backups".to_string(),
        file_suffix: ".zip".to_string(),
        max_payload_bytes: 4_000_000,
    }
}

pub fn relay<D: Destination>(
    catalog_url: &str,
    destination: D,
    settings: RelaySettings,
) -> BackupRelay<D> {
    BackupRelay::new(
        SourceClient::new(fast_client(1), &source_config(catalog_url)),
        destination,
        NameSanitizer::onedrive(),
        settings,
    )
}

/// Destination that keeps uploads in memory
#[derive(Clone, Default)]
pub struct RecordingDestination {
    pub uploads: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub attempts: Arc<AtomicUsize>,
    pub reject: bool,
}

impl RecordingDestination {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Resolves once at least `count` uploads were attempted
    pub async fn wait_for_attempts(&self, count: usize) {
        while self.attempts() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Destination for RecordingDestination {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn upload(&self, name: &SanitizedName, body: Vec<u8>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(RelayError::Upload(
                "rejected by test destination".to_string(),
            ));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((name.as_str().to_string(), body));
        Ok(())
    }
}
