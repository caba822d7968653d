//! backup-relay - copies the newest source backup to cloud drive storage
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   catalog + payload   ┌──────────────┐   upload   ┌──────────────┐
//! │ source API   │ ────────────────────▶ │ BackupRelay  │ ─────────▶ │ destination  │
//! └──────────────┘    (RetryingClient)   └──────────────┘            └──────────────┘
//!                                          select_latest
//!                                          NameSanitizer
//! ```
//!
//! # Modules
//!
//! - `http`: Retrying HTTP client shared by all outbound calls
//! - `source`: Backup catalog, latest-backup selection and payload download
//! - `naming`: OneDrive-safe destination names
//! - `destination`: OneDrive and Google Drive uploads
//! - `relay`: Cycle orchestration (daemon or oneshot)
//! - `config`: Configuration management
//! - `metrics`: Prometheus metrics
//! - `error`: Error types

pub mod config;
pub mod destination;
pub mod error;
pub mod http;
pub mod metrics;
pub mod naming;
pub mod relay;
pub mod source;

pub use destination::{Destination, DestinationClient};
pub use error::{RelayError, Result};
pub use relay::{BackupRelay, CycleReport, RelaySettings, RunMode, RunOutcome};

/// Wire up a relay for the configured destination
///
/// # Arguments
/// * `config` - Validated configuration
/// * `oneshot` - Force a single cycle regardless of `general.oneshot`
///
/// # Errors
/// Returns error if the HTTP client cannot be built or the destination's
/// credential files cannot be read
pub fn build_relay(
    config: &config::AppConfig,
    oneshot: bool,
) -> Result<BackupRelay<DestinationClient>> {
    let http =
        http::RetryingClient::with_timeout(config.request_timeout()?, config.retry_policy()?)?;

    let source = source::SourceClient::new(http.clone(), &config.source);
    let destination = DestinationClient::from_config(http, &config.destination)?;
    let settings = RelaySettings::from_config(config, oneshot)?;

    tracing::info!(
        destination = %config.destination.kind,
        mode = ?settings.mode,
        interval_secs = settings.interval.as_secs(),
        "Backup relay configured"
    );

    Ok(BackupRelay::new(
        source,
        destination,
        naming::NameSanitizer::onedrive(),
        settings,
    ))
}
