//! Backup cycle scheduling
//!
//! One cycle fetches the source catalog, picks the latest backup, downloads
//! it into memory, derives the destination name and hands both to the
//! destination. Cycles never overlap: the next tick is only awaited once the
//! previous cycle has finished.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{AppConfig, FailurePolicy};
use crate::destination::Destination;
use crate::error::Result;
use crate::metrics::{BYTES_RELAYED_TOTAL, CYCLES_TOTAL, LAST_SUCCESS_TIMESTAMP_SECONDS};
use crate::naming::{NameSanitizer, SanitizedName};
use crate::source::{SourceClient, select_latest};

/// Daemon repeats on a timer, oneshot stops after the first cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Daemon,
    Oneshot,
}

/// Why `BackupRelay::run` returned successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Oneshot cycle finished
    Completed,
    /// Shutdown signal observed while idle
    Interrupted,
}

/// Scheduling and naming settings, fixed at startup
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub interval: Duration,
    pub mode: RunMode,
    pub on_failure: FailurePolicy,
    pub path_prefix: String,
    pub file_suffix: String,
    pub max_payload_bytes: u64,
}

impl RelaySettings {
    /// Settings from validated configuration; `oneshot` forces oneshot mode
    pub fn from_config(config: &AppConfig, oneshot: bool) -> Result<Self> {
        let mode = if oneshot || config.general.oneshot {
            RunMode::Oneshot
        } else {
            RunMode::Daemon
        };
        Ok(Self {
            interval: config.backup_interval()?,
            mode,
            on_failure: config.general.on_failure,
            path_prefix: config.destination.path_prefix.clone(),
            file_suffix: config.destination.file_suffix.clone(),
            max_payload_bytes: config.source.max_payload_bytes,
        })
    }
}

/// Result of one successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Version label of the relayed backup
    pub version: String,
    /// Name the backup was stored under
    pub name: SanitizedName,
    /// Payload size in bytes
    pub bytes: usize,
}

/// Relays the newest source backup to a destination
pub struct BackupRelay<D> {
    source: SourceClient,
    destination: D,
    sanitizer: NameSanitizer,
    settings: RelaySettings,
}

impl<D: Destination> BackupRelay<D> {
    pub fn new(
        source: SourceClient,
        destination: D,
        sanitizer: NameSanitizer,
        settings: RelaySettings,
    ) -> Self {
        Self {
            source,
            destination,
            sanitizer,
            settings,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Unsanitized destination path for a version label
    pub fn destination_path(&self, version: &str) -> String {
        let prefix = self.settings.path_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            format!("{}{}", version, self.settings.file_suffix)
        } else {
            format!("{}/{}{}", prefix, version, self.settings.file_suffix)
        }
    }

    /// Run one fetch-select-download-name-upload cycle
    ///
    /// # Errors
    /// Any step's error ends the cycle; nothing is retried here beyond the
    /// HTTP layer's own retries
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let catalog = self.source.fetch_catalog().await?;
        let selected = select_latest(&catalog)?;
        tracing::info!(
            version = %selected.version,
            candidates = catalog.len(),
            "Selected latest backup"
        );

        let buffer = self
            .source
            .fetch_payload(&selected.url, self.settings.max_payload_bytes)
            .await?;
        let name = self
            .sanitizer
            .sanitize(&self.destination_path(&selected.version))?;

        let bytes = buffer.len();
        tracing::debug!(bytes, name = %name, "Backup downloaded");

        self.destination.upload(&name, buffer.into_inner()).await?;

        Ok(CycleReport {
            version: selected.version,
            name,
            bytes,
        })
    }

    /// Run a cycle and record its outcome in logs and metrics
    async fn run_recorded(&self) -> Result<CycleReport> {
        let started = Instant::now();
        match self.run_cycle().await {
            Ok(report) => {
                CYCLES_TOTAL.with_label_values(&["success"]).inc();
                BYTES_RELAYED_TOTAL.inc_by(report.bytes as u64);
                LAST_SUCCESS_TIMESTAMP_SECONDS.set(chrono::Utc::now().timestamp());
                tracing::info!(
                    version = %report.version,
                    name = %report.name,
                    bytes = report.bytes,
                    destination = self.destination.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backup cycle completed"
                );
                Ok(report)
            }
            Err(error) => {
                CYCLES_TOTAL.with_label_values(&["failure"]).inc();
                tracing::error!(%error, kind = error.kind(), "Backup cycle failed");
                Err(error)
            }
        }
    }

    /// Apply the failure policy to a cycle result
    fn settle(&self, result: Result<CycleReport>) -> Result<()> {
        match result {
            Ok(_) => Ok(()),
            Err(error) => match (self.settings.mode, self.settings.on_failure) {
                (RunMode::Daemon, FailurePolicy::Continue) => {
                    tracing::warn!("Waiting for the next tick after failed cycle");
                    Ok(())
                }
                _ => Err(error),
            },
        }
    }

    /// Run immediately, then on every interval until `shutdown` resolves
    ///
    /// `shutdown` is only observed between cycles; a cycle in flight always
    /// runs to completion or failure first.
    ///
    /// # Errors
    /// Returns the failed cycle's error in oneshot mode, and in daemon mode
    /// when the failure policy is `exit`
    pub async fn run<F>(&self, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tracing::info!("Running initial backup");
        self.settle(self.run_recorded().await)?;

        if self.settings.mode == RunMode::Oneshot {
            tracing::info!("Oneshot selected, exiting");
            return Ok(RunOutcome::Completed);
        }

        let interval = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Received interrupt. Stopping.");
                    return Ok(RunOutcome::Interrupted);
                }
                _ = ticker.tick() => {
                    tracing::info!("Running periodic backup");
                    self.settle(self.run_recorded().await)?;
                }
            }
        }
    }
}
