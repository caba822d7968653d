//! Destination drive uploads
//!
//! Handles:
//! - OneDrive app folder uploads (Microsoft Graph)
//! - Google Drive folder uploads
//!
//! Folder lookup and creation belong to each destination, not to the cycle.

mod google_drive;
mod onedrive;

pub use google_drive::GoogleDrive;
pub use onedrive::OneDrive;

use std::future::Future;

use crate::config::{DestinationConfig, DestinationKind};
use crate::error::Result;
use crate::http::RetryingClient;
use crate::naming::SanitizedName;

/// Storage that receives one backup per cycle
pub trait Destination {
    /// Short label for logs
    fn name(&self) -> &'static str;

    /// Store `body` under `name`, replacing any existing file
    fn upload(
        &self,
        name: &SanitizedName,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Destination chosen by `destination.kind`
pub enum DestinationClient {
    OneDrive(OneDrive),
    GoogleDrive(GoogleDrive),
}

impl DestinationClient {
    /// Build the configured destination
    ///
    /// # Errors
    /// Returns error if the destination's credential files cannot be read
    pub fn from_config(http: RetryingClient, config: &DestinationConfig) -> Result<Self> {
        match config.kind {
            DestinationKind::Onedrive => Ok(Self::OneDrive(OneDrive::new(http, &config.onedrive))),
            DestinationKind::GoogleDrive => Ok(Self::GoogleDrive(GoogleDrive::from_config(
                http,
                &config.google_drive,
            )?)),
        }
    }
}

impl Destination for DestinationClient {
    fn name(&self) -> &'static str {
        match self {
            Self::OneDrive(inner) => inner.name(),
            Self::GoogleDrive(inner) => inner.name(),
        }
    }

    async fn upload(&self, name: &SanitizedName, body: Vec<u8>) -> Result<()> {
        match self {
            Self::OneDrive(inner) => inner.upload(name, body).await,
            Self::GoogleDrive(inner) => inner.upload(name, body).await,
        }
    }
}
