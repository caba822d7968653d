//! Backup catalog selection
//!
//! The source API advertises backups as `{version, url}` pairs where the
//! version is a minute-resolution timestamp such as `2018-07-13 02:05`.
//! See <https://developer.todoist.com/sync/v8/#get-backups>.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Timestamp format of candidate versions (no timezone)
pub const VERSION_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One backup artifact advertised by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCandidate {
    /// Timestamp label, e.g. "2018-07-13 02:05"
    pub version: String,
    /// Fetch location of the artifact
    pub url: String,
}

impl BackupCandidate {
    pub fn new(version: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            url: url.into(),
        }
    }

    /// Parse the version label
    pub fn timestamp(&self) -> Result<NaiveDateTime, CatalogError> {
        NaiveDateTime::parse_from_str(&self.version, VERSION_FORMAT).map_err(|e| {
            CatalogError::BadVersion {
                version: self.version.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Pick the candidate with the latest version
///
/// Scans in input order and fails fast: the first blank URL or unparsable
/// version rejects the whole set. On equal timestamps the earlier candidate
/// is kept.
pub fn select_latest(candidates: &[BackupCandidate]) -> Result<BackupCandidate, CatalogError> {
    let mut latest: Option<(NaiveDateTime, &BackupCandidate)> = None;

    for candidate in candidates {
        if candidate.url.is_empty() {
            return Err(CatalogError::MissingLocation {
                version: candidate.version.clone(),
            });
        }

        let timestamp = candidate.timestamp()?;
        match latest {
            Some((best, _)) if timestamp <= best => {}
            _ => latest = Some((timestamp, candidate)),
        }
    }

    latest
        .map(|(_, candidate)| candidate.clone())
        .ok_or(CatalogError::Empty)
}
