//! Google Drive uploads
//!
//! Backups are stored in a single folder at the drive root. The folder is
//! looked up by name and created on first use.

use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use super::Destination;
use crate::config::GoogleDriveConfig;
use crate::error::{RelayError, Result};
use crate::http::RetryingClient;
use crate::naming::SanitizedName;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Token file produced by the OAuth authorization flow
#[derive(Debug, Clone, Deserialize)]
struct StoredToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth client file; either section may be present
#[derive(Debug, Clone, Deserialize)]
struct ClientCredentialsFile {
    installed: Option<ClientCredentials>,
    web: Option<ClientCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

/// Google Drive destination
pub struct GoogleDrive {
    http: RetryingClient,
    token: StoredToken,
    credentials: Option<ClientCredentials>,
    folder_name: String,
    api_url: String,
    upload_url: String,
    token_url: String,
}

impl GoogleDrive {
    /// Read the token and client files named in the configuration
    ///
    /// # Errors
    /// Returns error if a file is missing or malformed, or if the token can
    /// be refreshed but no client credentials were given
    pub fn from_config(http: RetryingClient, config: &GoogleDriveConfig) -> Result<Self> {
        let token_path = config.token_path.as_deref().ok_or_else(|| {
            RelayError::Config("destination.google_drive.token_path is required".to_string())
        })?;
        let token: StoredToken = read_json(token_path)?;

        let credentials = match config.credentials_path.as_deref() {
            Some(path) => {
                let file: ClientCredentialsFile = read_json(path)?;
                Some(file.installed.or(file.web).ok_or_else(|| {
                    RelayError::Config(format!(
                        "{} has neither an \"installed\" nor a \"web\" client section",
                        path.display()
                    ))
                })?)
            }
            None => None,
        };

        if token.refresh_token.is_some() && credentials.is_none() {
            return Err(RelayError::Config(
                "destination.google_drive.credentials_path is required to refresh the stored token"
                    .to_string(),
            ));
        }

        Ok(Self {
            http,
            token,
            credentials,
            folder_name: config.folder_name.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
        })
    }

    /// Fresh access token, refreshed when a refresh token is stored
    async fn access_token(&self) -> Result<String> {
        let (Some(refresh_token), Some(credentials)) =
            (self.token.refresh_token.as_deref(), self.credentials.as_ref())
        else {
            return Ok(self.token.access_token.clone());
        };

        let request = self
            .http
            .client()
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .build()
            .map_err(|source| RelayError::Transport {
                url: self.token_url.clone(),
                source,
            })?;

        let response = self.http.execute(request).await?;
        let refreshed: RefreshResponse = response.json().await.map_err(|e| {
            RelayError::Upload(format!(
                "could not read a refreshed token from {}: {}",
                self.token_url, e
            ))
        })?;
        Ok(refreshed.access_token)
    }

    /// Id of the backup folder, creating it if needed
    async fn folder_id(&self, token: &str) -> Result<String> {
        let url = format!("{}/files", self.api_url);
        let query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query_value(&self.folder_name),
            FOLDER_MIME_TYPE
        );
        let request = self
            .http
            .client()
            .get(&url)
            .bearer_auth(token)
            .query(&[("q", query.as_str()), ("fields", "files(id)")])
            .build()
            .map_err(|source| RelayError::Transport {
                url: url.clone(),
                source,
            })?;

        let listing: FileList = self
            .http
            .execute(request)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::Upload(format!("could not read folder listing from {}: {}", url, e)))?;

        match listing.files.as_slice() {
            [] => self.create_folder(token).await,
            [folder] => Ok(folder.id.clone()),
            many => Err(RelayError::Upload(format!(
                "unexpected number of backup folders: {} folders named {:?}",
                many.len(),
                self.folder_name
            ))),
        }
    }

    async fn create_folder(&self, token: &str) -> Result<String> {
        let url = format!("{}/files", self.api_url);
        let request = self
            .http
            .client()
            .post(&url)
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&json!({ "name": self.folder_name, "mimeType": FOLDER_MIME_TYPE }))
            .build()
            .map_err(|source| RelayError::Transport {
                url: url.clone(),
                source,
            })?;

        let created: DriveFile = self
            .http
            .execute(request)
            .await?
            .json()
            .await
            .map_err(|e| RelayError::Upload(format!("could not read created folder from {}: {}", url, e)))?;

        tracing::info!(folder = %self.folder_name, id = %created.id, "Created Google Drive folder");
        Ok(created.id)
    }
}

impl Destination for GoogleDrive {
    fn name(&self) -> &'static str {
        "google_drive"
    }

    async fn upload(&self, name: &SanitizedName, body: Vec<u8>) -> Result<()> {
        let token = self.access_token().await?;
        let folder_id = self.folder_id(&token).await?;

        let content_type = content_type_for(name.file_name());
        let metadata = json!({
            "name": name.file_name(),
            "mimeType": content_type,
            "parents": [folder_id],
        });
        let (boundary, payload) = multipart_related(&metadata, content_type, &body);

        let url = format!("{}/files", self.upload_url);
        let request = self
            .http
            .client()
            .post(&url)
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(payload)
            .build()
            .map_err(|source| RelayError::Transport {
                url: url.clone(),
                source,
            })?;

        self.http.execute(request).await?;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path).map_err(|e| {
        RelayError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&data)
        .map_err(|e| RelayError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

/// Media type for a backup file, from its extension
fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Escape a value for a Drive `q` string literal
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build a `multipart/related` body with a JSON metadata part and a media part
///
/// The boundary is chosen so that it does not occur in the media bytes.
fn multipart_related(
    metadata: &serde_json::Value,
    media_type: &str,
    media: &[u8],
) -> (String, Vec<u8>) {
    let seed = format!(
        "backup-relay-{:x}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let boundary = unique_boundary(seed, media);

    let mut body = Vec::with_capacity(media.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", media_type).as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    (boundary, body)
}

fn unique_boundary(mut boundary: String, media: &[u8]) -> String {
    while media
        .windows(boundary.len())
        .any(|window| window == boundary.as_bytes())
    {
        boundary.push('x');
    }
    boundary
}
