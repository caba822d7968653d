//! OneDrive uploads via Microsoft Graph
//!
//! Files land in the application's special folder, so the registration only
//! needs access to its own app folder:
//! <https://docs.microsoft.com/en-us/onedrive/developer/rest-api/concepts/special-folders-appfolder>

use reqwest::StatusCode;
use serde::Deserialize;

use super::Destination;
use crate::config::{OneDriveConfig, Secret};
use crate::error::{RelayError, Result};
use crate::http::RetryingClient;
use crate::naming::SanitizedName;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OneDrive destination using the client credentials flow
pub struct OneDrive {
    http: RetryingClient,
    tenant_id: String,
    client_id: String,
    client_secret: Secret,
    authority_url: String,
    graph_url: String,
}

impl OneDrive {
    pub fn new(http: RetryingClient, config: &OneDriveConfig) -> Self {
        Self {
            http,
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authority_url: config.authority_url.trim_end_matches('/').to_string(),
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_url, self.tenant_id)
    }

    /// Simple upload URL for `name` inside the app folder
    ///
    /// Each segment is percent-encoded; separators are kept.
    pub fn upload_url(&self, name: &SanitizedName) -> String {
        let path = name
            .segments()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/drive/special/approot:/{}:/content", self.graph_url, path)
    }

    /// Request an app-only Graph token
    async fn access_token(&self) -> Result<String> {
        let url = self.token_url();
        let request = self
            .http
            .client()
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
                ("scope", GRAPH_SCOPE),
                ("grant_type", "client_credentials"),
            ])
            .build()
            .map_err(|source| RelayError::Transport {
                url: url.clone(),
                source,
            })?;

        let response = self.http.execute(request).await?;
        let token: TokenResponse = response.json().await.map_err(|e| {
            RelayError::Upload(format!("could not read an Azure AD auth token from {}: {}", url, e))
        })?;
        Ok(token.access_token)
    }
}

impl Destination for OneDrive {
    fn name(&self) -> &'static str {
        "onedrive"
    }

    async fn upload(&self, name: &SanitizedName, body: Vec<u8>) -> Result<()> {
        let token = self.access_token().await?;
        let url = self.upload_url(name);

        let request = self
            .http
            .client()
            .put(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .build()
            .map_err(|source| RelayError::Transport {
                url: url.clone(),
                source,
            })?;

        let response = self.http.execute(request).await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                tracing::debug!(url = %url, status = %response.status(), "OneDrive upload accepted");
                Ok(())
            }
            status => Err(RelayError::Upload(format!(
                "got unexpected response code {} from {}",
                status, url
            ))),
        }
    }
}
