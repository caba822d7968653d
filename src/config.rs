//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. The YAML file passed with `--config`
//! 3. Environment variables (override, `BACKUP_RELAY__SECTION__KEY`)

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::http::RetryPolicy;

/// Default source catalog endpoint (Todoist sync API)
pub const DEFAULT_CATALOG_URL: &str = "https://api.todoist.com/sync/v9/backups/get";

/// OneDrive simple upload accepts up to 4MB
/// <https://docs.microsoft.com/en-us/onedrive/developer/rest-api/api/driveitem_put_content>
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 4_000_000;

pub const DEFAULT_MAX_CATALOG_BYTES: u64 = 5_000_000;

lazy_static! {
    static ref DURATION_RE: Regex =
        Regex::new(r"^(?:[0-9]+(?:\.[0-9]+)?(?:ns|us|µs|ms|s|m|h))+$").expect("valid regex");
    static ref DURATION_PART_RE: Regex =
        Regex::new(r"([0-9]+(?:\.[0-9]+)?)(ns|us|µs|ms|s|m|h)").expect("valid regex");
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// How often to run a backup, e.g. "3h" or "1h30m"
    pub backup_interval: String,
    /// Run one cycle and exit
    #[serde(default)]
    pub oneshot: bool,
    /// What the daemon does when a cycle fails
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// Daemon reaction to a failed cycle
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the process with the cycle's error
    #[default]
    Exit,
    /// Log the error and wait for the next tick
    Continue,
}

/// Source API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Bearer token for the source API
    pub api_token: Secret,
    /// Catalog endpoint returning `[{version, url}]`
    pub catalog_url: String,
    /// Cap on a single backup payload
    pub max_payload_bytes: u64,
    /// Cap on the catalog response body
    pub max_catalog_bytes: u64,
    /// Per-request timeout, e.g. "60s"
    pub request_timeout: String,
    pub retry: RetryConfig,
}

/// Retry settings for source requests
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Wait between resends, e.g. "10m"
    pub interval: String,
    /// Resends allowed after the first attempt
    pub max_retries: u32,
}

/// Destination selector
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Onedrive,
    GoogleDrive,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Onedrive => f.write_str("onedrive"),
            DestinationKind::GoogleDrive => f.write_str("google_drive"),
        }
    }
}

/// Destination configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub kind: DestinationKind,
    /// Folder path the backups are written under
    pub path_prefix: String,
    /// Appended to the version label, e.g. ".zip"
    pub file_suffix: String,
    #[serde(default)]
    pub onedrive: OneDriveConfig,
    #[serde(default)]
    pub google_drive: GoogleDriveConfig,
}

/// Microsoft Graph credentials (client credentials flow)
///
/// The app registration must be single tenant, otherwise token requests
/// hit unsupported authority paths.
#[derive(Debug, Clone, Deserialize)]
pub struct OneDriveConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Secret,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
}

impl Default for OneDriveConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: Secret::default(),
            authority_url: default_authority_url(),
            graph_url: default_graph_url(),
        }
    }
}

fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_graph_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

/// Google Drive configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleDriveConfig {
    /// Token file written by the OAuth authorization flow
    pub token_path: Option<PathBuf>,
    /// OAuth client file exported from the Google Cloud console
    pub credentials_path: Option<PathBuf>,
    /// Folder at the drive root holding the backups (created if missing)
    #[serde(default)]
    pub folder_name: String,
    #[serde(default = "default_drive_api_url")]
    pub api_url: String,
    #[serde(default = "default_drive_upload_url")]
    pub upload_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            token_path: None,
            credentials_path: None,
            folder_name: String::new(),
            api_url: default_drive_api_url(),
            upload_url: default_drive_upload_url(),
            token_url: default_google_token_url(),
        }
    }
}

fn default_drive_api_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_drive_upload_url() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    /// Address for `/metrics`, e.g. "127.0.0.1:9464"; disabled when unset
    pub bind: Option<String>,
}

/// String that never shows up in `Debug` output
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(\"\")")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file and the environment
    ///
    /// # Errors
    /// Returns error if the file is unreadable or the configuration is invalid
    pub fn load(path: &Path) -> Result<Self> {
        use config::{File, FileFormat};

        Self::from_source(File::from(path).format(FileFormat::Yaml))
    }

    /// Load configuration from YAML text (environment overrides still apply)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        use config::{File, FileFormat};

        Self::from_source(File::from_str(yaml, FileFormat::Yaml))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        use config::{Config, Environment};

        let config = Config::builder()
            // Start with default values
            .set_default("general.backup_interval", "")?
            .set_default("general.oneshot", false)?
            .set_default("general.on_failure", "exit")?
            .set_default("source.catalog_url", DEFAULT_CATALOG_URL)?
            .set_default("source.max_payload_bytes", DEFAULT_MAX_PAYLOAD_BYTES as i64)?
            .set_default("source.max_catalog_bytes", DEFAULT_MAX_CATALOG_BYTES as i64)?
            .set_default("source.request_timeout", "60s")?
            .set_default("source.retry.interval", "10m")?
            .set_default("source.retry.max_retries", 6)?
            .set_default("destination.kind", "onedrive")?
            .set_default("destination.path_prefix", "backups")?
            .set_default("destination.file_suffix", ".zip")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(source)
            .add_source(
                Environment::with_prefix("BACKUP_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Check settings before any network activity
    pub fn validate(&self) -> Result<()> {
        if self.source.api_token.is_blank() {
            return Err(RelayError::Config(
                "source.api_token: must include an API key for the source service".to_string(),
            ));
        }

        if self.general.backup_interval.trim().is_empty() {
            return Err(RelayError::Config(
                "general.backup_interval: a backup interval is required".to_string(),
            ));
        }
        let interval = self.backup_interval()?;
        if interval.is_zero() {
            return Err(RelayError::Config(
                "general.backup_interval: the backup interval must be greater than zero"
                    .to_string(),
            ));
        }

        self.retry_policy()?;
        if self.request_timeout()?.is_zero() {
            return Err(RelayError::Config(
                "source.request_timeout must be greater than zero".to_string(),
            ));
        }

        validate_http_url("source.catalog_url", &self.source.catalog_url)?;

        if self.source.max_payload_bytes == 0 {
            return Err(RelayError::Config(
                "source.max_payload_bytes must be greater than 0".to_string(),
            ));
        }
        if self.source.max_catalog_bytes == 0 {
            return Err(RelayError::Config(
                "source.max_catalog_bytes must be greater than 0".to_string(),
            ));
        }

        match self.destination.kind {
            DestinationKind::Onedrive => self.destination.onedrive.validate()?,
            DestinationKind::GoogleDrive => self.destination.google_drive.validate()?,
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(RelayError::Config(format!(
                "logging.format must be \"pretty\" or \"json\" (got {:?})",
                self.logging.format
            )));
        }

        if let Some(bind) = self.metrics.bind.as_deref() {
            bind.parse::<SocketAddr>().map_err(|e| {
                RelayError::Config(format!("metrics.bind {:?} is not a socket address: {}", bind, e))
            })?;
        }

        Ok(())
    }

    /// Parsed `general.backup_interval`
    pub fn backup_interval(&self) -> Result<Duration> {
        parse_duration(&self.general.backup_interval).map_err(|reason| {
            RelayError::Config(format!(
                "general.backup_interval: the backup interval must be a valid duration, e.g., 3h ({})",
                reason
            ))
        })
    }

    /// Retry policy for source requests
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let interval = parse_duration(&self.source.retry.interval).map_err(|reason| {
            RelayError::Config(format!("source.retry.interval: {}", reason))
        })?;
        Ok(RetryPolicy {
            interval,
            max_retries: self.source.retry.max_retries,
        })
    }

    /// Parsed `source.request_timeout`
    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(&self.source.request_timeout)
            .map_err(|reason| RelayError::Config(format!("source.request_timeout: {}", reason)))
    }
}

impl OneDriveConfig {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("tenant_id", self.tenant_id.trim().is_empty()),
            ("client_id", self.client_id.trim().is_empty()),
            ("client_secret", self.client_secret.is_blank()),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, missing)| *missing) {
            return Err(RelayError::Config(format!(
                "the OneDrive config must include the field: destination.onedrive.{}",
                field
            )));
        }
        validate_http_url("destination.onedrive.authority_url", &self.authority_url)?;
        validate_http_url("destination.onedrive.graph_url", &self.graph_url)?;
        Ok(())
    }
}

impl GoogleDriveConfig {
    fn validate(&self) -> Result<()> {
        if self.folder_name.trim().is_empty() {
            return Err(RelayError::Config(
                "destination.google_drive.folder_name is required".to_string(),
            ));
        }
        let token_path = self.token_path.as_deref().ok_or_else(|| {
            RelayError::Config("destination.google_drive.token_path is required".to_string())
        })?;
        if !token_path.is_file() {
            return Err(RelayError::Config(format!(
                "destination.google_drive.token_path: cannot find a file at {}",
                token_path.display()
            )));
        }
        if let Some(credentials_path) = self.credentials_path.as_deref() {
            if !credentials_path.is_file() {
                return Err(RelayError::Config(format!(
                    "destination.google_drive.credentials_path: cannot find a file at {}",
                    credentials_path.display()
                )));
            }
        }
        validate_http_url("destination.google_drive.api_url", &self.api_url)?;
        validate_http_url("destination.google_drive.upload_url", &self.upload_url)?;
        validate_http_url("destination.google_drive.token_url", &self.token_url)?;
        Ok(())
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| RelayError::Config(format!("{} {:?} is not a valid URL: {}", key, value, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RelayError::Config(format!(
            "{} must use http or https (got {:?})",
            key,
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Parse a duration string like "3h", "1h30m" or "250ms"
///
/// Units: ns, us (or µs), ms, s, m, h. At least one unit group is required;
/// bare numbers are rejected.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if !DURATION_RE.is_match(input) {
        return Err(format!(
            "invalid duration {:?}; expected e.g. 3h, 45m or 1h30m (units: ns, us, ms, s, m, h)",
            input
        ));
    }

    let mut total = 0f64;
    for part in DURATION_PART_RE.captures_iter(input) {
        let value: f64 = part[1]
            .parse()
            .map_err(|e| format!("invalid number {:?}: {}", &part[1], e))?;
        let unit_secs = match &part[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            other => return Err(format!("unsupported unit {:?}", other)),
        };
        total += value * unit_secs;
    }

    Duration::try_from_secs_f64(total).map_err(|e| format!("duration {:?} out of range: {}", input, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
general:
  backup_interval: 3h
source:
  api_token: 123abc123abc123abc
destination:
  kind: onedrive
  onedrive:
    tenant_id: tenant
    client_id: client
    client_secret: secret
"#;

    fn valid_config() -> AppConfig {
        AppConfig::from_yaml_str(VALID).unwrap()
    }

    fn config_error(config: &AppConfig) -> String {
        match config.validate().expect_err("config must be rejected") {
            RelayError::Config(message) => message,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn loads_defaults_around_required_fields() {
        let config = valid_config();
        assert_eq!(config.backup_interval().unwrap(), Duration::from_secs(3 * 3600));
        assert_eq!(config.source.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.source.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
        assert_eq!(config.retry_policy().unwrap(), RetryPolicy::default());
        assert_eq!(config.general.on_failure, FailurePolicy::Exit);
        assert!(!config.general.oneshot);
        assert_eq!(config.destination.path_prefix, "backups");
        assert_eq!(config.destination.file_suffix, ".zip");
        assert_eq!(
            config.destination.onedrive.graph_url,
            "https://graph.microsoft.com/v1.0"
        );
        assert!(config.metrics.bind.is_none());
    }

    #[test]
    fn missing_interval_is_reported_by_validation() {
        let yaml = VALID.replace("  backup_interval: 3h\n", "  oneshot: true\n");
        match AppConfig::from_yaml_str(&yaml) {
            Err(RelayError::Config(message)) => assert!(message.contains("backup interval")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_interval_without_unit() {
        let mut config = valid_config();
        config.general.backup_interval = "3".to_string();
        assert!(config_error(&config).contains("duration"));
    }

    #[test]
    fn rejects_interval_without_number() {
        let mut config = valid_config();
        config.general.backup_interval = "h".to_string();
        assert!(config_error(&config).contains("duration"));
    }

    #[test]
    fn rejects_unsupported_unit() {
        let mut config = valid_config();
        config.general.backup_interval = "1y".to_string();
        assert!(config_error(&config).contains("duration"));
    }

    #[test]
    fn rejects_missing_interval() {
        let mut config = valid_config();
        config.general.backup_interval = String::new();
        assert!(config_error(&config).contains("backup interval"));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut config = valid_config();
        config.general.backup_interval = "0s".to_string();
        assert!(config_error(&config).contains("greater than zero"));
    }

    #[test]
    fn rejects_missing_api_key() {
        let mut config = valid_config();
        config.source.api_token = Secret::new("  ");
        assert!(config_error(&config).contains("API key"));
    }

    #[test]
    fn rejects_missing_onedrive_field() {
        let mut config = valid_config();
        config.destination.onedrive.client_secret = Secret::default();
        assert!(config_error(&config).contains("destination.onedrive.client_secret"));
    }

    #[test]
    fn rejects_google_drive_without_token_file() {
        let mut config = valid_config();
        config.destination.kind = DestinationKind::GoogleDrive;
        config.destination.google_drive.folder_name = "Backups".to_string();
        config.destination.google_drive.token_path = Some(PathBuf::from("/nonexistent/token.json"));
        assert!(config_error(&config).contains("token_path"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let mut config = valid_config();
        config.logging.format = "xml".to_string();
        assert!(config_error(&config).contains("logging.format"));
    }

    #[test]
    fn rejects_bad_metrics_bind() {
        let mut config = valid_config();
        config.metrics.bind = Some("localhost".to_string());
        assert!(config_error(&config).contains("metrics.bind"));
    }

    #[test]
    fn secrets_are_hidden_from_debug_output() {
        let config = valid_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("123abc123abc123abc"));
        assert!(!rendered.contains("\"secret\""));
        assert_eq!(config.source.api_token.expose(), "123abc123abc123abc");
    }

    #[test]
    fn reads_failure_policy_and_retry_settings() {
        let yaml = r#"
general:
  backup_interval: 1h30m
  on_failure: continue
source:
  api_token: token
  retry:
    interval: 30s
    max_retries: 2
destination:
  kind: onedrive
  path_prefix: todoist
  onedrive:
    tenant_id: tenant
    client_id: client
    client_secret: secret
logging:
  format: json
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.general.on_failure, FailurePolicy::Continue);
        assert_eq!(config.backup_interval().unwrap(), Duration::from_secs(5400));
        assert_eq!(
            config.retry_policy().unwrap(),
            RetryPolicy {
                interval: Duration::from_secs(30),
                max_retries: 2,
            }
        );
        assert_eq!(config.destination.path_prefix, "todoist");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("3h").unwrap(), Duration::from_secs(10_800));
        assert_eq!(parse_duration("45m").unwrap(), Duration::from_secs(2_700));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_malformed_durations() {
        for input in ["", "3", "h", "1y", "3d", "-5m", "5 m", "m5", "1h 30m"] {
            assert!(parse_duration(input).is_err(), "{input:?} should be rejected");
        }
    }
}
