use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Google OAuth and Calendar settings
    #[serde(default)]
    pub google: GoogleConfig,

    /// Token persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Trip sharing settings
    #[serde(default)]
    pub sharing: SharingConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1";

/// Google OAuth + Calendar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client ID from the Google Cloud Console
    pub client_id: String,

    /// Client secret. Installed-app clients using PKCE may leave this unset.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Loopback redirect URI registered for the client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Scopes to request
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,

    /// Calendar that synced events are written to
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    /// Time zone attached to every event start/end
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// How long to wait for the browser to hit the callback, in seconds
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8765/callback".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/calendar".to_string(),
        "https://www.googleapis.com/auth/calendar.events".to_string(),
    ]
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_calendar_api_base() -> String {
    GOOGLE_CALENDAR_API_BASE.to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_callback_timeout_secs() -> u64 {
    300
}

impl GoogleConfig {
    /// Check if credentials are configured (not placeholders)
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_id.starts_with("YOUR_")
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: "YOUR_GOOGLE_CLIENT_ID".to_string(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            calendar_api_base: default_calendar_api_base(),
            calendar_id: default_calendar_id(),
            time_zone: default_time_zone(),
            callback_timeout_secs: default_callback_timeout_secs(),
        }
    }
}

/// Where OAuth tokens are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    /// JSON file under `<config_dir>/tokens`
    #[default]
    File,
    /// System keyring
    Keyring,
    /// Process memory only (nothing survives a restart)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: TokenBackend,

    /// Namespace the three token keys live under
    #[serde(default = "default_token_namespace")]
    pub namespace: String,
}

fn default_token_namespace() -> String {
    "google_calendar".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: TokenBackend::default(),
            namespace: default_token_namespace(),
        }
    }
}

/// Document store used for sharing grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingBackend {
    Memory,
    Firestore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharingConfig {
    /// Unset means Firestore when `[sharing.firestore]` is present, memory otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<SharingBackend>,

    /// Collection holding one grant document per shared trip
    #[serde(default = "default_grants_collection")]
    pub grants_collection: String,

    /// Collection holding trip documents
    #[serde(default = "default_trips_collection")]
    pub trips_collection: String,

    /// SQLite file (relative to config_dir) with the last shared-trip lookups
    #[serde(default = "default_cache_file")]
    pub cache_file: String,

    #[serde(default)]
    pub firestore: Option<FirestoreConfig>,
}

fn default_grants_collection() -> String {
    "sharedTrips".to_string()
}

fn default_trips_collection() -> String {
    "trips".to_string()
}

fn default_cache_file() -> String {
    "shared_trips.db".to_string()
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            backend: None,
            grants_collection: default_grants_collection(),
            trips_collection: default_trips_collection(),
            cache_file: default_cache_file(),
            firestore: None,
        }
    }
}

impl SharingConfig {
    /// Backend actually used for grants
    pub fn effective_backend(&self) -> SharingBackend {
        match (self.backend, &self.firestore) {
            (Some(backend), _) => backend,
            (None, Some(_)) => SharingBackend::Firestore,
            (None, None) => SharingBackend::Memory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    pub project_id: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_firestore_base")]
    pub base_url: String,

    /// Poll interval backing change listeners, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_firestore_base() -> String {
    FIRESTORE_API_BASE.to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wayfare")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            google: GoogleConfig::default(),
            storage: StorageConfig::default(),
            sharing: SharingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating a default file if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Validate and log warnings, failing when any error is present
    pub fn ensure_valid(&self) -> Result<ValidationResult> {
        let validation = self.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(validation)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.google.auth_url, "google.auth_url", &mut result);
        self.validate_url(&self.google.token_url, "google.token_url", &mut result);
        self.validate_url(
            &self.google.calendar_api_base,
            "google.calendar_api_base",
            &mut result,
        );
        self.validate_redirect_uri(&mut result);

        if !self.google.is_configured() {
            result.add_warning(
                "google.client_id",
                "Google OAuth not configured - calendar sync will be unavailable",
            );
        }

        if self.google.scopes.is_empty() {
            result.add_error("google.scopes", "At least one OAuth scope is required");
        }

        if self.google.calendar_id.trim().is_empty() {
            result.add_error("google.calendar_id", "Calendar ID must not be empty");
        }

        if self.google.time_zone.trim().is_empty() {
            result.add_error("google.time_zone", "Time zone must not be empty");
        }

        if self.google.callback_timeout_secs == 0 {
            result.add_error(
                "google.callback_timeout_secs",
                "Callback timeout must be greater than 0",
            );
        }

        if self.storage.namespace.trim().is_empty() {
            result.add_error("storage.namespace", "Token namespace must not be empty");
        } else if self
            .storage
            .namespace
            .contains(|c: char| c == '/' || c == '\\' || c == '.')
        {
            result.add_error(
                "storage.namespace",
                "Token namespace must not contain path separators or dots",
            );
        }

        if self.storage.backend == TokenBackend::Memory {
            result.add_warning(
                "storage.backend",
                "Tokens are kept in memory only - you will need to sign in every run",
            );
        }

        match (self.sharing.effective_backend(), &self.sharing.firestore) {
            (SharingBackend::Firestore, None) => {
                result.add_error(
                    "sharing.firestore",
                    "Firestore backend selected but [sharing.firestore] is missing",
                );
            }
            (SharingBackend::Firestore, Some(fs)) => {
                if fs.project_id.trim().is_empty() {
                    result.add_error("sharing.firestore.project_id", "Project ID must not be empty");
                }
                self.validate_url(&fs.base_url, "sharing.firestore.base_url", &mut result);
                if fs.poll_interval_secs == 0 {
                    result.add_warning(
                        "sharing.firestore.poll_interval_secs",
                        "Poll interval of 0 is raised to 1 second",
                    );
                }
            }
            (SharingBackend::Memory, _) => {
                result.add_warning(
                    "sharing.backend",
                    "Sharing grants are kept in memory only and are lost when the process exits; add [sharing.firestore] to persist them",
                );
            }
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// The redirect URI must be a loopback http URL with an explicit port,
    /// since the callback server binds to it.
    fn validate_redirect_uri(&self, result: &mut ValidationResult) {
        let field = "google.redirect_uri";
        match Url::parse(&self.google.redirect_uri) {
            Ok(url) => {
                if url.scheme() != "http" {
                    result.add_error(field, "Redirect URI must use http (loopback)");
                }
                match url.host_str() {
                    Some("127.0.0.1") | Some("localhost") | Some("[::1]") => {}
                    _ => result.add_error(field, "Redirect URI must point at a loopback host"),
                }
                match url.port() {
                    Some(0) | None => {
                        result.add_error(field, "Redirect URI must include a non-zero port")
                    }
                    Some(_) => {}
                }
            }
            Err(e) => result.add_error(field, format!("Invalid URL: {}", e)),
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("wayfare");

        Ok(config_dir.join("config.toml"))
    }

    /// Absolute path of the shared-trip cache database
    pub fn sharing_cache_path(&self) -> PathBuf {
        self.config_dir.join(&self.sharing.cache_file)
    }

    /// Directory holding file-backed token namespaces
    pub fn tokens_dir(&self) -> PathBuf {
        self.config_dir.join("tokens")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        // Default config should be valid (only warnings, no errors)
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_google_not_configured_is_warning() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "google.client_id"));
    }

    #[test]
    fn test_invalid_token_url_scheme() {
        let mut config = Config::default();
        config.google.token_url = "ftp://oauth2.googleapis.com/token".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_redirect_uri_must_be_loopback_with_port() {
        let mut config = Config::default();
        config.google.redirect_uri = "https://auth.example.com/callback".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "google.redirect_uri"));

        config.google.redirect_uri = "http://localhost/callback".to_string();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.message.contains("port")));
    }

    #[test]
    fn test_firestore_backend_requires_section() {
        let mut config = Config::default();
        config.sharing.backend = Some(SharingBackend::Firestore);
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "sharing.firestore"));
    }

    fn firestore_section(poll_interval_secs: u64) -> FirestoreConfig {
        FirestoreConfig {
            project_id: "wayfare-test".to_string(),
            api_key: None,
            base_url: default_firestore_base(),
            poll_interval_secs,
        }
    }

    #[test]
    fn test_firestore_section_selects_firestore_backend() {
        let mut config = Config::default();
        assert_eq!(config.sharing.effective_backend(), SharingBackend::Memory);
        let result = config.validate();
        assert!(result
            .warnings
            .iter()
            .any(|w| w.field == "sharing.backend" && w.message.contains("lost when the process exits")));

        config.sharing.firestore = Some(firestore_section(30));
        assert_eq!(config.sharing.effective_backend(), SharingBackend::Firestore);
        let result = config.validate();
        assert!(result.is_valid());
        assert!(!result.warnings.iter().any(|w| w.field == "sharing.backend"));

        config.sharing.backend = Some(SharingBackend::Memory);
        assert_eq!(config.sharing.effective_backend(), SharingBackend::Memory);
    }

    #[test]
    fn test_zero_poll_interval_warns_about_clamp() {
        let mut config = Config::default();
        config.sharing.firestore = Some(firestore_section(0));
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| {
            w.field == "sharing.firestore.poll_interval_secs" && w.message.contains("1 second")
        }));
    }

    #[test]
    fn test_namespace_rejects_path_separators() {
        let mut config = Config::default();
        config.storage.namespace = "../escape".to_string();
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "storage.namespace"));
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.google.calendar_id, "primary");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            config_dir = "/tmp/wayfare-test"

            [google]
            client_id = "123.apps.googleusercontent.com"

            [storage]
            backend = "keyring"
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert!(config.google.is_configured());
        assert_eq!(config.google.time_zone, "UTC");
        assert_eq!(config.storage.backend, TokenBackend::Keyring);
        assert_eq!(config.storage.namespace, "google_calendar");
        assert_eq!(config.sharing.grants_collection, "sharedTrips");
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }

    #[test]
    fn test_ensure_valid() {
        let mut config = Config::default();
        assert!(config.ensure_valid().is_ok());

        config.google.calendar_id = "  ".to_string();
        let err = config.ensure_valid().unwrap_err();
        assert!(err.to_string().contains("google.calendar_id"));
    }
}
