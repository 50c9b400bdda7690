//! Client configuration.
//!
//! Maps to a TOML file:
//! ```toml
//! base_url = "https://api.example.com"
//! request_timeout_ms = 30000
//!
//! [auth]
//! refresh_path = "/auth/refresh"
//! safety_margin_ms = 30000
//! refresh_timeout_ms = 10000
//! max_pending = 256
//! detect_in_band_expiry = true
//! expiry_markers = ["jwt expired", "token expired"]
//!
//! [storage]
//! dir = "/var/lib/tollgate"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default timeout for requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens expiring within this margin are treated as already expired.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Upper bound on a single refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of requests parked behind one refresh.
pub const DEFAULT_MAX_PENDING: usize = 256;

/// Default refresh endpoint, relative to the base URL.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Message fragments that mark an in-band expiry on a 2xx response.
pub const DEFAULT_EXPIRY_MARKERS: &[&str] = &["jwt expired", "token expired"];

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the API. Required before a client can be built.
    pub base_url: Option<String>,

    /// Per-request timeout in milliseconds. Must be non-zero.
    pub request_timeout_ms: u64,

    /// Token lifecycle settings.
    pub auth: AuthConfig,

    /// Durable token storage settings.
    pub storage: StorageConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: millis(DEFAULT_REQUEST_TIMEOUT),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Refresh endpoint, relative to the base URL.
    pub refresh_path: String,

    /// Safety margin applied to every expiry check, in milliseconds.
    pub safety_margin_ms: u64,

    /// Upper bound on a refresh call, in milliseconds. Must be non-zero.
    pub refresh_timeout_ms: u64,

    /// Maximum number of requests queued behind an in-flight refresh.
    /// When full, the oldest waiter is rejected.
    pub max_pending: usize,

    /// Also treat 2xx responses carrying an expiry message as expired.
    pub detect_in_band_expiry: bool,

    /// Fragments searched (case-insensitively) in a response `message`.
    pub expiry_markers: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            safety_margin_ms: millis(DEFAULT_SAFETY_MARGIN),
            refresh_timeout_ms: millis(DEFAULT_REFRESH_TIMEOUT),
            max_pending: DEFAULT_MAX_PENDING,
            detect_in_band_expiry: true,
            expiry_markers: DEFAULT_EXPIRY_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the durable token file.
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The configured directory, or the platform data directory.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("tollgate")))
    }
}

impl ClientConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no client can work with.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.auth.refresh_timeout_ms == 0 {
            return Err(Error::Config(
                "auth.refresh_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    /// Set the refresh endpoint path.
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.auth.refresh_path = path.into();
        self
    }

    /// Set the expiry safety margin.
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.auth.safety_margin_ms = millis(margin);
        self
    }

    /// Set the refresh call timeout.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.auth.refresh_timeout_ms = millis(timeout);
        self
    }

    /// Set the pending queue bound.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.auth.max_pending = max;
        self
    }

    /// Replace the in-band expiry markers.
    pub fn with_expiry_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth.expiry_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Only react to HTTP 401, not to expiry messages in 2xx bodies.
    pub fn without_in_band_detection(mut self) -> Self {
        self.auth.detect_in_band_expiry = false;
        self
    }

    /// Set the durable storage directory.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.dir = Some(dir.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.auth.safety_margin_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.auth.refresh_timeout_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.base_url.is_none());
        assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.safety_margin(), Duration::from_secs(30));
        assert_eq!(config.refresh_timeout(), DEFAULT_REFRESH_TIMEOUT);
        assert_eq!(config.auth.refresh_path, "/auth/refresh");
        assert_eq!(config.auth.max_pending, DEFAULT_MAX_PENDING);
        assert!(config.auth.detect_in_band_expiry);
        assert_eq!(
            config.auth.expiry_markers,
            vec!["jwt expired".to_string(), "token expired".to_string()]
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ClientConfig::from_toml(
            r#"
            base_url = "https://api.example.com"

            [auth]
            refresh_path = "/auth/exchange-token"
            safety_margin_ms = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.auth.refresh_path, "/auth/exchange-token");
        assert_eq!(config.safety_margin(), Duration::from_secs(60));
        // untouched fields keep their defaults
        assert_eq!(config.auth.max_pending, DEFAULT_MAX_PENDING);
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_parse_empty_toml() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = ClientConfig::from_toml("base_url = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tollgate.toml");
        std::fs::write(
            &path,
            "base_url = \"http://localhost:9000\"\n[storage]\ndir = \"/tmp/tg\"\n",
        )
        .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.storage.resolve_dir(), Some(PathBuf::from("/tmp/tg")));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load(Path::new("/nonexistent/tollgate.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::new()
            .with_base_url("http://localhost:8080")
            .with_safety_margin(Duration::from_secs(5))
            .with_refresh_timeout(Duration::from_secs(2))
            .with_max_pending(4)
            .with_expiry_markers(["session expired"])
            .without_in_band_detection();

        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.safety_margin(), Duration::from_secs(5));
        assert_eq!(config.refresh_timeout(), Duration::from_secs(2));
        assert_eq!(config.auth.max_pending, 4);
        assert_eq!(config.auth.expiry_markers, vec!["session expired".to_string()]);
        assert!(!config.auth.detect_in_band_expiry);
    }

    #[test]
    fn test_sub_second_durations_are_kept() {
        let config = ClientConfig::new()
            .with_request_timeout(Duration::from_millis(500))
            .with_refresh_timeout(Duration::from_millis(250))
            .with_safety_margin(Duration::from_millis(1500));

        assert_eq!(config.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.refresh_timeout(), Duration::from_millis(250));
        assert_eq!(config.safety_margin(), Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let err = ClientConfig::from_toml("request_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("request_timeout_ms")));

        let err = ClientConfig::from_toml("[auth]\nrefresh_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("refresh_timeout_ms")));

        let config = ClientConfig::new().with_refresh_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
