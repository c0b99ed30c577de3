//! Client configuration
//!
//! Configuration is loaded from a TOML document or from environment
//! variables and validated before a transport is built.
//!
//! # Example
//!
//! ```
//! use agora_transport::config::ClientConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_toml_str(
//!     r#"
//!     base_url = "https://agora.example"
//!
//!     [observability]
//!     log_level = "debug"
//!     "#,
//! )?;
//!
//! assert_eq!(config.api_prefix, "/api/v1");
//! assert_eq!(config.csrf.header, "X-CSRF-Token");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration error
#[derive(Debug)]
pub enum ConfigError {
    /// Environment variable not set
    EnvVarNotSet(String),
    /// Configuration validation failed
    ValidationError(String),
    /// Failed to parse configuration
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvVarNotSet(var) => write!(f, "Environment variable not set: {var}"),
            Self::ValidationError(msg) => write!(f, "Configuration validation failed: {msg}"),
            Self::ParseError(msg) => write!(f, "Failed to parse configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Anti-forgery token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Path of the token endpoint, relative to the API prefix
    pub path: String,
    /// Header carrying the token on mutating requests
    pub header: String,
    /// Mutating paths that never carry a token
    pub exempt_paths: Vec<String>,
}

impl CsrfConfig {
    /// Whether `path` is exempt from the token requirement.
    ///
    /// Query strings are ignored.
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.exempt_paths.iter().any(|exempt| exempt == path)
    }

    /// Validate token configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "csrf.path must start with '/'".to_string(),
            ));
        }
        if self.header.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "csrf.header must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            path: "/auth/csrf".to_string(),
            header: "X-CSRF-Token".to_string(),
            exempt_paths: vec![
                "/auth/login".to_string(),
                "/auth/register".to_string(),
                "/auth/password-reset/redeem".to_string(),
            ],
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name reported on exported spans
    pub service_name: String,
    /// Jaeger agent endpoint; spans are only exported when set
    pub jaeger_endpoint: Option<String>,
    /// Log level or `EnvFilter` directive
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "agora-client".to_string(),
            jaeger_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin of the API server, without a trailing slash
    pub base_url: String,
    /// Prefix every API path is mounted under
    pub api_prefix: String,
    /// Anti-forgery token settings
    pub csrf: CsrfConfig,
    /// Client-side timeout for auxiliary embed fetches, in seconds
    pub embed_timeout_secs: u64,
    /// Default request timeout in seconds; `None` waits indefinitely
    pub request_timeout_secs: Option<u64>,
    /// User agent sent with every request
    pub user_agent: String,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_prefix: "/api/v1".to_string(),
            csrf: CsrfConfig::default(),
            embed_timeout_secs: 5,
            request_timeout_secs: None,
            user_agent: concat!("agora-client/", env!("CARGO_PKG_VERSION")).to_string(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// `AGORA_API_URL` is required. `AGORA_API_PREFIX`,
    /// `AGORA_EMBED_TIMEOUT_SECS`, `AGORA_LOG_LEVEL` and
    /// `AGORA_JAEGER_ENDPOINT` override the defaults when set.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is missing, unparseable, or the result is
    /// invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("AGORA_API_URL")
            .map_err(|_| ConfigError::EnvVarNotSet("AGORA_API_URL".to_string()))?;
        let mut config = Self::new(base_url);

        if let Ok(prefix) = std::env::var("AGORA_API_PREFIX") {
            config.api_prefix = prefix;
        }
        if let Ok(secs) = std::env::var("AGORA_EMBED_TIMEOUT_SECS") {
            config.embed_timeout_secs = secs.parse().map_err(|_| {
                ConfigError::ParseError(format!("AGORA_EMBED_TIMEOUT_SECS: {secs}"))
            })?;
        }
        if let Ok(level) = std::env::var("AGORA_LOG_LEVEL") {
            config.observability.log_level = level;
        }
        if let Ok(endpoint) = std::env::var("AGORA_JAEGER_ENDPOINT") {
            config.observability.jaeger_endpoint = Some(endpoint);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or the result is invalid
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "api_prefix must be empty or start with '/'".to_string(),
            ));
        }
        if self.embed_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "embed_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        self.csrf.validate()
    }

    /// Absolute URL of an API path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/'),
            path
        )
    }

    /// Embed fetch timeout as Duration
    #[must_use]
    pub const fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    /// Default request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
