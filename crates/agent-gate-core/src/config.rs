//! Startup configuration.
//!
//! Loaded once from TOML and handed to components by value. Every section
//! and field is optional in the file; missing values take the defaults below.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub sessions: SessionManagerConfig,
    pub security: SecurityConfig,
}

impl GateConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is malformed or a limit is invalid.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sessions.validate()?;
        self.security.audit.validate()
    }
}

/// Session manager limits. Immutable once the manager is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// Maximum sessions held at once, across all clients.
    pub max_sessions: usize,
    /// Session time-to-live from creation or extension.
    pub ttl_ms: u64,
    /// Period of the expiry reaper.
    pub cleanup_interval_ms: u64,
    /// Maximum sessions held at once by one client.
    pub per_client_session_limit: usize,
    /// Whether clients may create sessions usable by other clients.
    pub allow_shared_sessions: bool,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            ttl_ms: 30 * 60 * 1000,
            cleanup_interval_ms: 60 * 1000,
            per_client_session_limit: 3,
            allow_shared_sessions: false,
        }
    }
}

impl SessionManagerConfig {
    /// Time-to-live as a `Duration`.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Reaper period as a `Duration`.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Reject limits that would make the manager unusable.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("max_sessions", self.max_sessions == 0),
            ("per_client_session_limit", self.per_client_session_limit == 0),
            ("ttl_ms", self.ttl_ms == 0),
            ("cleanup_interval_ms", self.cleanup_interval_ms == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ConfigError::Invalid(format!(
                "sessions.{field} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

/// Security layer settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub url: UrlFilterConfig,
    pub script: ScriptSandboxConfig,
    pub audit: AuditConfig,
}

/// Outbound URL rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlFilterConfig {
    /// Schemes that may be fetched.
    pub allowed_schemes: Vec<String>,
    /// Reject plain http.
    pub require_https: bool,
    /// Reject loopback, private, link-local and unspecified hosts.
    pub block_private_addresses: bool,
    /// Host patterns that are allowed; empty allows every host.
    pub host_allowlist: Vec<String>,
    /// Host patterns that are always rejected.
    pub host_denylist: Vec<String>,
    /// Regular expressions rejected anywhere in the URL.
    pub denied_patterns: Vec<String>,
}

impl Default for UrlFilterConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".into(), "https".into()],
            require_https: false,
            block_private_addresses: true,
            host_allowlist: Vec::new(),
            host_denylist: Vec::new(),
            denied_patterns: Vec::new(),
        }
    }
}

/// Script screening settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSandboxConfig {
    /// Custom patterns; when non-empty they replace the built-in set.
    pub blocked_patterns: Vec<String>,
    /// Root that script path arguments must stay inside.
    pub allowed_root: Option<PathBuf>,
}

/// Audit log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Events kept in memory before the oldest is evicted.
    pub capacity: usize,
    /// Optional JSON-lines file receiving every event.
    pub log_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
            log_path: None,
        }
    }
}

impl AuditConfig {
    /// # Errors
    /// Returns error if the buffer capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "security.audit.capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
