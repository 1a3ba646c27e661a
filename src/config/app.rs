//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::DEFAULT_SERVICE_TYPE;
use crate::forwarder::{ForwarderConfig, TransportConfig};
use crate::poller::PollerConfig;

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Default delay between starting discovery and starting the pollers (5 seconds).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

fn default_mdns() -> bool {
    true
}

fn default_grace_period() -> Duration {
    DEFAULT_GRACE_PERIOD
}

// =============================================================================
// Discovery Configuration
// =============================================================================

/// Discovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// mDNS service type browsed for (default: `_hwenergy._tcp.local.`).
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Statically configured device addresses, announced once at startup.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Browse the local network (only honored when built with `mdns`).
    #[serde(default = "default_mdns")]
    pub mdns: bool,

    /// Time discovery runs before the pollers start (default: 5s).
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            addresses: Vec::new(),
            mdns: true,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Discovery configuration.
    pub discovery: DiscoveryConfig,

    /// Poller configuration, shared by every device.
    pub poller: PollerConfig,

    /// Forwarder configuration.
    pub forwarder: ForwarderConfig,

    /// Collection endpoint configuration.
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML file, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Errors
    /// Returns `ConfigError` if an existing file cannot be read, parsed, or validated.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load(path)
    }

    /// Parse and validate configuration from YAML text.
    ///
    /// # Errors
    /// Returns `ConfigError` if the text cannot be parsed or validated.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        // Discovery
        if self.discovery.service_type.trim().is_empty() {
            return invalid("discovery service_type must not be empty");
        }
        if let Some(address) = self.discovery.addresses.iter().find(|a| a.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "discovery addresses must not be empty: '{}'",
                address
            )));
        }

        // Poller
        if self.poller.interval.is_zero() {
            return invalid("poller interval must be positive");
        }
        if self.poller.timeout.is_zero() {
            return invalid("poller timeout must be positive");
        }
        let backoff = &self.poller.backoff;
        if backoff.initial.is_zero() {
            return invalid("poller backoff initial must be positive");
        }
        if !(backoff.multiplier >= 1.0 && backoff.multiplier.is_finite()) {
            return Err(ConfigError::ValidationError(format!(
                "poller backoff multiplier must be >= 1.0, got {}",
                backoff.multiplier
            )));
        }
        if let Some(max) = backoff.max
            && max < backoff.initial
        {
            return invalid("poller backoff max must not be below initial");
        }

        // Forwarder
        if self.forwarder.tick_interval.is_zero() {
            return invalid("forwarder tick_interval must be positive");
        }
        if self.forwarder.max_retries == 0 {
            return invalid("forwarder max_retries must be at least 1");
        }
        if self.forwarder.max_undelivered == 0 {
            return invalid("forwarder max_undelivered must be positive");
        }
        if self.forwarder.audit_log.as_os_str().is_empty() {
            return invalid("forwarder audit_log must not be empty");
        }

        // Transport
        let url = url::Url::parse(&self.transport.url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "invalid transport url '{}': {}",
                self.transport.url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "transport url must be http or https: '{}'",
                self.transport.url
            )));
        }
        if self.transport.timeout.is_zero() {
            return invalid("transport timeout must be positive");
        }

        Ok(())
    }
}
