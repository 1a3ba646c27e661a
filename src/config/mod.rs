//! Configuration module.
//!
//! YAML-based configuration with `${VAR:-default}` expansion for:
//! - Discovery (service type, static addresses, grace period)
//! - Pollers (interval, device timeout, backoff)
//! - Forwarder (tick, retries, redelivery cap, audit log)
//! - Transport (collection endpoint, user id, token)

mod app;
mod validation;

pub use app::{AppConfig, DiscoveryConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_CONFIG_PATH, DEFAULT_GRACE_PERIOD};
