//! Discovery error types.

use thiserror::Error;

use crate::device::DeviceError;

/// Errors raised while handling device announcements.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Identity query failed or returned garbage. The announcement is skipped;
    /// the device may be picked up on a later announcement.
    #[error("failed to resolve device at {address}: {source}")]
    Resolution {
        address: String,
        #[source]
        source: DeviceError,
    },

    /// Unexpected fault while handling an announcement. Stops the process.
    #[error("fatal discovery error: {0}")]
    Fatal(String),

    /// The discovery backend itself failed. Stops the process.
    #[error("discovery source failed: {0}")]
    Source(String),

    /// Configuration enables no discovery source, so no device can appear.
    #[error("no discovery source enabled: {0}")]
    NoSources(String),
}

impl DiscoveryError {
    /// Whether this error must bring the pipeline down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Resolution { .. })
    }
}
