//! Device-facing error types.

use thiserror::Error;

/// Errors raised while talking to a meter.
///
/// Every variant is transient from the pipeline's point of view: a poller
/// backs off and retries, the discovery watcher skips the announcement.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Connection, timeout or body decoding failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The device answered with a non-success status.
    #[error("unexpected status code {0}")]
    Status(u16),

    /// Response body was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Identity response lacks a usable serial.
    #[error("malformed identity response: {0}")]
    MalformedIdentity(String),

    /// Telemetry response has no recognised power field.
    #[error("telemetry response has no power field (expected one of {expected})")]
    MissingPower { expected: String },
}
