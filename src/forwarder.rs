//! Forwarder Layer
//!
//! Periodically drains the reading buffer and delivers batches to the remote
//! collection endpoint through a pluggable [`Transport`].
//!
//! - [`Forwarder`]: Tick loop with bounded retry and redelivery of failed batches
//! - [`Transport`] / [`HttpTransport`]: Delivery mechanism (JSON `POST` by default)
//! - [`AuditLog`]: Append-only record of confirmed deliveries

mod audit;
mod http;
mod transport;
mod worker;

pub use audit::{AuditContents, AuditError, AuditLog, AuditRecord};
pub use http::{DEFAULT_ENDPOINT, DEFAULT_TRANSPORT_TIMEOUT, HttpTransport, TransportConfig};
pub use transport::{Batch, Transport, TransportError};
pub use worker::{
    CycleOutcome, DEFAULT_AUDIT_LOG, DEFAULT_MAX_RETRIES, DEFAULT_MAX_UNDELIVERED,
    DEFAULT_RETRY_DELAY, DEFAULT_TICK_INTERVAL, Forwarder, ForwarderConfig, ForwarderSummary,
};
