//! Meterlink - Energy Meter Telemetry Pipeline
//!
//! Discovers energy meters on the local network, polls each one for its
//! instantaneous power draw, and forwards the readings in batches to a remote
//! collection endpoint. Every confirmed delivery is appended to a local audit
//! log. It can be used as a library, or run as the `meterlink` binary.
//!
//! # Architecture
//!
//! - **Discovery**: Announcements from static addresses or multicast DNS, resolved to devices
//! - **Registry**: One poller per device serial, started after the grace period
//! - **Pollers**: Fetch telemetry on a fixed cadence with backoff on failure
//! - **Buffer**: Shared FIFO between pollers and the forwarder
//! - **Forwarder**: Timed batching, bounded retry, redelivery, audit log
//! - **Coordinator**: Sequences startup and joins every worker at shutdown
//!
//! # Example
//!
//! ```rust,no_run
//! use meterlink::{AppConfig, Coordinator, coordinator::discovery_sources};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load_or_default("configs/config.yaml")?;
//!     let coordinator = Coordinator::from_config(&config)?;
//!
//!     let stop = coordinator.stop_signal();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stop.trigger();
//!     });
//!
//!     let sources = discovery_sources(&config.discovery)?;
//!     let summary = coordinator.run(sources).await?;
//!     println!("delivered {} readings", summary.forwarder.delivered);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod discovery;
pub mod forwarder;
pub mod poller;
pub mod registry;
pub mod signal;

pub use buffer::ReadingBuffer;
pub use config::{AppConfig, ConfigError};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, RunSummary};
pub use device::{Device, DeviceClient, DeviceError, HttpDeviceClient, Reading};
pub use discovery::{DiscoveryError, DiscoverySource, StaticDiscovery};
pub use forwarder::{
    AuditLog, Forwarder, ForwarderConfig, HttpTransport, Transport, TransportConfig,
};
pub use poller::{BackoffPolicy, DevicePoller, PollerConfig};
pub use registry::DeviceRegistry;
pub use signal::StopSignal;
