//! Device Layer
//!
//! Meter identity, telemetry readings and the client used to talk to a meter's
//! local HTTP API.
//!
//! - [`Device`]: A discovered meter, keyed by its serial number
//! - [`Reading`]: One timestamped power sample from one device
//! - [`DeviceClient`]: Capability to resolve identity and fetch telemetry
//! - [`HttpDeviceClient`]: `reqwest`-backed client for the meter HTTP API

mod client;
mod error;
mod types;

pub use client::{DeviceClient, HttpDeviceClient};
pub use error::DeviceError;
pub use types::{DEFAULT_API_VERSION, Device, DeviceIdentity, POWER_FIELDS, Reading};
