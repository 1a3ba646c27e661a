//! Poller Layer
//!
//! One long-lived Tokio task per discovered device, fetching telemetry and
//! pushing readings into the shared [`ReadingBuffer`](crate::buffer::ReadingBuffer).
//!
//! - [`DevicePoller`]: The polling loop
//! - [`PollerHandle`]: Join handle plus live counters
//! - [`BackoffPolicy`]: Injectable retry delay policy

mod backoff;
mod worker;

pub use backoff::{BackoffPolicy, DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MULTIPLIER};
pub use worker::{
    DEFAULT_DEVICE_TIMEOUT, DEFAULT_POLL_INTERVAL, DevicePoller, PollerConfig, PollerHandle,
    PollerState, PollerStats,
};
