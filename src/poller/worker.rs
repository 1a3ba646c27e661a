//! Per-device polling loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tokio::task::JoinHandle;

use crate::buffer::ReadingBuffer;
use crate::device::{Device, DeviceClient};
use crate::poller::BackoffPolicy;
use crate::signal::StopSignal;

/// Default delay between successful polls (1 second).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-request timeout of the device client (5 seconds).
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(5);

fn default_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_DEVICE_TIMEOUT
}

/// Poller settings shared by every device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay after a successful fetch.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Per-request timeout of the device client; bounds shutdown latency.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Delay policy after a failed fetch.
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_DEVICE_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PollerConfig {
    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Lifecycle state of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PollerState {
    /// Fetching or sleeping the poll interval.
    Running,
    /// Waiting after a failed fetch.
    Backoff,
    /// Terminal; the stop signal was observed.
    Stopped,
}

/// Counters shared between a running poller and its handle.
#[derive(Debug, Default)]
pub struct PollerStats {
    readings: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl PollerStats {
    /// Readings pushed to the buffer.
    pub fn readings(&self) -> u64 {
        self.readings.load(Ordering::Relaxed)
    }

    /// Failed fetches over the poller's lifetime.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Failed fetches since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn record_success(&self) {
        self.readings.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Long-lived worker fetching telemetry from one device.
///
/// `RUNNING -> fetch -> {enqueue | backoff} -> ... -> STOPPED`. The stop
/// signal is checked only between iterations: an in-flight fetch always runs
/// to completion (bounded by the client's own timeout). Sleeps end early on
/// stop. Failures are retried forever.
pub struct DevicePoller {
    device: Arc<Device>,
    client: Arc<dyn DeviceClient>,
    buffer: ReadingBuffer,
    stop: StopSignal,
    config: PollerConfig,
    stats: Arc<PollerStats>,
}

impl DevicePoller {
    /// Create a poller bound to the shared buffer and stop signal.
    pub fn new(
        device: Arc<Device>,
        client: Arc<dyn DeviceClient>,
        buffer: ReadingBuffer,
        stop: StopSignal,
        config: PollerConfig,
    ) -> Self {
        Self {
            device,
            client,
            buffer,
            stop,
            config,
            stats: Arc::new(PollerStats::default()),
        }
    }

    /// Spawn the polling loop on the runtime.
    pub fn spawn(self) -> PollerHandle {
        let device = Arc::clone(&self.device);
        let stats = Arc::clone(&self.stats);
        let task = tokio::spawn(self.run());
        PollerHandle {
            device,
            stats,
            task,
        }
    }

    /// Run the polling loop until the stop signal is observed.
    pub async fn run(self) {
        let serial = self.device.serial.as_str();
        tracing::info!(serial = %serial, address = %self.device.address, "Poller started");

        let mut state = PollerState::Running;
        while !self.stop.is_triggered() {
            let result = self.client.fetch_reading(&self.device).await;

            let delay = match result {
                Ok(reading) => {
                    if state == PollerState::Backoff {
                        tracing::info!(
                            serial = %serial,
                            failures = self.stats.consecutive_failures(),
                            "Device reachable again"
                        );
                    }
                    state = PollerState::Running;

                    if self.stop.is_triggered() {
                        tracing::debug!(serial = %serial, "Discarding reading fetched after stop");
                        break;
                    }
                    tracing::debug!(serial = %serial, wattage = reading.wattage, "Reading fetched");
                    self.buffer.push(reading);
                    self.stats.record_success();
                    self.config.interval
                }
                Err(e) => {
                    state = PollerState::Backoff;
                    let failures = self.stats.record_failure();
                    let delay = self.config.backoff.delay(failures);
                    tracing::warn!(
                        serial = %serial,
                        error = %e,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Telemetry fetch failed"
                    );
                    delay
                }
            };

            if !self.stop.sleep(delay).await {
                break;
            }
        }

        state = PollerState::Stopped;
        tracing::info!(
            serial = %serial,
            state = %state,
            readings = self.stats.readings(),
            failures = self.stats.failures(),
            "Poller stopped"
        );
    }
}

/// Handle to a spawned poller.
#[derive(Debug)]
pub struct PollerHandle {
    device: Arc<Device>,
    stats: Arc<PollerStats>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// The polled device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Live counters of the poller.
    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// Whether the polling loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the polling loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(serial = %self.device.serial, error = %e, "Poller task failed");
        }
    }
}
