//! Device registry and poller supervisor.
//!
//! Maps each device serial to its poller. At most one poller per serial ever
//! exists; a repeated registration is a no-op. The registry starts inactive:
//! devices registered before [`DeviceRegistry::activate`] are held pending and
//! started on activation, devices registered afterwards start immediately.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::buffer::ReadingBuffer;
use crate::device::{Device, DeviceClient};
use crate::poller::{DevicePoller, PollerConfig, PollerHandle};
use crate::signal::StopSignal;

/// A registered device and its poller, once started.
#[derive(Debug)]
struct RegistryEntry {
    device: Arc<Device>,
    poller: Option<PollerHandle>,
}

#[derive(Debug, Default)]
struct RegistryState {
    active: bool,
    entries: HashMap<String, RegistryEntry>,
}

/// Supervisor owning `serial -> (Device, PollerHandle)`.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone)]
pub struct DeviceRegistry {
    state: Arc<RwLock<RegistryState>>,
    client: Arc<dyn DeviceClient>,
    buffer: ReadingBuffer,
    stop: StopSignal,
    config: PollerConfig,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field(
                "device_count",
                &self.state.try_read().map(|s| s.entries.len()).unwrap_or(0),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    /// Create an inactive registry whose pollers share `buffer` and `stop`.
    pub fn new(
        client: Arc<dyn DeviceClient>,
        buffer: ReadingBuffer,
        stop: StopSignal,
        config: PollerConfig,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            client,
            buffer,
            stop,
            config,
        }
    }

    /// Register a device.
    ///
    /// Returns `false` if the serial is already known or shutdown has begun.
    /// Otherwise stores the device and, if the registry is active, starts its
    /// poller; returns `true`.
    pub async fn register(&self, device: Device) -> bool {
        let mut state = self.state.write().await;
        // Checked under the lock so that no poller starts after `all()`
        if self.stop.is_triggered() {
            tracing::debug!(serial = %device.serial, "Ignoring registration during shutdown");
            return false;
        }
        if state.entries.contains_key(&device.serial) {
            tracing::debug!(serial = %device.serial, "Device already registered");
            return false;
        }

        let device = Arc::new(device);
        let poller = state.active.then(|| self.start_poller(&device));
        tracing::info!(
            serial = %device.serial,
            address = %device.address,
            started = poller.is_some(),
            "Device registered"
        );

        state
            .entries
            .insert(device.serial.clone(), RegistryEntry { device, poller });
        true
    }

    /// Start pollers for every pending device and switch to immediate start.
    ///
    /// Returns the number of pollers started. Idempotent.
    pub async fn activate(&self) -> usize {
        let mut state = self.state.write().await;
        state.active = true;

        let mut started = 0;
        for entry in state.entries.values_mut() {
            if entry.poller.is_none() {
                entry.poller = Some(self.start_poller(&entry.device));
                started += 1;
            }
        }

        tracing::info!(started, total = state.entries.len(), "Registry activated");
        started
    }

    /// Whether `serial` is registered.
    pub async fn contains(&self, serial: &str) -> bool {
        self.state.read().await.entries.contains_key(serial)
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether no device is registered.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Snapshot of registered devices.
    pub async fn devices(&self) -> Vec<Device> {
        self.state
            .read()
            .await
            .entries
            .values()
            .map(|e| Device::clone(&e.device))
            .collect()
    }

    /// Number of started pollers.
    pub async fn running(&self) -> usize {
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.poller.is_some())
            .count()
    }

    /// Take every started poller handle out of the registry.
    ///
    /// Devices stay registered; their pollers are now owned by the caller.
    pub async fn all(&self) -> Vec<PollerHandle> {
        self.state
            .write()
            .await
            .entries
            .values_mut()
            .filter_map(|e| e.poller.take())
            .collect()
    }

    /// Wait for every started poller to exit.
    ///
    /// Pollers only exit once the stop signal is set; call after triggering it.
    pub async fn join_all(&self) {
        let handles = self.all().await;
        tracing::info!(count = handles.len(), "Joining pollers");

        for handle in handles {
            let serial = handle.device().serial.clone();
            let readings = handle.stats().readings();
            let failures = handle.stats().failures();
            handle.join().await;
            tracing::debug!(serial = %serial, readings, failures, "Poller joined");
        }
    }

    fn start_poller(&self, device: &Arc<Device>) -> PollerHandle {
        DevicePoller::new(
            Arc::clone(device),
            Arc::clone(&self.client),
            self.buffer.clone(),
            self.stop.clone(),
            self.config.clone(),
        )
        .spawn()
    }
}
