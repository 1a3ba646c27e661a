//! Turns announcements into registered devices.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::device::DeviceClient;
use crate::discovery::{Announcement, AnnouncementSink, DiscoveryError};
use crate::registry::DeviceRegistry;
use crate::signal::StopSignal;

/// What happened to one announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnouncementOutcome {
    /// A new device was registered.
    Registered { serial: String },
    /// The serial was already known.
    Duplicate { serial: String },
    /// The device is new but shutdown has started, so it was not registered.
    Refused { serial: String },
}

/// Consumes announcements, resolves identities and registers new devices.
///
/// Resolution failures are logged and skipped. Anything else is fatal: the
/// stop signal is set and [`DiscoveryWatcher::run`] returns the error.
pub struct DiscoveryWatcher {
    rx: mpsc::UnboundedReceiver<Announcement>,
    client: Arc<dyn DeviceClient>,
    registry: DeviceRegistry,
    stop: StopSignal,
}

impl std::fmt::Debug for DiscoveryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryWatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DiscoveryWatcher {
    /// Create a watcher and the sink feeding it.
    pub fn new(
        client: Arc<dyn DeviceClient>,
        registry: DeviceRegistry,
        stop: StopSignal,
    ) -> (AnnouncementSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            rx,
            client,
            registry,
            stop,
        };
        (AnnouncementSink::new(tx), watcher)
    }

    /// Handle announcements until stop, or until every sink is dropped.
    ///
    /// # Errors
    /// Returns the first fatal error, after triggering the stop signal.
    pub async fn run(mut self) -> Result<(), DiscoveryError> {
        tracing::info!("Discovery watcher started");

        loop {
            let announcement = tokio::select! {
                _ = self.stop.wait() => break,
                next = self.rx.recv() => match next {
                    Some(a) => a,
                    None => {
                        tracing::debug!("All announcement sinks closed");
                        break;
                    }
                },
            };

            match self.handle(announcement).await {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(error = %e, "Skipping announcement");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Discovery failed, shutting down");
                    self.stop.trigger();
                    return Err(e);
                }
            }
        }

        tracing::info!("Discovery watcher stopped");
        Ok(())
    }

    /// Resolve and register one announcement.
    ///
    /// The work runs in its own task so that a panic surfaces as
    /// `DiscoveryError::Fatal` instead of unwinding the watcher.
    pub async fn handle(
        &self,
        announcement: Announcement,
    ) -> Result<AnnouncementOutcome, DiscoveryError> {
        let client = Arc::clone(&self.client);
        let registry = self.registry.clone();
        let address = announcement.address.clone();

        let task =
            tokio::spawn(async move { resolve_and_register(client, registry, announcement).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(DiscoveryError::Fatal(format!(
                "handler panicked for {address}"
            ))),
            Err(e) => Err(DiscoveryError::Fatal(format!(
                "handler aborted for {address}: {e}"
            ))),
        }
    }
}

async fn resolve_and_register(
    client: Arc<dyn DeviceClient>,
    registry: DeviceRegistry,
    announcement: Announcement,
) -> Result<AnnouncementOutcome, DiscoveryError> {
    let address = announcement.address;
    tracing::debug!(address = %address, "Device announced");

    let device = client
        .identify(&address)
        .await
        .map_err(|source| DiscoveryError::Resolution {
            address: address.clone(),
            source,
        })?;
    let serial = device.serial.clone();

    if registry.contains(&serial).await {
        tracing::debug!(serial = %serial, address = %address, "Ignoring known device");
        return Ok(AnnouncementOutcome::Duplicate { serial });
    }
    if !registry.register(device).await {
        if registry.contains(&serial).await {
            tracing::debug!(serial = %serial, address = %address, "Ignoring known device");
            return Ok(AnnouncementOutcome::Duplicate { serial });
        }
        tracing::info!(serial = %serial, address = %address, "Ignoring device during shutdown");
        return Ok(AnnouncementOutcome::Refused { serial });
    }

    tracing::info!(serial = %serial, address = %address, "New device discovered");
    Ok(AnnouncementOutcome::Registered { serial })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadingBuffer;
    use crate::device::{Device, DeviceError, DeviceIdentity, Reading};
    use crate::poller::PollerConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Client resolving addresses from a fixed table.
    struct TableClient {
        serials: HashMap<&'static str, &'static str>,
    }

    #[async_trait::async_trait]
    impl DeviceClient for TableClient {
        async fn identify(&self, address: &str) -> Result<Device, DeviceError> {
            match self.serials.get(address) {
                Some(&"PANIC") => panic!("identity handler blew up"),
                Some(serial) => Ok(Device::new(address, DeviceIdentity::new(*serial))),
                None => Err(DeviceError::MalformedIdentity("no serial".to_string())),
            }
        }

        async fn fetch_reading(&self, _device: &Device) -> Result<Reading, DeviceError> {
            Err(DeviceError::Status(503))
        }
    }

    fn setup(
        serials: &[(&'static str, &'static str)],
    ) -> (AnnouncementSink, DiscoveryWatcher, DeviceRegistry, StopSignal) {
        let client: Arc<dyn DeviceClient> = Arc::new(TableClient {
            serials: serials.iter().copied().collect(),
        });
        let stop = StopSignal::new();
        let registry = DeviceRegistry::new(
            Arc::clone(&client),
            ReadingBuffer::new(),
            stop.clone(),
            PollerConfig::default().with_interval(Duration::from_secs(1)),
        );
        let (sink, watcher) = DiscoveryWatcher::new(client, registry.clone(), stop.clone());
        (sink, watcher, registry, stop)
    }

    #[tokio::test]
    async fn test_handle_registers_then_dedups() {
        let (_sink, watcher, registry, stop) =
            setup(&[("10.0.0.5", "AA11"), ("10.0.0.9", "AA11")]);

        let first = watcher.handle(Announcement::new("10.0.0.5")).await.unwrap();
        assert_eq!(first, AnnouncementOutcome::Registered { serial: "AA11".into() });

        // Same serial at a new address is still the same device
        let second = watcher.handle(Announcement::new("10.0.0.9")).await.unwrap();
        assert_eq!(second, AnnouncementOutcome::Duplicate { serial: "AA11".into() });
        assert_eq!(registry.len().await, 1);

        stop.trigger();
    }

    #[tokio::test]
    async fn test_handle_after_stop_is_refused() {
        let (_sink, watcher, registry, stop) =
            setup(&[("10.0.0.5", "AA11"), ("10.0.0.6", "BB22")]);

        watcher.handle(Announcement::new("10.0.0.5")).await.unwrap();
        stop.trigger();

        let outcome = watcher.handle(Announcement::new("10.0.0.6")).await.unwrap();
        assert_eq!(outcome, AnnouncementOutcome::Refused { serial: "BB22".into() });

        // Known serials stay duplicates after stop
        let outcome = watcher.handle(Announcement::new("10.0.0.5")).await.unwrap();
        assert_eq!(outcome, AnnouncementOutcome::Duplicate { serial: "AA11".into() });
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_skipped() {
        let (sink, watcher, registry, stop) = setup(&[("10.0.0.5", "AA11")]);

        sink.announce(Announcement::new("10.0.0.99"));
        sink.announce(Announcement::new("10.0.0.5"));
        drop(sink);

        watcher.run().await.unwrap();
        assert!(!stop.is_triggered());
        assert!(registry.contains("AA11").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unexpected_fault_is_fatal() {
        let (sink, watcher, registry, stop) =
            setup(&[("10.0.0.5", "AA11"), ("10.0.0.6", "PANIC"), ("10.0.0.7", "CC33")]);

        sink.announce(Announcement::new("10.0.0.5"));
        sink.announce(Announcement::new("10.0.0.6"));
        sink.announce(Announcement::new("10.0.0.7"));

        let err = watcher.run().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Fatal(_)));
        assert!(err.is_fatal());
        assert!(stop.is_triggered());

        // Nothing after the fatal announcement was handled
        assert!(registry.contains("AA11").await);
        assert!(!registry.contains("CC33").await);
    }

    #[tokio::test]
    async fn test_run_exits_on_stop() {
        let (_sink, watcher, _registry, stop) = setup(&[]);
        let task = tokio::spawn(watcher.run());
        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watcher did not stop")
            .unwrap()
            .unwrap();
    }
}
