//! Pipeline coordinator.
//!
//! Owns the shared [`ReadingBuffer`], [`StopSignal`] and [`DeviceRegistry`]
//! and sequences the pipeline:
//!
//! ```text
//! discovery -> grace period -> activate pollers -> forwarder -> wait for stop -> join
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::buffer::ReadingBuffer;
use crate::config::{AppConfig, DEFAULT_GRACE_PERIOD, DiscoveryConfig};
use crate::device::{DeviceClient, DeviceError, HttpDeviceClient};
use crate::discovery::{
    AnnouncementListener, DiscoveryError, DiscoverySource, DiscoveryWatcher, StaticDiscovery,
};
use crate::forwarder::{
    AuditError, AuditLog, Forwarder, ForwarderConfig, ForwarderSummary, HttpTransport, Transport,
    TransportError,
};
use crate::poller::PollerConfig;
use crate::registry::DeviceRegistry;
use crate::signal::StopSignal;

/// Errors that end [`Coordinator::run`] or prevent building a coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Discovery failed fatally; the pipeline was shut down.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The device client could not be built.
    #[error("failed to build device client: {0}")]
    Device(#[from] DeviceError),

    /// The transport could not be built.
    #[error("failed to build transport: {0}")]
    Transport(#[from] TransportError),

    /// The audit log could not be opened.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Timing and worker settings of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Time discovery runs alone before the pollers start.
    pub grace_period: Duration,
    /// Settings shared by every poller.
    pub poller: PollerConfig,
    /// Forwarder settings.
    pub forwarder: ForwarderConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            poller: PollerConfig::default(),
            forwarder: ForwarderConfig::default(),
        }
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            grace_period: config.discovery.grace_period,
            poller: config.poller.clone(),
            forwarder: config.forwarder.clone(),
        }
    }
}

/// Final state reported by [`Coordinator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Devices registered over the run.
    pub devices: usize,
    /// Forwarder totals; default if the forwarder never started.
    pub forwarder: ForwarderSummary,
}

/// Owner of the shared pipeline state.
pub struct Coordinator {
    client: Arc<dyn DeviceClient>,
    transport: Arc<dyn Transport>,
    buffer: ReadingBuffer,
    stop: StopSignal,
    registry: DeviceRegistry,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator around the given device client and transport.
    pub fn new(
        client: Arc<dyn DeviceClient>,
        transport: Arc<dyn Transport>,
        config: CoordinatorConfig,
    ) -> Self {
        let buffer = ReadingBuffer::new();
        let stop = StopSignal::new();
        let registry = DeviceRegistry::new(
            Arc::clone(&client),
            buffer.clone(),
            stop.clone(),
            config.poller.clone(),
        );

        Self {
            client,
            transport,
            buffer,
            stop,
            registry,
            config,
        }
    }

    /// Build a coordinator with the HTTP device client and HTTP transport.
    ///
    /// # Errors
    /// Returns `CoordinatorError` if either HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, CoordinatorError> {
        let client = HttpDeviceClient::new(config.poller.timeout)?;
        let transport = HttpTransport::new(config.transport.clone())?;
        Ok(Self::new(
            Arc::new(client),
            Arc::new(transport),
            CoordinatorConfig::from(config),
        ))
    }

    /// Handle to the stop signal; triggering it shuts the pipeline down.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// The shared reading buffer.
    pub fn buffer(&self) -> &ReadingBuffer {
        &self.buffer
    }

    /// The device registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Run the pipeline until the stop signal is set, then join every worker.
    ///
    /// # Errors
    /// Returns `CoordinatorError::Discovery` if discovery failed fatally, and
    /// `CoordinatorError::Audit` if the audit log cannot be opened. In both
    /// cases all started workers have been joined.
    pub async fn run(
        self,
        sources: Vec<Box<dyn DiscoverySource>>,
    ) -> Result<RunSummary, CoordinatorError> {
        let audit = AuditLog::open(&self.config.forwarder.audit_log).await?;

        // Discovery
        let (sink, watcher) = DiscoveryWatcher::new(
            Arc::clone(&self.client),
            self.registry.clone(),
            self.stop.clone(),
        );
        let watcher_task = tokio::spawn(watcher.run());

        let listener: Arc<dyn AnnouncementListener> = Arc::new(sink);
        let source_tasks: Vec<(String, JoinHandle<Result<(), DiscoveryError>>)> = sources
            .into_iter()
            .map(|source| {
                let name = source.name().to_string();
                tracing::info!(source = %name, "Starting discovery source");
                let task =
                    tokio::spawn(run_source(source, Arc::clone(&listener), self.stop.clone()));
                (name, task)
            })
            .collect();
        drop(listener);

        // Grace period, then pollers and forwarder
        let mut forwarder_task = None;
        if self.stop.sleep(self.config.grace_period).await {
            self.registry.activate().await;

            let forwarder = Forwarder::new(
                self.buffer.clone(),
                Arc::clone(&self.transport),
                audit,
                self.stop.clone(),
                self.config.forwarder.clone(),
            );
            forwarder_task = Some(tokio::spawn(forwarder.run()));
            tracing::info!("Pipeline running");
        } else {
            tracing::warn!("Stopped during grace period, pollers not started");
        }

        self.stop.wait().await;
        tracing::info!("Shutting down");

        // Join
        self.registry.join_all().await;

        let forwarder = match forwarder_task {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Forwarder task failed");
                ForwarderSummary::default()
            }),
            None => ForwarderSummary::default(),
        };

        let mut failure = match watcher_task.await {
            Ok(result) => result.err(),
            Err(e) => Some(DiscoveryError::Fatal(format!("discovery watcher failed: {e}"))),
        };
        for (name, task) in source_tasks {
            let result = task.await.unwrap_or_else(|e| {
                Err(DiscoveryError::Source(format!("{name} task failed: {e}")))
            });
            if let Err(e) = result {
                tracing::error!(source = %name, error = %e, "Discovery source failed");
                failure.get_or_insert(e);
            }
        }

        let summary = RunSummary {
            devices: self.registry.len().await,
            forwarder,
        };
        tracing::info!(
            devices = summary.devices,
            delivered = summary.forwarder.delivered,
            dropped = summary.forwarder.dropped,
            pending = summary.forwarder.pending_at_shutdown,
            "Pipeline stopped"
        );

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }
}

/// Run one source; a backend failure stops the pipeline.
async fn run_source(
    source: Box<dyn DiscoverySource>,
    listener: Arc<dyn AnnouncementListener>,
    stop: StopSignal,
) -> Result<(), DiscoveryError> {
    let result = source.run(listener, stop.clone()).await;
    if let Err(e) = &result
        && e.is_fatal()
    {
        tracing::error!(error = %e, "Discovery source failed, shutting down");
        stop.trigger();
    }
    result
}

/// Discovery sources enabled by `config`.
///
/// Static addresses are always announced. Multicast DNS browsing is added
/// when enabled and the crate is built with the `mdns` feature.
///
/// # Errors
/// Returns `DiscoveryError::NoSources` when nothing would ever announce a device.
pub fn discovery_sources(
    config: &DiscoveryConfig,
) -> Result<Vec<Box<dyn DiscoverySource>>, DiscoveryError> {
    let mut sources: Vec<Box<dyn DiscoverySource>> = Vec::new();

    if !config.addresses.is_empty() {
        sources.push(Box::new(StaticDiscovery::new(config.addresses.iter().cloned())));
    }

    #[cfg(feature = "mdns")]
    if config.mdns {
        sources.push(Box::new(crate::discovery::MdnsDiscovery::new(
            config.service_type.clone(),
        )));
    }

    #[cfg(not(feature = "mdns"))]
    if config.mdns {
        tracing::warn!(
            service_type = %config.service_type,
            "mDNS discovery requested but not compiled in, using static addresses only"
        );
    }

    if sources.is_empty() {
        let reason = if cfg!(feature = "mdns") {
            "mdns is disabled and no static addresses are configured"
        } else {
            "no static addresses are configured and mdns is not compiled in"
        };
        tracing::error!(reason, "No discovery source enabled");
        return Err(DiscoveryError::NoSources(reason.to_string()));
    }
    Ok(sources)
}
