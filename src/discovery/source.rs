//! Announcement plumbing and discovery backends.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::discovery::DiscoveryError;
use crate::signal::StopSignal;

/// Default service type announced by the meters.
pub const DEFAULT_SERVICE_TYPE: &str = "_hwenergy._tcp.local.";

/// A device reachable at `address` was announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Network address (`ip`, `ip:port` or `host:port`).
    pub address: String,
}

impl Announcement {
    /// Create an announcement for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Single-method capability invoked for every announced device.
///
/// Implemented for closures and for [`AnnouncementSink`].
pub trait AnnouncementListener: Send + Sync + 'static {
    /// Called once per announcement. Must not block.
    fn on_device_announced(&self, announcement: Announcement);
}

impl<F> AnnouncementListener for F
where
    F: Fn(Announcement) + Send + Sync + 'static,
{
    fn on_device_announced(&self, announcement: Announcement) {
        self(announcement)
    }
}

/// Adapter forwarding announcements to a [`DiscoveryWatcher`](crate::discovery::DiscoveryWatcher).
#[derive(Debug, Clone)]
pub struct AnnouncementSink {
    tx: mpsc::UnboundedSender<Announcement>,
}

impl AnnouncementSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Announcement>) -> Self {
        Self { tx }
    }

    /// Queue an announcement. Returns `false` once the watcher has exited.
    pub fn announce(&self, announcement: Announcement) -> bool {
        self.tx.send(announcement).is_ok()
    }
}

impl AnnouncementListener for AnnouncementSink {
    fn on_device_announced(&self, announcement: Announcement) {
        if !self.announce(announcement) {
            tracing::debug!("Discovery watcher gone, dropping announcement");
        }
    }
}

/// A backend producing announcements (static list, multicast DNS, ...).
#[async_trait::async_trait]
pub trait DiscoverySource: Send + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Deliver announcements to `listener` until the backend is exhausted or
    /// `stop` fires.
    ///
    /// # Errors
    /// Returns `DiscoveryError::Source` if the backend fails; the caller treats
    /// that as fatal.
    async fn run(
        self: Box<Self>,
        listener: Arc<dyn AnnouncementListener>,
        stop: StopSignal,
    ) -> Result<(), DiscoveryError>;
}

/// Announces a fixed list of addresses once.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    addresses: Vec<String>,
}

impl StaticDiscovery {
    /// Create a source for the given addresses.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
impl DiscoverySource for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn run(
        self: Box<Self>,
        listener: Arc<dyn AnnouncementListener>,
        stop: StopSignal,
    ) -> Result<(), DiscoveryError> {
        for address in self.addresses {
            if stop.is_triggered() {
                break;
            }
            tracing::debug!(address = %address, "Announcing static device");
            listener.on_device_announced(Announcement::new(address));
        }
        Ok(())
    }
}
