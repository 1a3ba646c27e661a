//! Discovery Layer
//!
//! Consumes "device announced" events from a pluggable backend and registers
//! every newly seen device with the [`DeviceRegistry`](crate::registry::DeviceRegistry).
//!
//! - [`DiscoverySource`]: Backend trait ([`StaticDiscovery`], `MdnsDiscovery` with feature `mdns`)
//! - [`AnnouncementListener`]: Single-method "device announced" capability
//! - [`DiscoveryWatcher`]: Resolves identities and deduplicates by serial

mod error;
#[cfg(feature = "mdns")]
mod mdns;
mod source;
mod watcher;

pub use error::DiscoveryError;
#[cfg(feature = "mdns")]
pub use mdns::MdnsDiscovery;
pub use source::{
    Announcement, AnnouncementListener, AnnouncementSink, DEFAULT_SERVICE_TYPE, DiscoverySource,
    StaticDiscovery,
};
pub use watcher::{AnnouncementOutcome, DiscoveryWatcher};
