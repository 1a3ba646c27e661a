//! Multicast DNS discovery backend.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::discovery::{Announcement, AnnouncementListener, DiscoveryError, DiscoverySource};
use crate::signal::StopSignal;

/// Browses for a service type and announces every resolved instance.
#[derive(Debug, Clone)]
pub struct MdnsDiscovery {
    service_type: String,
}

impl MdnsDiscovery {
    /// Create a browser for `service_type` (e.g. `_hwenergy._tcp.local.`).
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
        }
    }
}

/// Pick one address for a resolved service, preferring IPv4.
fn service_address(info: &ServiceInfo) -> Option<String> {
    let addresses = info.get_addresses();
    let ip: IpAddr = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;

    let port = info.get_port();
    Some(match (ip, port) {
        (IpAddr::V4(v4), 80 | 0) => v4.to_string(),
        (ip, 80 | 0) => SocketAddr::new(ip, 80).to_string(),
        (ip, port) => SocketAddr::new(ip, port).to_string(),
    })
}

#[async_trait::async_trait]
impl DiscoverySource for MdnsDiscovery {
    fn name(&self) -> &str {
        "mdns"
    }

    async fn run(
        self: Box<Self>,
        listener: Arc<dyn AnnouncementListener>,
        stop: StopSignal,
    ) -> Result<(), DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Source(format!("failed to start mDNS daemon: {e}")))?;
        let receiver = daemon.browse(&self.service_type).map_err(|e| {
            DiscoveryError::Source(format!("failed to browse '{}': {e}", self.service_type))
        })?;

        tracing::info!(service_type = %self.service_type, "Browsing for devices");

        let result = loop {
            tokio::select! {
                _ = stop.wait() => break Ok(()),
                event = receiver.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        match service_address(&info) {
                            Some(address) => {
                                tracing::debug!(
                                    name = %info.get_fullname(),
                                    address = %address,
                                    "Service resolved"
                                );
                                listener.on_device_announced(Announcement::new(address));
                            }
                            None => tracing::warn!(
                                name = %info.get_fullname(),
                                "Resolved service has no address"
                            ),
                        }
                    }
                    Ok(other) => tracing::trace!(event = ?other, "mDNS event"),
                    Err(e) => {
                        break Err(DiscoveryError::Source(format!("mDNS channel closed: {e}")));
                    }
                },
            }
        };

        if let Err(e) = daemon.shutdown() {
            tracing::debug!(error = %e, "mDNS daemon shutdown failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DEFAULT_SERVICE_TYPE;

    fn info(ip: &str, port: u16) -> ServiceInfo {
        ServiceInfo::new(
            "_hwenergy._tcp.local.",
            "p1meter-AA11",
            "p1meter-AA11.local.",
            ip,
            port,
            &[("path", "/api")][..],
        )
        .unwrap()
    }

    #[test]
    fn test_default_port_is_omitted() {
        assert_eq!(service_address(&info("192.168.1.20", 80)).unwrap(), "192.168.1.20");
    }

    #[test]
    fn test_custom_port_is_kept() {
        assert_eq!(
            service_address(&info("192.168.1.20", 8080)).unwrap(),
            "192.168.1.20:8080"
        );
    }

    #[test]
    fn test_source_name() {
        assert_eq!(MdnsDiscovery::new(DEFAULT_SERVICE_TYPE).name(), "mdns");
    }
}
