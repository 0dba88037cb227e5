//! Shared types for speaker discovery.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use local_ip_address::list_afinet_netifas;
use serde::Serialize;
use thiserror::Error;

/// Address of a discovered speaker.
///
/// Immutable once produced; the port is optional because SSDP replies only
/// reveal the source host, while the controller knows the API port from its
/// own configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAddress {
    /// IPv4 address in string form.
    pub host: String,
    /// API port, when known.
    pub port: Option<u16>,
}

impl DeviceAddress {
    /// Creates an address with no known port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }

    /// Creates an address with an explicit port.
    pub fn with_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind a UDP socket for the multicast probe.
    #[error("failed to bind discovery socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// The discovery budget elapsed without a qualifying reply.
    #[error("discovery timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Discovery was cancelled by the caller.
    #[error("discovery cancelled")]
    Cancelled,

    /// Every probe completed without a qualifying reply.
    #[error("no speaker found on the network")]
    NoDeviceFound,
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Network interface usable for discovery.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "en0", "eth0").
    pub name: String,
    /// IPv4 address bound to this interface.
    pub ip: Ipv4Addr,
}

/// Virtual interface prefixes to filter out during discovery.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}

/// Gets all usable network interfaces for discovery.
///
/// Filters out virtual/container interfaces and loopback.
pub fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ipv4) if !ipv4.is_loopback() => {
                    log::debug!("Using interface {} ({})", name, ipv4);
                    Some(InterfaceInfo { name, ip: ipv4 })
                }
                _ => None,
            }
        })
        .collect()
}
