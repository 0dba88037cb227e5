//! SSDP multicast probe for KEF speakers.
//!
//! Sends M-SEARCH queries to 239.255.255.250:1900 from every usable
//! interface in parallel and listens for replies on the same sockets
//! (devices answer unicast back to the sending socket/port).
//!
//! Qualification is substring matching on the reply payload, not full SSDP
//! parsing - a deliberate, documented simplification: any reply mentioning a
//! KEF model family is accepted.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::types::{
    get_interfaces, DeviceAddress, DiscoveryError, DiscoveryResult, InterfaceInfo,
};

/// Standard SSDP multicast group (protocol specification).
const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Standard SSDP port.
const MULTICAST_PORT: u16 = 1900;

/// Rolling per-read deadline within an interface's receive loop.
const READ_SLICE: Duration = Duration::from_secs(2);

/// Search targets queried per interface. The broad `ssdp:all` wildcard
/// catches devices that don't answer the narrower targets.
const SEARCH_TARGETS: &[&str] = &[
    "upnp:rootdevice",
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "ssdp:all",
];

/// Vendor-identifying substrings: a reply qualifies if its payload contains
/// any of these (ASCII case-insensitive).
const KEF_MARKERS: &[&str] = &["kef", "lsx", "ls50"];

/// Checks if `haystack` contains `needle` (ASCII case-insensitive, no allocation).
#[inline]
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Build an M-SEARCH message for the given search target.
fn build_msearch_message(search_target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         ST: {}\r\n\
         MX: 3\r\n\r\n",
        search_target
    )
}

/// Checks whether an SSDP reply payload comes from a KEF speaker.
fn is_kef_reply(payload: &str) -> bool {
    KEF_MARKERS
        .iter()
        .any(|marker| contains_ignore_ascii_case(payload, marker))
}

/// Creates a UDP socket bound to a specific interface for SSDP discovery.
///
/// - SO_REUSEADDR (and SO_REUSEPORT on Unix) for rapid restarts
/// - Multicast TTL of 4 per UPnP spec
/// - Joins the SSDP group on the interface so multicast NOTIFYs are heard too
fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[Ssdp] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[Ssdp] Failed to set SO_REUSEPORT on {}: {}", iface_ip, e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[Ssdp] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.join_multicast_v4(&MULTICAST_GROUP, &iface_ip) {
        log::warn!("[Ssdp] Failed to join multicast group on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Probes for a KEF speaker via SSDP multicast.
///
/// Races one task per usable interface into a single-slot channel; the first
/// qualifying reply wins and all other probes are cancelled. Returns
/// [`DiscoveryError::NoDeviceFound`] only once every interface loop has run
/// to completion without a qualifying reply.
pub async fn probe(
    overall_timeout: Duration,
    cancel: &CancellationToken,
) -> DiscoveryResult<DeviceAddress> {
    let interfaces = get_interfaces();
    if interfaces.is_empty() {
        log::debug!("[Ssdp] No usable network interfaces");
        return Err(DiscoveryError::NoDeviceFound);
    }

    log::debug!(
        "[Ssdp] Probing on {} interface(s) with {}ms budget",
        interfaces.len(),
        overall_timeout.as_millis()
    );

    let (tx, rx) = mpsc::channel::<DeviceAddress>(1);
    let race = cancel.child_token();

    for iface in interfaces {
        let tx = tx.clone();
        let race = race.clone();
        tokio::spawn(async move {
            probe_interface(iface, overall_timeout, tx, race).await;
        });
    }
    // Only probe tasks hold senders now, so the receiver closes once the
    // last interface loop finishes.
    drop(tx);

    super::await_race(rx, race, cancel, overall_timeout).await
}

/// Sends M-SEARCH queries on one interface and reads replies until the
/// interface-local deadline or cancellation.
async fn probe_interface(
    iface: InterfaceInfo,
    overall_timeout: Duration,
    tx: mpsc::Sender<DeviceAddress>,
    cancel: CancellationToken,
) {
    let socket = match create_socket(iface.ip) {
        Ok(s) => s,
        Err(e) => {
            log::warn!(
                "[Ssdp] Failed to open socket on {} ({}): {}",
                iface.name,
                iface.ip,
                e
            );
            return;
        }
    };

    for st in SEARCH_TARGETS {
        if cancel.is_cancelled() {
            return;
        }
        let msg = build_msearch_message(st);
        if let Err(e) = socket
            .send_to(msg.as_bytes(), (MULTICAST_GROUP, MULTICAST_PORT))
            .await
        {
            log::warn!("[Ssdp] Failed to send M-SEARCH on {}: {}", iface.name, e);
        }
    }

    let start = Instant::now();
    let mut buf = [0u8; 4096];

    while start.elapsed() < overall_timeout {
        let remaining = overall_timeout - start.elapsed();
        let slice = remaining.min(READ_SLICE);

        tokio::select! {
            _ = cancel.cancelled() => return,
            res = timeout(slice, socket.recv_from(&mut buf)) => match res {
                Ok(Ok((amt, src))) => {
                    let reply = String::from_utf8_lossy(&buf[..amt]);
                    if is_kef_reply(&reply) {
                        log::debug!(
                            "[Ssdp] Qualifying reply from {} via {}",
                            src.ip(),
                            iface.name
                        );
                        // Losing sends fail on the full slot and are discarded.
                        let _ = tx.try_send(DeviceAddress::new(src.ip().to_string()));
                        return;
                    }
                }
                Ok(Err(e)) => {
                    log::warn!(
                        "[Ssdp] Socket recv error on {} ({}): {}",
                        iface.name,
                        iface.ip,
                        e
                    );
                }
                // Rolling read deadline elapsed; keep reading until the
                // interface deadline.
                Err(_) => {}
            },
        }
    }

    log::trace!(
        "[Ssdp] Receive loop finished on {} after {}ms",
        iface.name,
        start.elapsed().as_millis()
    );
}
