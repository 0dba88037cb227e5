//! Brute-force subnet sweep for KEF speakers.
//!
//! Fallback strategy for networks where multicast is filtered: every host
//! suffix 1-254 of each local /24 gets one lightweight existence probe
//! through the transport client. A probe qualifies when the endpoint answers
//! 2xx with the vendor's JSON value envelope.
//!
//! Fan-out is deliberately unbounded: up to 254 probes per /24 run at once.
//! Each probe is one short HTTP request, and the race ends as soon as a
//! qualifying host answers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{get_interfaces, DeviceAddress, DiscoveryError, DiscoveryResult, InterfaceInfo};
use crate::transport::KefTransport;

/// Sweeps every local /24 for a KEF speaker.
///
/// Returns [`DiscoveryError::NoDeviceFound`] if there are no local IPv4
/// interfaces, or if the full address space was covered with no qualifying
/// reply.
pub async fn sweep(
    overall_timeout: Duration,
    transport: Arc<dyn KefTransport>,
    cancel: &CancellationToken,
) -> DiscoveryResult<DeviceAddress> {
    let hosts = subnet_hosts(&get_interfaces());
    if hosts.is_empty() {
        log::debug!("[Scan] No local IPv4 interfaces to sweep");
        return Err(DiscoveryError::NoDeviceFound);
    }

    log::debug!(
        "[Scan] Sweeping {} candidate hosts with {}ms budget",
        hosts.len(),
        overall_timeout.as_millis()
    );

    sweep_hosts(hosts, transport, overall_timeout, cancel).await
}

/// Expands each interface's /24 prefix into candidate host addresses.
///
/// Prefixes are deduplicated so two interfaces on the same subnet don't
/// double the probe count.
fn subnet_hosts(interfaces: &[InterfaceInfo]) -> Vec<String> {
    let mut prefixes: Vec<[u8; 3]> = Vec::new();
    for iface in interfaces {
        let octets = iface.ip.octets();
        let prefix = [octets[0], octets[1], octets[2]];
        if !prefixes.contains(&prefix) {
            prefixes.push(prefix);
        }
    }

    prefixes
        .iter()
        .flat_map(|p| (1..=254u8).map(move |host| format!("{}.{}.{}.{}", p[0], p[1], p[2], host)))
        .collect()
}

/// Races one existence probe per candidate host into a single-slot channel.
///
/// The first qualifying host wins; once a result is in (or the deadline
/// elapses) the remaining probes are cancelled rather than awaited.
pub(crate) async fn sweep_hosts(
    hosts: Vec<String>,
    transport: Arc<dyn KefTransport>,
    overall_timeout: Duration,
    cancel: &CancellationToken,
) -> DiscoveryResult<DeviceAddress> {
    let (tx, rx) = mpsc::channel::<DeviceAddress>(1);
    let race = cancel.child_token();

    for host in hosts {
        let tx = tx.clone();
        let race = race.clone();
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            tokio::select! {
                _ = race.cancelled() => {}
                qualified = transport.probe_existence(&host) => {
                    if qualified {
                        log::debug!("[Scan] Qualifying reply from {}", host);
                        // Losing sends fail on the full slot and are discarded.
                        let _ = tx.try_send(DeviceAddress::new(host));
                    }
                }
            }
        });
    }
    // Only probe tasks hold senders now, so the receiver closes once the
    // sweep has covered the full address space.
    drop(tx);

    super::await_race(rx, race, cancel, overall_timeout).await
}
