//! Dual-strategy speaker discovery.
//!
//! Two strategies run in sequence under a shared overall budget:
//!
//! 1. **Multicast probe** ([`ssdp`]): SSDP M-SEARCH on every usable
//!    interface in parallel. Fast and cheap when the speaker advertises
//!    itself.
//! 2. **Subnet sweep** ([`scan`]): brute-force existence probes across every
//!    local /24. Slow and bandwidth-heavy, used only when multicast yields
//!    nothing.
//!
//! [`discover`] splits the budget in half between the stages, so worst-case
//! total latency is bounded by the overall timeout. Within each stage the
//! first qualifying result wins; losing probes are discarded, never queued.

pub mod scan;
pub mod ssdp;
pub mod types;

pub use types::{DeviceAddress, DiscoveryError, DiscoveryResult};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::KefTransport;

/// Attempts to locate a KEF speaker on the network.
///
/// Runs the multicast probe with half of `overall_timeout`; on any probe
/// failure (timeout, cancellation, nothing found) falls back to the subnet
/// sweep with the other half and returns its outcome verbatim.
pub async fn discover(
    overall_timeout: Duration,
    transport: Arc<dyn KefTransport>,
    cancel: &CancellationToken,
) -> DiscoveryResult<DeviceAddress> {
    let stage_budget = overall_timeout / 2;
    discover_with(
        || ssdp::probe(stage_budget, cancel),
        || scan::sweep(stage_budget, transport, cancel),
    )
    .await
}

/// Two-stage orchestration over injectable strategy futures.
///
/// Split out from [`discover`] so tests can verify the fallback policy with
/// fake stages: the sweep closure is only invoked when the multicast stage
/// fails.
async fn discover_with<M, MF, S, SF>(multicast: M, sweep: S) -> DiscoveryResult<DeviceAddress>
where
    M: FnOnce() -> MF,
    MF: Future<Output = DiscoveryResult<DeviceAddress>>,
    S: FnOnce() -> SF,
    SF: Future<Output = DiscoveryResult<DeviceAddress>>,
{
    match multicast().await {
        Ok(addr) => {
            log::info!("[Discovery] Multicast probe found speaker at {}", addr);
            Ok(addr)
        }
        Err(e) => {
            log::debug!(
                "[Discovery] Multicast probe failed ({}); falling back to subnet sweep",
                e
            );
            sweep().await
        }
    }
}

/// Waits for the first winner of a probe race.
///
/// The single-capacity channel is the handoff slot: whichever probe task's
/// `try_send` lands first is authoritative and every later send is discarded.
/// `rx` yielding `None` means all probe tasks finished without a qualifying
/// reply. On any outcome the `race` token is cancelled so losing probes
/// release their sockets promptly.
pub(crate) async fn await_race(
    mut rx: mpsc::Receiver<DeviceAddress>,
    race: CancellationToken,
    cancel: &CancellationToken,
    overall_timeout: Duration,
) -> DiscoveryResult<DeviceAddress> {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoveryError::Cancelled),
        res = rx.recv() => match res {
            Some(addr) => Ok(addr),
            None => Err(DiscoveryError::NoDeviceFound),
        },
        _ = tokio::time::sleep(overall_timeout) => Err(DiscoveryError::Timeout(overall_timeout)),
    };
    race.cancel();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn multicast_success_skips_sweep() {
        let sweep_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&sweep_calls);

        let result = discover_with(
            || async { Ok(DeviceAddress::new("192.168.1.10")) },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(DiscoveryError::NoDeviceFound) }
            },
        )
        .await;

        assert_eq!(result.unwrap().host, "192.168.1.10");
        assert_eq!(sweep_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn multicast_failure_falls_back_to_sweep() {
        let sweep_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&sweep_calls);

        let result = discover_with(
            || async { Err(DiscoveryError::Timeout(Duration::from_secs(5))) },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(DeviceAddress::new("192.168.1.37")) }
            },
        )
        .await;

        assert_eq!(result.unwrap().host, "192.168.1.37");
        assert_eq!(sweep_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_failure_is_returned_verbatim() {
        let result = discover_with(
            || async { Err(DiscoveryError::NoDeviceFound) },
            || async { Err(DiscoveryError::Timeout(Duration::from_secs(5))) },
        )
        .await;

        assert!(matches!(result, Err(DiscoveryError::Timeout(_))));
    }

    #[tokio::test]
    async fn await_race_returns_first_winner() {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let race = cancel.child_token();

        tx.try_send(DeviceAddress::new("192.168.1.5")).unwrap();
        // A second send loses the race and is discarded, not queued.
        assert!(tx.try_send(DeviceAddress::new("192.168.1.6")).is_err());
        drop(tx);

        let result = await_race(rx, race, &cancel, Duration::from_secs(1)).await;
        assert_eq!(result.unwrap().host, "192.168.1.5");
    }

    #[tokio::test]
    async fn await_race_reports_no_device_when_all_probes_finish() {
        let (tx, rx) = mpsc::channel::<DeviceAddress>(1);
        let cancel = CancellationToken::new();
        let race = cancel.child_token();
        drop(tx);

        let result = await_race(rx, race, &cancel, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(DiscoveryError::NoDeviceFound)));
    }

    #[tokio::test]
    async fn await_race_honors_cancellation() {
        let (_tx, rx) = mpsc::channel::<DeviceAddress>(1);
        let cancel = CancellationToken::new();
        let race = cancel.child_token();
        cancel.cancel();

        let result = await_race(rx, race.clone(), &cancel, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
        assert!(race.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn await_race_times_out() {
        let (_tx, rx) = mpsc::channel::<DeviceAddress>(1);
        let cancel = CancellationToken::new();
        let race = cancel.child_token();

        let result = await_race(rx, race, &cancel, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(DiscoveryError::Timeout(_))));
    }
}
