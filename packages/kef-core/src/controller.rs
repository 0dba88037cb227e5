//! Speaker controller: state ownership and background refresh.
//!
//! [`SpeakerController`] owns the single authoritative [`SpeakerState`] for
//! the connected speaker. All mutation happens under the write half of one
//! `RwLock`; external reads go through [`SpeakerController::snapshot`] and
//! receive a full clone, so no caller can observe a torn state. The lock is
//! never held across an await.
//!
//! After a successful [`connect`](SpeakerController::connect) a background
//! refresh loop re-reads volume and playback on a fixed cadence until
//! [`close`](SpeakerController::close) cancels it. A started-flag makes
//! repeated connects idempotent: only the first successful connect spawns
//! the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::error::{KefError, KefResult};
use crate::state::{model_from_release_text, PlaybackInfo, SpeakerState};
use crate::transport::{
    KefTransport, TransportError, TransportResult, PATH_PLAYER_CONTROL, PATH_PLAYER_DATA,
    PATH_RELEASE_TEXT, PATH_VOLUME, ROLE_ACTIVATE, ROLE_VALUE,
};

/// Upper bound of the speaker volume range.
pub const MAX_VOLUME: u8 = 100;

/// Delay before the best-effort playback refresh after a track skip, giving
/// the speaker time to switch tracks.
const SKIP_REFRESH_DELAY: Duration = Duration::from_millis(500);

const CONTROL_NEXT: &str = "next";
const CONTROL_PREVIOUS: &str = "previous";

/// Long-lived controller for one KEF speaker.
pub struct SpeakerController {
    transport: Arc<dyn KefTransport>,
    state: Arc<RwLock<SpeakerState>>,
    config: ControllerConfig,
    cancel: CancellationToken,
    /// Guards the refresh loop against double-spawn on repeated connects.
    poll_started: AtomicBool,
}

impl SpeakerController {
    /// Creates a controller with an empty state aggregate.
    pub fn new(transport: Arc<dyn KefTransport>, config: ControllerConfig) -> Self {
        let state = SpeakerState {
            port: config.port,
            ..Default::default()
        };
        Self {
            transport,
            state: Arc::new(RwLock::new(state)),
            config,
            cancel: CancellationToken::new(),
            poll_started: AtomicBool::new(false),
        }
    }

    /// Sets the speaker host address and clears any stale error.
    pub fn set_host(&self, host: &str) {
        self.transport.set_host(host);
        let mut state = self.state.write();
        state.host = Some(host.to_string());
        state.last_error = None;
    }

    /// Returns a full copy of the current speaker state.
    pub fn snapshot(&self) -> SpeakerState {
        self.state.read().clone()
    }

    /// Establishes a connection to the speaker.
    ///
    /// A volume read doubles as the reachability probe and the first state
    /// refresh. On success the model is detected (best-effort) and the
    /// background refresh loop is started; calling `connect` again while
    /// already connected never spawns a second loop.
    pub async fn connect(&self) -> KefResult<()> {
        if self.state.read().host.is_none() {
            return Err(KefError::Transport(TransportError::NoHostConfigured));
        }

        match self.transport.get_int(PATH_VOLUME).await {
            Ok(volume) => {
                let mut state = self.state.write();
                state.connected = true;
                state.volume = clamp_volume(volume);
                state.last_error = None;
            }
            Err(e) => {
                {
                    let mut state = self.state.write();
                    state.connected = false;
                    state.last_error = Some(e.to_string());
                }
                return Err(e.into());
            }
        }

        match self.transport.get_string(PATH_RELEASE_TEXT).await {
            Ok(release) => {
                let model = model_from_release_text(&release);
                if let Some(model) = &model {
                    log::info!("[Controller] Speaker model detected: {}", model);
                }
                self.state.write().model = model;
            }
            Err(e) => log::warn!("[Controller] Could not read speaker model: {}", e),
        }

        if !self.poll_started.swap(true, Ordering::SeqCst) {
            self.spawn_refresh_loop();
        }

        Ok(())
    }

    /// Stops the background refresh loop and any pending detached refreshes.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Reads the current volume from the speaker and folds it into state.
    pub async fn volume(&self) -> KefResult<u8> {
        match self.transport.get_int(PATH_VOLUME).await {
            Ok(volume) => {
                let volume = clamp_volume(volume);
                self.state.write().volume = volume;
                Ok(volume)
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Sets the volume, clamped to 0-100.
    ///
    /// On transport success the state is updated optimistically to the
    /// clamped value rather than re-read from the device; on failure the
    /// previous value stays in place.
    pub async fn set_volume(&self, level: u8) -> KefResult<()> {
        let level = level.min(MAX_VOLUME);
        match self.transport.set_int(PATH_VOLUME, i32::from(level)).await {
            Ok(()) => {
                self.state.write().volume = level;
                Ok(())
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Raises the volume by the configured step, saturating at 100.
    pub async fn volume_up(&self) -> KefResult<()> {
        let current = self.state.read().volume;
        self.set_volume(current.saturating_add(self.config.volume_step))
            .await
    }

    /// Lowers the volume by the configured step, saturating at 0.
    pub async fn volume_down(&self) -> KefResult<()> {
        let current = self.state.read().volume;
        self.set_volume(current.saturating_sub(self.config.volume_step))
            .await
    }

    /// Skips to the next track.
    pub async fn next_track(&self) -> KefResult<()> {
        self.skip(CONTROL_NEXT).await
    }

    /// Returns to the previous track.
    pub async fn previous_track(&self) -> KefResult<()> {
        self.skip(CONTROL_PREVIOUS).await
    }

    async fn skip(&self, control: &str) -> KefResult<()> {
        let payload = format!(r#"{{"control":"{}"}}"#, control);
        match self
            .transport
            .set_data(PATH_PLAYER_CONTROL, ROLE_ACTIVATE, &payload)
            .await
        {
            Ok(()) => {
                self.schedule_playback_refresh();
                Ok(())
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Re-reads now-playing data from the speaker and folds it into state.
    pub async fn refresh_playback(&self) -> KefResult<PlaybackInfo> {
        match refresh_playback(&self.transport, &self.state).await {
            Ok(info) => Ok(info),
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Detached, intentionally lossy refresh after a track skip: the speaker
    /// needs a moment to react, so the read is delayed, and a failure is
    /// only logged - there is no caller-visible error channel.
    fn schedule_playback_refresh(&self) {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(SKIP_REFRESH_DELAY) => {
                    if let Err(e) = refresh_playback(&transport, &state).await {
                        log::debug!("[Controller] Post-skip playback refresh failed: {}", e);
                    }
                }
            }
        });
    }

    fn spawn_refresh_loop(&self) {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let poll_interval = self.config.poll_interval;
        tokio::spawn(async move {
            refresh_loop(transport, state, cancel, poll_interval).await;
        });
    }

    /// Caches the failure message in state and converts the error.
    fn record_failure(&self, e: TransportError) -> KefError {
        self.state.write().last_error = Some(e.to_string());
        e.into()
    }
}

impl Drop for SpeakerController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(0, i32::from(MAX_VOLUME)) as u8
}

async fn refresh_playback(
    transport: &Arc<dyn KefTransport>,
    state: &Arc<RwLock<SpeakerState>>,
) -> TransportResult<PlaybackInfo> {
    let envelope = transport.get_data(PATH_PLAYER_DATA, ROLE_VALUE).await?;
    let data = envelope
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| TransportError::Malformed("empty playback response".to_string()))?;
    let info = PlaybackInfo::from_player_data(data);
    state.write().playback = Some(info.clone());
    Ok(info)
}

/// Background refresh loop: re-reads volatile fields each tick while
/// connected. A failed poll is recorded in state but never stops the loop;
/// only cancellation does.
async fn refresh_loop(
    transport: Arc<dyn KefTransport>,
    state: Arc<RwLock<SpeakerState>>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let start = tokio::time::Instant::now() + poll_interval;
    let mut ticker = tokio::time::interval_at(start, poll_interval);

    loop {
        tokio::select! {
            // Cancellation wins over a pending tick so the loop never polls
            // after close().
            biased;
            _ = cancel.cancelled() => {
                log::debug!("[Controller] Refresh loop stopped");
                return;
            }
            _ = ticker.tick() => {
                if !state.read().connected {
                    continue;
                }
                if let Err(e) = refresh_tick(&transport, &state).await {
                    state.write().last_error = Some(e.to_string());
                }
            }
        }
    }
}

async fn refresh_tick(
    transport: &Arc<dyn KefTransport>,
    state: &Arc<RwLock<SpeakerState>>,
) -> TransportResult<()> {
    let volume = transport.get_int(PATH_VOLUME).await?;
    state.write().volume = clamp_volume(volume);
    refresh_playback(transport, state).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize};

    #[derive(Default)]
    struct MockTransport {
        volume: AtomicI32,
        fail: AtomicBool,
        playback_reads: AtomicUsize,
    }

    #[async_trait]
    impl KefTransport for MockTransport {
        fn set_host(&self, _host: &str) {}

        async fn get_data(&self, path: &str, _roles: &str) -> TransportResult<Value> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::HttpStatus(500));
            }
            match path {
                PATH_VOLUME => Ok(json!([
                    {"type": "i32_", "i32_": self.volume.load(Ordering::SeqCst)}
                ])),
                PATH_RELEASE_TEXT => Ok(json!([
                    {"type": "string_", "string_": "LSXII_4.0.1"}
                ])),
                PATH_PLAYER_DATA => {
                    self.playback_reads.fetch_add(1, Ordering::SeqCst);
                    Ok(json!([{
                        "state": "playing",
                        "status": {"duration": 180000},
                        "trackRoles": {"title": "Song"}
                    }]))
                }
                _ => Err(TransportError::Malformed(format!("unexpected path {}", path))),
            }
        }

        async fn set_data(&self, path: &str, roles: &str, value: &str) -> TransportResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::HttpStatus(500));
            }
            if path == PATH_VOLUME && roles == ROLE_VALUE {
                let payload: Value = serde_json::from_str(value).unwrap();
                let level = payload["i32_"].as_i64().unwrap() as i32;
                self.volume.store(level, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn probe_existence(&self, _host: &str) -> bool {
            false
        }
    }

    fn controller_with(mock: Arc<MockTransport>, poll_interval: Duration) -> SpeakerController {
        let config = ControllerConfig {
            poll_interval,
            ..Default::default()
        };
        let controller = SpeakerController::new(mock, config);
        controller.set_host("192.168.1.50");
        controller
    }

    #[tokio::test]
    async fn connect_reflects_device_state() {
        let mock = Arc::new(MockTransport::default());
        mock.volume.store(42, Ordering::SeqCst);
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));

        controller.connect().await.unwrap();

        let snapshot = controller.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.volume, 42);
        assert_eq!(snapshot.model.as_deref(), Some("LSXII"));
        assert!(snapshot.last_error.is_none());
        controller.close();
    }

    #[tokio::test]
    async fn connect_without_host_fails() {
        let mock = Arc::new(MockTransport::default());
        let controller =
            SpeakerController::new(Arc::clone(&mock) as Arc<dyn KefTransport>, Default::default());

        let result = controller.connect().await;
        assert!(matches!(
            result,
            Err(KefError::Transport(TransportError::NoHostConfigured))
        ));
    }

    #[tokio::test]
    async fn connect_failure_marks_disconnected() {
        let mock = Arc::new(MockTransport::default());
        mock.fail.store(true, Ordering::SeqCst);
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));

        assert!(controller.connect().await.is_err());

        let snapshot = controller.snapshot();
        assert!(!snapshot.connected);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn set_volume_clamps_and_updates_optimistically() {
        let mock = Arc::new(MockTransport::default());
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));

        controller.set_volume(150).await.unwrap();

        assert_eq!(controller.snapshot().volume, 100);
        assert_eq!(mock.volume.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn set_volume_failure_leaves_state_unchanged() {
        let mock = Arc::new(MockTransport::default());
        mock.volume.store(42, Ordering::SeqCst);
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));
        controller.connect().await.unwrap();

        mock.fail.store(true, Ordering::SeqCst);
        assert!(controller.set_volume(80).await.is_err());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.volume, 42);
        assert!(snapshot.last_error.is_some());
        controller.close();
    }

    #[tokio::test]
    async fn volume_steps_saturate_at_bounds() {
        let mock = Arc::new(MockTransport::default());
        mock.volume.store(42, Ordering::SeqCst);
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));
        controller.connect().await.unwrap();

        controller.volume_up().await.unwrap();
        assert_eq!(controller.snapshot().volume, 47);

        controller.set_volume(98).await.unwrap();
        controller.volume_up().await.unwrap();
        assert_eq!(controller.snapshot().volume, 100);

        controller.set_volume(3).await.unwrap();
        controller.volume_down().await.unwrap();
        assert_eq!(controller.snapshot().volume, 0);
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_keeps_a_single_refresh_loop() {
        let mock = Arc::new(MockTransport::default());
        let controller = controller_with(Arc::clone(&mock), Duration::from_millis(10));

        controller.connect().await.unwrap();
        controller.connect().await.unwrap();

        // 10 ticks in the window; a duplicated loop would double the reads.
        tokio::time::sleep(Duration::from_millis(105)).await;
        assert_eq!(mock.playback_reads.load(Ordering::SeqCst), 10);
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_refresh_loop() {
        let mock = Arc::new(MockTransport::default());
        let controller = controller_with(Arc::clone(&mock), Duration::from_millis(10));
        controller.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(55)).await;
        let before = mock.playback_reads.load(Ordering::SeqCst);
        assert!(before > 0);

        controller.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mock.playback_reads.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_survives_failed_polls() {
        let mock = Arc::new(MockTransport::default());
        let controller = controller_with(Arc::clone(&mock), Duration::from_millis(10));
        controller.connect().await.unwrap();

        mock.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(controller.snapshot().last_error.is_some());

        mock.fail.store(false, Ordering::SeqCst);
        let before = mock.playback_reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(mock.playback_reads.load(Ordering::SeqCst) > before);
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn track_skip_schedules_delayed_refresh() {
        let mock = Arc::new(MockTransport::default());
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));
        controller.connect().await.unwrap();

        let before = mock.playback_reads.load(Ordering::SeqCst);
        controller.next_track().await.unwrap();

        // Refresh happens around 500ms after the skip, not inline.
        assert_eq!(mock.playback_reads.load(Ordering::SeqCst), before);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(mock.playback_reads.load(Ordering::SeqCst), before + 1);
        assert!(controller.snapshot().playback.is_some());
        controller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn track_skip_refresh_failure_is_swallowed() {
        let mock = Arc::new(MockTransport::default());
        let controller = controller_with(Arc::clone(&mock), Duration::from_secs(60));
        controller.connect().await.unwrap();

        controller.next_track().await.unwrap();
        mock.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(600)).await;

        // The detached refresh failed silently; the controller stays usable.
        mock.fail.store(false, Ordering::SeqCst);
        assert!(controller.volume().await.is_ok());
        controller.close();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshot_is_never_torn() {
        let mock = Arc::new(MockTransport::default());
        mock.volume.store(42, Ordering::SeqCst);
        let controller = Arc::new(controller_with(Arc::clone(&mock), Duration::from_secs(60)));

        // connect() writes connected+volume under one lock acquisition;
        // readers must never see the connected flag without the volume.
        let mut readers = Vec::new();
        for _ in 0..4 {
            let controller = Arc::clone(&controller);
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let snapshot = controller.snapshot();
                    if snapshot.connected {
                        assert_eq!(snapshot.volume, 42);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        controller.connect().await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        controller.close();
    }
}
