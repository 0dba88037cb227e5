//! kef-core - discovery and control for KEF network speakers.
//!
//! KEF wireless speakers (LSX, LS50 Wireless, ...) expose an HTTP control
//! API. This crate locates a speaker on the local network and keeps a
//! long-lived, concurrently readable view of its state.
//!
//! # Architecture
//!
//! - [`discovery`]: dual-strategy speaker discovery (SSDP multicast probe
//!   racing into a subnet sweep fallback)
//! - [`transport`]: HTTP client for the speaker's getData/setData API
//! - [`controller`]: state ownership, background refresh, volume and
//!   playback commands
//! - [`state`]: the speaker state aggregate and playback snapshot
//! - [`config`]: controller configuration
//! - [`error`]: centralized error types
//!
//! The [`transport::KefTransport`] trait decouples the controller and the
//! subnet sweep from the concrete HTTP client for testability.

#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod state;
pub mod transport;

// Re-export commonly used types at the crate root
pub use config::{ControllerConfig, DEFAULT_DISCOVERY_TIMEOUT};
pub use controller::SpeakerController;
pub use discovery::{discover, DeviceAddress, DiscoveryError, DiscoveryResult};
pub use error::{KefError, KefResult};
pub use state::{PlaybackInfo, SpeakerState};
pub use transport::{HttpTransport, KefTransport, TransportError, TransportResult};

// Re-export the cancellation primitive so binaries don't need a direct
// tokio-util dependency to drive discovery.
pub use tokio_util::sync::CancellationToken;
