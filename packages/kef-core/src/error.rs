//! Centralized error types for the kef-core library.
//!
//! Component errors (`TransportError`, `DiscoveryError`) are defined next to
//! the code that produces them; this module provides the crate-wide umbrella
//! type and re-exports the per-component `Result` aliases.

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::transport::TransportError;

/// Application-wide error type for speaker control operations.
#[derive(Debug, Error)]
pub enum KefError {
    /// HTTP transport to the speaker failed (network error, non-2xx status,
    /// or malformed response envelope).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Speaker discovery failed (timeout, cancellation, or nothing found).
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Caller supplied an invalid value (e.g. unparseable volume input).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// Re-export Result type aliases from their defining modules
pub use crate::discovery::DiscoveryResult;
pub use crate::transport::TransportResult;

/// Convenient Result alias for controller-level operations.
pub type KefResult<T> = Result<T, KefError>;
