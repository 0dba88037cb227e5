//! Controller configuration.

use std::time::Duration;

/// Default speaker API port.
pub const DEFAULT_PORT: u16 = 80;

/// Default interval between background state refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default timeout for control API requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default volume change per step command.
pub const DEFAULT_VOLUME_STEP: u8 = 5;

/// Default overall discovery budget, split between the multicast probe
/// and the subnet sweep.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`SpeakerController`](crate::SpeakerController).
///
/// Values are fixed for the controller's lifetime; build a new controller
/// to change them.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Speaker HTTP API port.
    pub port: u16,

    /// Interval between background refresh ticks.
    pub poll_interval: Duration,

    /// Timeout applied to individual transport requests.
    pub connect_timeout: Duration,

    /// Volume delta for `volume_up` / `volume_down`.
    pub volume_step: u8,
}

impl ControllerConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.volume_step == 0 {
            return Err("volume_step must be >= 1".to_string());
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be non-zero".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            volume_step: DEFAULT_VOLUME_STEP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_volume_step_is_rejected() {
        let config = ControllerConfig {
            volume_step: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = ControllerConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
