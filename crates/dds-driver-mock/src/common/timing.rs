//! Timing configuration for realistic mode.

use std::time::Duration;

/// Delays applied by mock devices in [`MockMode::Realistic`](super::MockMode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Round-trip time of one serial command
    pub communication_delay_ms: u64,
    /// Extra time after a device reset
    pub reset_delay_ms: u64,
}

impl TimingConfig {
    /// Coherent DDS at 115200 baud: a profile line is ~30 bytes, ~3 ms.
    pub fn coherent_dds() -> Self {
        Self {
            communication_delay_ms: 3,
            reset_delay_ms: 50,
        }
    }

    /// Serial round-trip as a `Duration`.
    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    /// Reset settling as a `Duration`.
    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_instant() {
        assert_eq!(TimingConfig::default().communication_delay(), Duration::ZERO);
    }

    #[test]
    fn test_coherent_dds_reset_matches_firmware_wait() {
        assert_eq!(TimingConfig::coherent_dds().reset_delay(), Duration::from_millis(50));
    }
}
