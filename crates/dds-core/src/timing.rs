//! Profile-select bus timing and control words.
//!
//! Profile switches travel over a real-time SPI link as one control byte per
//! transfer. The byte takes `xfer_period` to shift out and the DDS needs a
//! fixed latency after that before the new profile appears at the output, so
//! every switch is written *ahead* of its activation instant and the timeline
//! is held back until the bus is free again.
//!
//! All durations are machine units (mu) of 1 ns.

use crate::error::DdsResult;
use crate::words::{check_channel, check_profile};
use serde::{Deserialize, Serialize};

/// Signed timeline position or duration in nanoseconds.
pub type MachineUnits = i64;

/// Latency of the board between the last SPI bit and the output switch.
pub const DEFAULT_DDS_LATENCY_MU: MachineUnits = 1300;

/// Parameters of the SPI link that carries profile-select words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusTiming {
    /// Coarse RTIO reference period.
    pub ref_period_mu: MachineUnits,
    /// SPI clock divider relative to the reference period.
    pub clock_div: MachineUnits,
    /// Output latency of the DDS after a completed transfer.
    pub dds_latency_mu: MachineUnits,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            ref_period_mu: 8,
            clock_div: 2,
            dds_latency_mu: DEFAULT_DDS_LATENCY_MU,
        }
    }
}

impl BusTiming {
    /// One SPI bit.
    pub fn write_period_mu(&self) -> MachineUnits {
        self.clock_div * self.ref_period_mu
    }

    /// One 8-bit transfer.
    pub fn xfer_period_mu(&self) -> MachineUnits {
        8 * self.write_period_mu()
    }

    /// Lead and settle delays for a profile switch.
    pub fn profile_timing(&self) -> ProfileTiming {
        ProfileTiming {
            lead_mu: self.dds_latency_mu + self.xfer_period_mu() + self.write_period_mu(),
            settle_mu: self.xfer_period_mu() + self.write_period_mu() + self.ref_period_mu,
        }
    }
}

/// Offsets around the activation instant of a profile switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileTiming {
    /// How far before activation the word is written.
    pub lead_mu: MachineUnits,
    /// How long after activation the timeline stays blocked.
    pub settle_mu: MachineUnits,
}

/// Result of a scheduled switch, in absolute timeline positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSwitch {
    /// When the control word starts shifting out.
    pub write_at_mu: MachineUnits,
    /// When the new setting is live at the output.
    pub active_at_mu: MachineUnits,
    /// Timeline cursor after the call.
    pub released_at_mu: MachineUnits,
}

/// Function of a control word (bits 7-6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectMode {
    /// Bits 3-0 carry the profile index.
    Profile = 0,
    /// Bit 0 drives the pulse-shape enable line.
    PulseEnable = 1,
}

/// One profile-select bus byte.
///
/// Layout: `mode[7:6] | channel[5:4] | data[3:0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord(u8);

impl ControlWord {
    /// Switch `channel` to `profile`.
    pub fn profile(channel: u8, profile: u8) -> DdsResult<Self> {
        check_channel(channel)?;
        check_profile(profile)?;
        Ok(Self::pack(SelectMode::Profile, channel, profile & 0x7))
    }

    /// Drive the pulse-enable line of `channel`.
    pub fn pulse_enable(channel: u8, enable: bool) -> DdsResult<Self> {
        check_channel(channel)?;
        Ok(Self::pack(SelectMode::PulseEnable, channel, u8::from(enable)))
    }

    fn pack(mode: SelectMode, channel: u8, data: u8) -> Self {
        Self(((mode as u8) << 6) | ((channel & 0x3) << 4) | (data & 0xf))
    }

    /// Raw byte.
    pub fn byte(self) -> u8 {
        self.0
    }

    /// Byte left-aligned in a 32-bit SPI word.
    pub fn spi_word(self) -> u32 {
        u32::from(self.0) << 24
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timing() {
        let t = BusTiming::default();
        assert_eq!(t.write_period_mu(), 16);
        assert_eq!(t.xfer_period_mu(), 128);
        let p = t.profile_timing();
        assert_eq!(p.lead_mu, 1300 + 128 + 16);
        assert_eq!(p.settle_mu, 128 + 16 + 8);
    }

    #[test]
    fn settle_covers_one_transfer() {
        let t = BusTiming::default();
        assert!(t.profile_timing().settle_mu >= t.xfer_period_mu());
    }

    #[test]
    fn control_word_layout() {
        let w = ControlWord::profile(2, 5).unwrap();
        assert_eq!(w.byte(), 0b00_10_0101);
        assert_eq!(w.spi_word(), 0x2500_0000);

        let e = ControlWord::pulse_enable(3, true).unwrap();
        assert_eq!(e.byte(), 0b01_11_0001);
        assert_eq!(ControlWord::pulse_enable(3, false).unwrap().byte(), 0b01_11_0000);
    }

    #[test]
    fn control_word_rejects_bad_indices() {
        assert!(ControlWord::profile(4, 0).is_err());
        assert!(ControlWord::profile(0, 8).is_err());
    }
}
