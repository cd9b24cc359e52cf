//! Capability traits implemented by DDS drivers.
//!
//! Each trait covers one concern of the hardware so a driver only implements
//! what its device supports and callers depend on the narrowest interface.
//!
//! - [`ProfileProgrammable`]: serial profile programming and phase reset
//! - [`PulseShaping`]: envelope table upload
//! - [`TimedBus`]: real-time profile-select bus with a timeline cursor
//!
//! All traits are `Send + Sync` and async so drivers can share one serial
//! port between tasks.

use crate::pulse_shape::PulseShape;
use crate::timing::{BusTiming, ControlWord, MachineUnits, ScheduledSwitch};
use crate::words::{ProfileWords, WordCodec};
use anyhow::Result;
use async_trait::async_trait;

/// Devices whose profile registers can be programmed.
///
/// # Contract
///
/// - Validation happens before the first byte is sent; a rejected request
///   leaves the device untouched.
/// - Implementations do not retry failed transactions.
#[async_trait]
pub trait ProfileProgrammable: Send + Sync {
    /// Codec for this device's reference clock.
    fn codec(&self) -> WordCodec;

    /// Identification string reported by the device.
    ///
    /// Also serves as a round-trip check that earlier commands completed.
    async fn identity(&self) -> Result<String>;

    /// Write pre-quantized words to one profile slot.
    async fn write_profile_words(&self, channel: u8, profile: u8, words: ProfileWords)
        -> Result<()>;

    /// Quantize and write physical values to one profile slot.
    ///
    /// Returns the words that were written.
    async fn set_profile(
        &self,
        channel: u8,
        profile: u8,
        frequency_hz: f64,
        phase_deg: f64,
        amplitude: f64,
    ) -> Result<ProfileWords> {
        let words = self.codec().encode(frequency_hz, phase_deg, amplitude)?;
        self.write_profile_words(channel, profile, words).await?;
        Ok(words)
    }

    /// Reset the phase accumulators of all channels.
    async fn reset_phase(&self) -> Result<()>;

    /// Reset the device to its power-on state.
    async fn reset(&self) -> Result<()>;
}

/// Devices that play an amplitude envelope on the pulse-enable line.
#[async_trait]
pub trait PulseShaping: Send + Sync {
    /// Upload `shape` to the table of `channel`.
    async fn load_pulse_shape(&self, channel: u8, shape: &PulseShape) -> Result<()>;
}

/// Real-time bus with an explicit timeline cursor.
///
/// The cursor (`now_mu`) only moves forward. `write_at` may target a point
/// before the cursor, which is how switches are issued ahead of their
/// activation instant, but never one that overlaps the previous transfer.
#[async_trait]
pub trait TimedBus: Send + Sync {
    /// Link timing.
    fn timing(&self) -> BusTiming;

    /// Current timeline cursor.
    fn now_mu(&self) -> MachineUnits;

    /// Queue `word` to start shifting out at `at_mu`.
    async fn write_at(&self, at_mu: MachineUnits, word: u32) -> Result<()>;

    /// Advance the cursor by `duration_mu` (must be non-negative).
    async fn delay_mu(&self, duration_mu: MachineUnits) -> Result<()>;

    /// Issue a switch that becomes active at the current cursor.
    ///
    /// The word is written `lead_mu` before the cursor and the cursor is
    /// advanced by `settle_mu` before returning, so back-to-back switches can
    /// never collide on the bus.
    async fn schedule_switch(&self, word: ControlWord) -> Result<ScheduledSwitch> {
        let timing = self.timing().profile_timing();
        let active_at_mu = self.now_mu();
        let write_at_mu = active_at_mu - timing.lead_mu;

        self.write_at(write_at_mu, word.spi_word()).await?;
        self.delay_mu(timing.settle_mu).await?;

        Ok(ScheduledSwitch {
            write_at_mu,
            active_at_mu,
            released_at_mu: self.now_mu(),
        })
    }
}
