//! Frequency/phase/amplitude word codec.
//!
//! The DDS stores each profile as three integers: a 32-bit frequency tuning
//! word, a 16-bit phase offset word and a 14-bit amplitude scale factor.
//! [`WordCodec`] converts physical values to those words for a fixed
//! reference clock and rejects anything the hardware cannot represent.
//!
//! ```rust,ignore
//! use dds_core::words::WordCodec;
//!
//! let codec = WordCodec::new(1e9)?;
//! let words = codec.encode(200e6, 90.0, 0.5)?;
//! assert_eq!(words.amplitude, 8192);
//! ```

use crate::error::{check_range, DdsError, DdsResult};
use serde::{Deserialize, Serialize};

/// Full-scale amplitude word (14 bit).
pub const AMPLITUDE_WORD_MAX: u16 = 0x3fff;
/// Full-scale phase word (16 bit).
pub const PHASE_WORD_MAX: u16 = 0xffff;
/// Full-scale frequency word (32 bit).
pub const FREQUENCY_WORD_MAX: u32 = u32::MAX;

/// Number of output channels.
pub const NUM_CHANNELS: u8 = 4;
/// Number of profile slots per channel.
pub const NUM_PROFILES: u8 = 8;
/// Profile used as "on" by convention.
pub const ON_PROFILE: u8 = 0;
/// Profile reserved as "off" (zero amplitude).
pub const OFF_PROFILE: u8 = 7;

/// Default reference clock of the coherent DDS board.
pub const DEFAULT_CLOCK_HZ: f64 = 1e9;
/// Highest output frequency the board is specified for.
pub const DEFAULT_MAX_FREQUENCY_HZ: f64 = 450e6;

/// Raw words for one profile slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileWords {
    /// Frequency tuning word.
    pub frequency: u32,
    /// Phase offset word.
    pub phase: u16,
    /// Amplitude scale factor, at most [`AMPLITUDE_WORD_MAX`].
    pub amplitude: u16,
}

impl ProfileWords {
    /// Validate raw integers against the field widths.
    ///
    /// Accepts wide signed inputs so callers forwarding user-supplied integers
    /// get a range error naming the field instead of a silent truncation.
    pub fn checked(frequency: i64, phase: i64, amplitude: i64) -> DdsResult<Self> {
        let frequency = u32::try_from(frequency).map_err(|_| {
            DdsError::range(
                "frequency_word",
                frequency as f64,
                0.0,
                f64::from(FREQUENCY_WORD_MAX),
            )
        })?;
        let phase = u16::try_from(phase).map_err(|_| {
            DdsError::range("phase_word", phase as f64, 0.0, f64::from(PHASE_WORD_MAX))
        })?;
        let amplitude = u16::try_from(amplitude)
            .ok()
            .filter(|a| *a <= AMPLITUDE_WORD_MAX)
            .ok_or_else(|| {
                DdsError::range(
                    "amplitude_word",
                    amplitude as f64,
                    0.0,
                    f64::from(AMPLITUDE_WORD_MAX),
                )
            })?;

        Ok(Self {
            frequency,
            phase,
            amplitude,
        })
    }

    /// True if the amplitude word is zero.
    pub fn is_silent(&self) -> bool {
        self.amplitude == 0
    }
}

/// Reject channel indices outside 0..=3.
pub fn check_channel(channel: u8) -> DdsResult<()> {
    if channel < NUM_CHANNELS {
        Ok(())
    } else {
        Err(DdsError::range(
            "channel",
            f64::from(channel),
            0.0,
            f64::from(NUM_CHANNELS - 1),
        ))
    }
}

/// Reject profile indices outside 0..=7.
pub fn check_profile(profile: u8) -> DdsResult<()> {
    if profile < NUM_PROFILES {
        Ok(())
    } else {
        Err(DdsError::range(
            "profile",
            f64::from(profile),
            0.0,
            f64::from(NUM_PROFILES - 1),
        ))
    }
}

/// Converts physical values to profile words for one reference clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordCodec {
    clock_hz: f64,
    max_frequency_hz: f64,
}

impl WordCodec {
    /// Codec with the default 450 MHz output ceiling.
    pub fn new(clock_hz: f64) -> DdsResult<Self> {
        Self::with_max_frequency(clock_hz, DEFAULT_MAX_FREQUENCY_HZ)
    }

    /// Codec with an explicit output ceiling.
    pub fn with_max_frequency(clock_hz: f64, max_frequency_hz: f64) -> DdsResult<Self> {
        if !(clock_hz.is_finite() && clock_hz > 0.0) {
            return Err(DdsError::range("clock", clock_hz, f64::MIN_POSITIVE, f64::MAX));
        }
        // The tuning word must be able to express the ceiling.
        let ceiling = clock_hz * f64::from(FREQUENCY_WORD_MAX) / 4_294_967_296.0;
        check_range("max_frequency", max_frequency_hz, 0.0, ceiling)?;
        Ok(Self {
            clock_hz,
            max_frequency_hz,
        })
    }

    /// Reference clock.
    pub fn clock_hz(&self) -> f64 {
        self.clock_hz
    }

    /// Highest accepted output frequency.
    pub fn max_frequency_hz(&self) -> f64 {
        self.max_frequency_hz
    }

    /// Frequency step of one tuning-word LSB (`clock / 2^32`).
    pub fn lsb_frequency_hz(&self) -> f64 {
        self.clock_hz / 4_294_967_296.0
    }

    /// Phase step of one phase-word LSB in degrees.
    pub fn lsb_phase_deg(&self) -> f64 {
        360.0 / 65_536.0
    }

    /// Amplitude step of one amplitude-word LSB.
    pub fn lsb_amplitude(&self) -> f64 {
        1.0 / f64::from(AMPLITUDE_WORD_MAX)
    }

    /// Nearest representable frequency.
    pub fn lsb_round(&self, frequency_hz: f64) -> f64 {
        let lsb = self.lsb_frequency_hz();
        (frequency_hz / lsb).round() * lsb
    }

    /// Quantize physical values into profile words.
    ///
    /// Phase is taken modulo 360 degrees, so `phase` and `phase + 360k`
    /// encode identically.
    pub fn encode(
        &self,
        frequency_hz: f64,
        phase_deg: f64,
        amplitude: f64,
    ) -> DdsResult<ProfileWords> {
        check_range("amplitude", amplitude, 0.0, 1.0)?;
        check_range("frequency", frequency_hz, 0.0, self.max_frequency_hz)?;
        if !phase_deg.is_finite() {
            return Err(DdsError::range("phase", phase_deg, f64::MIN, f64::MAX));
        }

        let amplitude_word = (amplitude * f64::from(AMPLITUDE_WORD_MAX)).round() as i64;
        let phase_word =
            (phase_deg.rem_euclid(360.0) / 360.0 * f64::from(PHASE_WORD_MAX)).round() as i64;
        let frequency_word = (frequency_hz / self.lsb_frequency_hz()).round() as i64;

        ProfileWords::checked(frequency_word, phase_word, amplitude_word)
    }

    /// Physical values represented by a set of words.
    ///
    /// Returns `(frequency_hz, phase_deg, amplitude)`.
    pub fn decode(&self, words: &ProfileWords) -> (f64, f64, f64) {
        (
            f64::from(words.frequency) * self.lsb_frequency_hz(),
            f64::from(words.phase) / f64::from(PHASE_WORD_MAX) * 360.0,
            f64::from(words.amplitude) / f64::from(AMPLITUDE_WORD_MAX),
        )
    }
}

impl Default for WordCodec {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY_HZ,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> WordCodec {
        WordCodec::new(1e9).unwrap()
    }

    #[test]
    fn decode_is_within_one_lsb() {
        let codec = codec();
        for &(f, p, a) in &[
            (0.0, 0.0, 0.0),
            (80e6, 12.5, 0.25),
            (217.368_555e6, 359.9, 1.0),
            (450e6, 180.0, 0.5),
        ] {
            let words = codec.encode(f, p, a).unwrap();
            let (fd, pd, ad) = codec.decode(&words);
            assert!((fd - f).abs() <= codec.lsb_frequency_hz());
            assert!((ad - a).abs() <= codec.lsb_amplitude());
            // 359.9 wraps to the top word, compare on the circle
            let dp = (pd - p).rem_euclid(360.0);
            assert!(dp.min(360.0 - dp) <= codec.lsb_phase_deg() * 1.01);
        }
    }

    #[test]
    fn phase_is_periodic() {
        let codec = codec();
        let base = codec.encode(100e6, 37.0, 0.3).unwrap();
        for k in [-3.0, -1.0, 1.0, 5.0] {
            let shifted = codec.encode(100e6, 37.0 + 360.0 * k, 0.3).unwrap();
            assert_eq!(base, shifted);
        }
    }

    #[test]
    fn negative_phase_wraps() {
        let codec = codec();
        let words = codec.encode(1e6, -90.0, 1.0).unwrap();
        assert_eq!(words.phase, (0.75f64 * 65535.0).round() as u16);
    }

    #[test]
    fn amplitude_out_of_range_is_rejected() {
        let codec = codec();
        for amp in [-0.01, 1.01] {
            let err = codec.encode(10e6, 0.0, amp).unwrap_err();
            assert_eq!(err.field(), Some("amplitude"));
        }
    }

    #[test]
    fn frequency_above_ceiling_is_rejected() {
        let err = codec().encode(451e6, 0.0, 1.0).unwrap_err();
        assert_eq!(err.field(), Some("frequency"));
    }

    #[test]
    fn full_scale_words() {
        let words = codec().encode(0.0, 0.0, 1.0).unwrap();
        assert_eq!(words.amplitude, AMPLITUDE_WORD_MAX);
        assert_eq!(words.frequency, 0);
    }

    #[test]
    fn checked_words_name_field() {
        assert_eq!(
            ProfileWords::checked(1, 0, 0x4000).unwrap_err().field(),
            Some("amplitude_word")
        );
        assert_eq!(
            ProfileWords::checked(1, 0x1_0000, 0).unwrap_err().field(),
            Some("phase_word")
        );
        assert_eq!(
            ProfileWords::checked(-1, 0, 0).unwrap_err().field(),
            Some("frequency_word")
        );
        assert!(ProfileWords::checked(i64::from(u32::MAX), 0xffff, 0x3fff).is_ok());
    }

    #[test]
    fn channel_and_profile_bounds() {
        assert!(check_channel(3).is_ok());
        assert_eq!(check_channel(4).unwrap_err().field(), Some("channel"));
        assert!(check_profile(7).is_ok());
        assert_eq!(check_profile(8).unwrap_err().field(), Some("profile"));
    }

    #[test]
    fn lsb_round_lands_on_grid() {
        let codec = codec();
        let rounded = codec.lsb_round(1_234_567.0);
        let steps = rounded / codec.lsb_frequency_hz();
        assert!((steps - steps.round()).abs() < 1e-6);
        assert!((rounded - 1_234_567.0).abs() <= codec.lsb_frequency_hz() / 2.0);
    }
}
