//! Bichromatic tone composer.
//!
//! Two AOM channels drive a symmetric pair of sidebands around a common
//! centre: the blue sideband at `-sideband` with `+phase` and the red one at
//! `+sideband` with `-phase`. The sideband is rounded to the DDS frequency
//! LSB once, before it is split, so both tones see exactly the same offset.

use dds_core::error::{check_range, DdsError, DdsResult};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::f64::consts::SQRT_2;

/// Default red/blue imbalance parameter.
pub const DEFAULT_IMBALANCE: f64 = 0.8;

/// Default combined amplitude.
pub const DEFAULT_TOTAL_AMPLITUDE: f64 = 1.0;

/// Default profile for both sidebands.
pub const DEFAULT_BICHROMAT_PROFILE: u8 = 1;

// Allowance for float error in red² + blue² at exactly full power.
const POWER_TOLERANCE: f64 = 1e-12;

/// Amplitude of each sideband tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SidebandAmplitudes {
    /// Red sideband amplitude.
    pub red: f64,
    /// Blue sideband amplitude.
    pub blue: f64,
}

impl SidebandAmplitudes {
    /// Explicit amplitudes. Each must be in `[0, 1]` and the pair must not
    /// exceed unit combined power.
    pub fn new(red: f64, blue: f64) -> DdsResult<Self> {
        check_range("red_amplitude", red, 0.0, 1.0)?;
        check_range("blue_amplitude", blue, 0.0, 1.0)?;
        let amplitudes = Self { red, blue };
        let power = amplitudes.power();
        if power > 1.0 + POWER_TOLERANCE {
            return Err(DdsError::range("sideband_power", power, 0.0, 1.0));
        }
        Ok(amplitudes)
    }

    /// `red² + blue²`.
    pub fn power(&self) -> f64 {
        self.red * self.red + self.blue * self.blue
    }

    /// Balanced defaults with optional per-sideband overrides.
    pub fn with_overrides(
        imbalance: f64,
        total: f64,
        red: Option<f64>,
        blue: Option<f64>,
    ) -> DdsResult<Self> {
        let balanced = balanced_amplitudes(imbalance, total)?;
        Self::new(red.unwrap_or(balanced.red), blue.unwrap_or(balanced.blue))
    }
}

/// `red = imbalance/√2 · total`, `blue = √(1 − imbalance²/2) · total`.
///
/// `red² + blue² = total²` for every imbalance in `[0, √2]`.
pub fn balanced_amplitudes(imbalance: f64, total: f64) -> DdsResult<SidebandAmplitudes> {
    check_range("imbalance", imbalance, 0.0, SQRT_2)?;
    check_range("total_amplitude", total, 0.0, 1.0)?;
    let red = imbalance / SQRT_2 * total;
    let blue = (1.0 - imbalance * imbalance / 2.0).max(0.0).sqrt() * total;
    Ok(SidebandAmplitudes { red, blue })
}

/// One tone of the pair, in logical (pre-AOM) units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneProfile {
    /// Logical frequency offset.
    pub frequency_hz: f64,
    /// Logical phase.
    pub phase_deg: f64,
    /// Amplitude scale.
    pub amplitude: f64,
}

/// The composed pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BichromaticTones {
    /// Blue sideband: `-sideband`, `+phase`.
    pub blue: ToneProfile,
    /// Red sideband: `+sideband`, `-phase`.
    pub red: ToneProfile,
}

/// Compose the tone pair for `sideband_hz`, rounded to `lsb_hz` once.
pub fn compose(
    sideband_hz: f64,
    phase_deg: f64,
    amplitudes: SidebandAmplitudes,
    lsb_hz: f64,
) -> DdsResult<BichromaticTones> {
    if !sideband_hz.is_finite() {
        return Err(DdsError::range("sideband", sideband_hz, f64::MIN, f64::MAX));
    }
    if !phase_deg.is_finite() {
        return Err(DdsError::range("phase", phase_deg, f64::MIN, f64::MAX));
    }
    if !(lsb_hz.is_finite() && lsb_hz > 0.0) {
        return Err(DdsError::Configuration(format!(
            "frequency LSB must be positive, got {}",
            lsb_hz
        )));
    }

    let rounded = (sideband_hz / lsb_hz).round() * lsb_hz;
    Ok(BichromaticTones {
        blue: ToneProfile {
            frequency_hz: -rounded,
            phase_deg,
            amplitude: amplitudes.blue,
        },
        red: ToneProfile {
            frequency_hz: rounded,
            phase_deg: -phase_deg,
            amplitude: amplitudes.red,
        },
    })
}

/// `[bichromatic]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BichromaticConfig {
    /// AOM carrying the blue sideband.
    #[validate(min_length = 1)]
    pub blue_aom: String,
    /// AOM carrying the red sideband.
    #[validate(min_length = 1)]
    pub red_aom: String,
    /// Default imbalance (0.8).
    #[serde(default = "default_imbalance")]
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.4142135623730951)]
    pub imbalance: f64,
    /// Default combined amplitude (1.0).
    #[serde(default = "default_total_amplitude")]
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub total_amplitude: f64,
    /// Profile for the blue sideband (1).
    #[serde(default = "default_profile")]
    #[validate(maximum = 7)]
    pub blue_profile: u8,
    /// Profile for the red sideband (1).
    #[serde(default = "default_profile")]
    #[validate(maximum = 7)]
    pub red_profile: u8,
}

fn default_imbalance() -> f64 {
    DEFAULT_IMBALANCE
}

fn default_total_amplitude() -> f64 {
    DEFAULT_TOTAL_AMPLITUDE
}

fn default_profile() -> u8 {
    DEFAULT_BICHROMAT_PROFILE
}

impl BichromaticConfig {
    /// Config for the given AOM pair with default amplitudes and profiles.
    pub fn new(blue_aom: impl Into<String>, red_aom: impl Into<String>) -> Self {
        Self {
            blue_aom: blue_aom.into(),
            red_aom: red_aom.into(),
            imbalance: DEFAULT_IMBALANCE,
            total_amplitude: DEFAULT_TOTAL_AMPLITUDE,
            blue_profile: DEFAULT_BICHROMAT_PROFILE,
            red_profile: DEFAULT_BICHROMAT_PROFILE,
        }
    }
}
