//! Pulse-shape envelope tables.
//!
//! The board plays a per-channel amplitude table on the rising edge of the
//! pulse-enable line and the same table reversed on the falling edge. The
//! "sensible" shape is a logarithmically compressed `sin^4` ramp that reaches
//! full scale on the last sample.

use crate::error::{check_range, DdsError, DdsResult};
use crate::words::AMPLITUDE_WORD_MAX;

/// Sample clock of the shape table.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 200e6;
/// Shortest ramp that still has a usable number of samples.
pub const MIN_DURATION_S: f64 = 0.2e-6;
/// Longest ramp the table can hold at the default sample rate.
pub const MAX_DURATION_S: f64 = 10e-6;
/// Table capacity.
pub const MAX_SAMPLES: usize = 2048;

/// Samples in [0, 1], one per table clock tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseShape {
    samples: Vec<f64>,
}

impl PulseShape {
    /// Wrap explicit samples after validating length and range.
    pub fn from_samples(samples: Vec<f64>) -> DdsResult<Self> {
        check_length(samples.len())?;
        for &s in &samples {
            check_range("pulse_shape_sample", s, 0.0, 1.0)?;
        }
        Ok(Self { samples })
    }

    /// Single full-scale sample: switches instantly.
    pub fn trivial() -> Self {
        Self { samples: vec![1.0] }
    }

    /// Sample values.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Never true for a validated shape.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Amplitude words, `round(x * 0x3fff)`.
    pub fn quantize(&self) -> Vec<u16> {
        self.samples
            .iter()
            .map(|s| (s * f64::from(AMPLITUDE_WORD_MAX)).round() as u16)
            .collect()
    }
}

fn check_length(len: usize) -> DdsResult<()> {
    if (1..=MAX_SAMPLES).contains(&len) {
        Ok(())
    } else {
        Err(DdsError::range(
            "pulse_shape_length",
            len as f64,
            1.0,
            MAX_SAMPLES as f64,
        ))
    }
}

/// Quantize raw samples, validating length and range first.
pub fn quantize_shape(samples: &[f64]) -> DdsResult<Vec<u16>> {
    Ok(PulseShape::from_samples(samples.to_vec())?.quantize())
}

/// Build the sensible ramp for `duration_s` at `sample_rate_hz`.
///
/// `n = round(duration * rate)` samples with
/// `y_i = 0.209 * log10(sin((1 + i) / (n + 1) * pi / 2)^4) + 1`,
/// clamped to [0, 1].
pub fn build_shape(duration_s: f64, sample_rate_hz: f64) -> DdsResult<PulseShape> {
    check_range("duration", duration_s, MIN_DURATION_S, MAX_DURATION_S)?;
    if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
        return Err(DdsError::range(
            "sample_rate",
            sample_rate_hz,
            f64::MIN_POSITIVE,
            f64::MAX,
        ));
    }

    let n = (duration_s * sample_rate_hz).round();
    check_range("pulse_shape_length", n, 1.0, MAX_SAMPLES as f64)?;
    let n = n as usize;

    let samples = (0..n)
        .map(|i| {
            let x = (1 + i) as f64 / (n + 1) as f64 * std::f64::consts::FRAC_PI_2;
            let y = 0.209 * x.sin().powi(4).log10() + 1.0;
            y.clamp(0.0, 1.0)
        })
        .collect();

    Ok(PulseShape { samples })
}

/// [`build_shape`] at the default 200 MHz table clock.
pub fn sensible_shape(duration_s: f64) -> DdsResult<PulseShape> {
    build_shape(duration_s, DEFAULT_SAMPLE_RATE_HZ)
}
