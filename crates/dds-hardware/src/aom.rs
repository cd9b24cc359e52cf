//! AOM frequency mapping.
//!
//! Experiments ask for *logical* frequencies: a laser detuning, a sideband
//! offset, or a calibration drive. Each AOM turns that into the RF frequency
//! its DDS channel has to produce, using a mapping strategy chosen in
//! configuration, then divides by its diffraction order and checks the result
//! against the window the AOM can actually diffract.
//!
//! ```toml
//! [[aoms]]
//! name = "rPara"
//! group = "raman"
//! channel = "ch1"
//! range_hz = [200.0e6, 250.0e6]
//! order = 1
//!
//! [aoms.mapping]
//! formula = "detuning"
//! carrier = { offset_hz = 3.091e9, slope = -1.0 }
//! calibration = { offset_hz = 217.368555e6 }
//! ```

use crate::group::DdsChannel;
use anyhow::Result;
use dds_core::error::{DdsError, DdsResult};
use dds_core::timing::ScheduledSwitch;
use dds_core::words::check_profile;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::sync::Arc;
use tracing::instrument;

/// `offset_hz + slope * f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFormula {
    /// Frequency at zero logical input.
    pub offset_hz: f64,
    /// Multiplier on the logical frequency (default 1).
    #[serde(default = "unit_slope")]
    pub slope: f64,
}

fn unit_slope() -> f64 {
    1.0
}

impl LinearFormula {
    /// Evaluate at `frequency_hz`.
    pub fn apply(&self, frequency_hz: f64) -> f64 {
        self.offset_hz + self.slope * frequency_hz
    }
}

/// Which qubit transition a detuning is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QubitReference {
    /// Hyperfine carrier of the main species.
    #[default]
    Carrier,
    /// Clock transition.
    Clock,
    /// Transition of the co-trapped strontium ion.
    Strontium,
}

/// Per-request switches for [`FrequencyMapping::Detuning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingOptions {
    /// Interpret the request as a detuning from the qubit frequency
    /// (`true`) or as a plain calibration offset (`false`).
    pub add_qubit_freq: bool,
    /// Reference transition when `add_qubit_freq` is set.
    pub reference: QubitReference,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            add_qubit_freq: true,
            reference: QubitReference::Carrier,
        }
    }
}

impl MappingOptions {
    /// Plain calibration offset, no qubit frequency added.
    pub fn calibration() -> Self {
        Self {
            add_qubit_freq: false,
            ..Self::default()
        }
    }

    /// Detuning from `reference`.
    pub fn detuning(reference: QubitReference) -> Self {
        Self {
            add_qubit_freq: true,
            reference,
        }
    }
}

/// How a logical frequency becomes an undivided RF frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "formula", rename_all = "snake_case")]
pub enum FrequencyMapping {
    /// The request is the RF frequency.
    Direct,
    /// Always `frequency_hz`, whatever is requested.
    Fixed {
        /// The fixed drive frequency.
        frequency_hz: f64,
    },
    /// `offset_hz + slope * f`.
    Linear(LinearFormula),
    /// Detuning from a qubit transition or a calibration offset.
    ///
    /// With `add_qubit_freq` the formula for the selected reference is used,
    /// falling back to `carrier` when that reference has none. Without it,
    /// `calibration` is used. The two are never mixed.
    Detuning {
        /// Formula relative to the carrier.
        carrier: LinearFormula,
        /// Formula relative to the clock transition.
        #[serde(default)]
        clock: Option<LinearFormula>,
        /// Formula relative to the strontium transition.
        #[serde(default)]
        strontium: Option<LinearFormula>,
        /// Formula for plain calibration offsets.
        calibration: LinearFormula,
    },
}

impl FrequencyMapping {
    /// RF frequency before the order division.
    pub fn evaluate(&self, frequency_hz: f64, options: &MappingOptions) -> f64 {
        match self {
            Self::Direct => frequency_hz,
            Self::Fixed { frequency_hz: fixed } => *fixed,
            Self::Linear(formula) => formula.apply(frequency_hz),
            Self::Detuning {
                carrier,
                clock,
                strontium,
                calibration,
            } => {
                if !options.add_qubit_freq {
                    return calibration.apply(frequency_hz);
                }
                let formula = match options.reference {
                    QubitReference::Carrier => carrier,
                    QubitReference::Clock => clock.as_ref().unwrap_or(carrier),
                    QubitReference::Strontium => strontium.as_ref().unwrap_or(carrier),
                };
                formula.apply(frequency_hz)
            }
        }
    }
}

/// One `[[aoms]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AomConfig {
    /// Name used by callers, e.g. `rPara`.
    #[validate(min_length = 1)]
    pub name: String,
    /// Group that owns the driving channel.
    pub group: String,
    /// Logical channel name within the group.
    pub channel: String,
    /// Diffraction window `[min, max]` in Hz.
    pub range_hz: [f64; 2],
    /// Signed diffraction order (default +1).
    #[serde(default = "default_order")]
    pub order: i32,
    /// Highest profile the AOM's select lines can reach.
    #[serde(default)]
    #[validate(maximum = 7)]
    pub max_profile: Option<u8>,
    /// Logical-to-RF mapping.
    pub mapping: FrequencyMapping,
}

fn default_order() -> i32 {
    1
}

/// Fully validated write, ready to be applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparedWrite {
    /// DDS output frequency.
    pub frequency_hz: f64,
    /// DDS phase offset.
    pub phase_deg: f64,
    /// Amplitude scale.
    pub amplitude: f64,
    /// Target profile.
    pub profile: u8,
}

/// A named AOM driven by one DDS channel.
pub struct Aom {
    name: String,
    range_hz: [f64; 2],
    order: i32,
    max_profile: Option<u8>,
    mapping: FrequencyMapping,
    channel: Arc<DdsChannel>,
}

impl std::fmt::Debug for Aom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aom")
            .field("name", &self.name)
            .field("range_hz", &self.range_hz)
            .field("order", &self.order)
            .field("channel", &self.channel.name())
            .finish()
    }
}

impl Aom {
    /// Build from configuration and the channel it drives.
    pub fn new(config: &AomConfig, channel: Arc<DdsChannel>) -> DdsResult<Self> {
        if config.order == 0 {
            return Err(DdsError::Configuration(format!(
                "AOM '{}' has diffraction order 0",
                config.name
            )));
        }
        let [min, max] = config.range_hz;
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(DdsError::Configuration(format!(
                "AOM '{}' has an empty frequency window [{}, {}]",
                config.name, min, max
            )));
        }
        Ok(Self {
            name: config.name.clone(),
            range_hz: config.range_hz,
            order: config.order,
            max_profile: config.max_profile,
            mapping: config.mapping.clone(),
            channel,
        })
    }

    /// AOM name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driving channel.
    pub fn channel(&self) -> &Arc<DdsChannel> {
        &self.channel
    }

    /// Mapping strategy.
    pub fn mapping(&self) -> &FrequencyMapping {
        &self.mapping
    }

    /// DDS frequency for a logical request, range-checked.
    pub fn physical_frequency(&self, frequency_hz: f64, options: &MappingOptions) -> DdsResult<f64> {
        let undivided = self.mapping.evaluate(frequency_hz, options);
        self.divide_and_check(undivided)
    }

    /// DDS phase for a logical phase.
    pub fn physical_phase(&self, phase_deg: f64) -> f64 {
        phase_deg / f64::from(self.order)
    }

    fn divide_and_check(&self, undivided_hz: f64) -> DdsResult<f64> {
        let frequency_hz = undivided_hz / f64::from(self.order);
        let [min_hz, max_hz] = self.range_hz;
        if frequency_hz.is_finite() && frequency_hz >= min_hz && frequency_hz <= max_hz {
            Ok(frequency_hz)
        } else {
            Err(DdsError::AomRange {
                aom: self.name.clone(),
                frequency_hz,
                min_hz,
                max_hz,
            })
        }
    }

    fn check_profile(&self, profile: u8) -> DdsResult<()> {
        check_profile(profile)?;
        match self.max_profile {
            Some(max) if profile > max => Err(DdsError::range(
                "profile",
                f64::from(profile),
                0.0,
                f64::from(max),
            )),
            _ => Ok(()),
        }
    }

    fn prepare_physical(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
    ) -> DdsResult<PreparedWrite> {
        self.check_profile(profile)?;
        let prepared = PreparedWrite {
            frequency_hz,
            phase_deg: self.physical_phase(phase_deg),
            amplitude,
            profile,
        };
        self.channel.validate(
            prepared.frequency_hz,
            prepared.profile,
            prepared.amplitude,
            prepared.phase_deg,
        )?;
        Ok(prepared)
    }

    /// Validate a logical request end to end without writing.
    pub fn prepare(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
        options: &MappingOptions,
    ) -> DdsResult<PreparedWrite> {
        let physical = self.physical_frequency(frequency_hz, options)?;
        self.prepare_physical(physical, profile, amplitude, phase_deg)
    }

    /// Write a prepared request.
    pub async fn apply(&self, write: PreparedWrite) -> Result<()> {
        tracing::debug!(
            aom = %self.name,
            profile = write.profile,
            frequency_hz = write.frequency_hz,
            amplitude = write.amplitude,
            "AOM profile write"
        );
        self.channel
            .set(
                write.frequency_hz,
                write.profile,
                write.amplitude,
                write.phase_deg,
            )
            .await
    }

    /// Map, validate and write a logical request.
    ///
    /// Nothing is written if any check fails.
    #[instrument(skip(self), fields(aom = %self.name))]
    pub async fn set(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
        options: &MappingOptions,
    ) -> Result<()> {
        let write = self.prepare(frequency_hz, profile, amplitude, phase_deg, options)?;
        self.apply(write).await
    }

    /// Write an RF frequency directly, bypassing the mapping.
    ///
    /// The order division and window check still apply.
    pub async fn direct_set(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
    ) -> Result<()> {
        let physical = self.divide_and_check(frequency_hz)?;
        let write = self.prepare_physical(physical, profile, amplitude, phase_deg)?;
        self.apply(write).await
    }

    /// Switch the driving channel to `profile`.
    pub async fn use_profile(&self, profile: u8) -> Result<ScheduledSwitch> {
        self.check_profile(profile)?;
        self.channel.use_profile(profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RV: f64 = 217.368_555e6;
    const MS_DIFF: f64 = 3.2e9;
    const RH: f64 = -109e6;
    const RH2: f64 = 217.309_632e6;
    const RHSR: f64 = -192.059_733_909_192_8e6;

    fn rpara_mapping() -> FrequencyMapping {
        FrequencyMapping::Detuning {
            carrier: LinearFormula {
                offset_hz: MS_DIFF + RH,
                slope: -1.0,
            },
            clock: Some(LinearFormula {
                offset_hz: MS_DIFF + RH2,
                slope: -1.0,
            }),
            strontium: Some(LinearFormula {
                offset_hz: RHSR,
                slope: 1.0,
            }),
            calibration: LinearFormula {
                offset_hz: RV,
                slope: 1.0,
            },
        }
    }

    #[test]
    fn detuning_modes_are_exclusive() {
        let m = rpara_mapping();
        let f = 2.9e9;
        assert_eq!(
            m.evaluate(f, &MappingOptions::default()),
            MS_DIFF + RH - f
        );
        assert_eq!(
            m.evaluate(f, &MappingOptions::detuning(QubitReference::Clock)),
            MS_DIFF + RH2 - f
        );
        assert_eq!(
            m.evaluate(400e6, &MappingOptions::detuning(QubitReference::Strontium)),
            RHSR + 400e6
        );
        assert_eq!(m.evaluate(1e6, &MappingOptions::calibration()), RV + 1e6);
    }

    #[test]
    fn missing_reference_falls_back_to_carrier() {
        let m = FrequencyMapping::Detuning {
            carrier: LinearFormula {
                offset_hz: RV,
                slope: -1.0,
            },
            clock: None,
            strontium: None,
            calibration: LinearFormula {
                offset_hz: RHSR,
                slope: -1.0,
            },
        };
        let clock = m.evaluate(1e6, &MappingOptions::detuning(QubitReference::Clock));
        assert_eq!(clock, RV - 1e6);
        assert_eq!(m.evaluate(1e6, &MappingOptions::calibration()), RHSR - 1e6);
    }

    #[test]
    fn fixed_ignores_request() {
        let m = FrequencyMapping::Fixed { frequency_hz: RH2 };
        assert_eq!(m.evaluate(123.0, &MappingOptions::default()), RH2);
    }

    #[test]
    fn mapping_from_toml() {
        let cfg: AomConfig = toml::from_str(
            r#"
            name = "rHSr"
            group = "raman"
            channel = "ch2"
            range_hz = [175.0e6, 225.0e6]
            order = -1

            [mapping]
            formula = "detuning"
            carrier = { offset_hz = 217.368555e6, slope = -1.0 }
            calibration = { offset_hz = -192.0597339091928e6, slope = -1.0 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.order, -1);
        assert!(matches!(
            cfg.mapping,
            FrequencyMapping::Detuning { clock: None, .. }
        ));

        let quad: FrequencyMapping = toml::from_str(
            r#"
            formula = "linear"
            offset_hz = 80.0e6
            slope = -0.5
            "#,
        )
        .unwrap();
        assert_eq!(
            quad.evaluate(10e6, &MappingOptions::default()),
            75e6
        );
    }
}
