//! AOM interface.
//!
//! Entry point for experiment code. Owns the configured AOMs, the channel
//! groups behind them and the profile ledger, and lets callers program
//! logical frequencies by AOM name without knowing orders, channels or
//! which DDS drives what.
//!
//! ```rust,ignore
//! let config = SystemConfig::from_file(Path::new("config/raman.toml"))?;
//! let registry = create_registry_from_config(&config).await?;
//! let aoms = AomInterface::from_config(&config, &registry)?;
//!
//! aoms.set_profile("rPara", 2.9e9, 1, 1.0, 0.0, &MappingOptions::default()).await?;
//! aoms.set_to_profile("rPara", 1).await?;
//! ```

use crate::aom::{Aom, MappingOptions};
use crate::bichromatic::{compose, BichromaticConfig, BichromaticTones, SidebandAmplitudes};
use crate::config::SystemConfig;
use crate::group::{DdsChannel, DdsGroup};
use crate::ledger::ProfileLedger;
use crate::registry::DeviceRegistry;
use anyhow::Result;
use dds_core::error::{DdsError, DdsResult};
use dds_core::timing::{MachineUnits, ScheduledSwitch};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::instrument;

/// Pulse-shape duration used when none is given.
pub const DEFAULT_PULSE_SHAPE_DURATION_S: f64 = 2e-6;

/// Per-call adjustments to the configured bichromatic defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BichromaticRequest {
    /// Red sideband amplitude instead of the balanced default.
    pub red_amplitude: Option<f64>,
    /// Blue sideband amplitude instead of the balanced default.
    pub blue_amplitude: Option<f64>,
    /// Profile for the blue AOM.
    pub blue_profile: Option<u8>,
    /// Profile for the red AOM.
    pub red_profile: Option<u8>,
}

/// Named AOMs over one or more DDS groups.
pub struct AomInterface {
    aoms: BTreeMap<String, Arc<Aom>>,
    groups: BTreeMap<String, Arc<DdsGroup>>,
    bichromatic: Option<BichromaticConfig>,
    pulse_shape_aom: Option<String>,
    ledger: Arc<ProfileLedger>,
    lsb_hz: f64,
}

impl AomInterface {
    /// Resolve groups and AOMs against a populated registry.
    ///
    /// Every AOM channel must have the same frequency LSB, so one rounding
    /// step serves the whole interface.
    pub fn from_config(config: &SystemConfig, registry: &DeviceRegistry) -> Result<Self> {
        let ledger = Arc::new(match &config.ledger_path {
            Some(path) => ProfileLedger::open(path)?,
            None => ProfileLedger::in_memory(),
        });

        let mut groups = BTreeMap::new();
        for group in &config.groups {
            let built = DdsGroup::from_config(group, registry, Some(ledger.clone()))?;
            groups.insert(group.name.clone(), Arc::new(built));
        }

        let mut aoms = BTreeMap::new();
        for aom in &config.aoms {
            let group: &Arc<DdsGroup> = groups.get(&aom.group).ok_or_else(|| {
                DdsError::Configuration(format!(
                    "AOM '{}': unknown group '{}'",
                    aom.name, aom.group
                ))
            })?;
            let channel = group.channel(&aom.channel)?;
            aoms.insert(aom.name.clone(), Arc::new(Aom::new(aom, channel)?));
        }

        let lsb_hz = common_lsb(aoms.values().map(|a| a.channel()))?;
        tracing::info!(aoms = aoms.len(), lsb_hz, "AOM interface ready");

        Ok(Self {
            aoms,
            groups,
            bichromatic: config.bichromatic.clone(),
            pulse_shape_aom: config.pulse_shape_aom.clone(),
            ledger,
            lsb_hz,
        })
    }

    /// AOM by name.
    pub fn aom(&self, name: &str) -> DdsResult<&Arc<Aom>> {
        self.aoms
            .get(name)
            .ok_or_else(|| DdsError::Configuration(format!("unknown AOM '{}'", name)))
    }

    /// All AOMs in name order.
    pub fn aoms(&self) -> impl Iterator<Item = &Arc<Aom>> {
        self.aoms.values()
    }

    /// Channel group by name.
    pub fn group(&self, name: &str) -> DdsResult<&Arc<DdsGroup>> {
        self.groups
            .get(name)
            .ok_or_else(|| DdsError::Configuration(format!("unknown group '{}'", name)))
    }

    /// Record of what every profile slot holds.
    pub fn ledger(&self) -> &Arc<ProfileLedger> {
        &self.ledger
    }

    /// Frequency LSB shared by every AOM channel.
    pub fn lsb_frequency_hz(&self) -> f64 {
        self.lsb_hz
    }

    /// Nearest frequency the DDS can actually produce.
    pub fn lsb_round(&self, frequency_hz: f64) -> f64 {
        (frequency_hz / self.lsb_hz).round() * self.lsb_hz
    }

    /// Program a logical frequency on a named AOM.
    ///
    /// The request is rounded to the LSB before mapping. Returns once the
    /// DDS has answered an identity query, which it only does after every
    /// earlier command was processed.
    #[instrument(skip(self, options))]
    pub async fn set_profile(
        &self,
        aom: &str,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
        options: &MappingOptions,
    ) -> Result<()> {
        let aom = self.aom(aom)?;
        aom.set(
            self.lsb_round(frequency_hz),
            profile,
            amplitude,
            phase_deg,
            options,
        )
        .await?;
        aom.channel().identity().await?;
        Ok(())
    }

    /// Program an RF frequency directly at full amplitude and zero phase.
    ///
    /// For bench debugging; the mapping is skipped but the AOM window is not.
    pub async fn debug_set_profile(&self, aom: &str, frequency_hz: f64, profile: u8) -> Result<()> {
        let aom = self.aom(aom)?;
        aom.direct_set(frequency_hz, profile, 1.0, 0.0).await?;
        aom.channel().identity().await?;
        Ok(())
    }

    /// Switch a named AOM to `profile` at the current timeline position.
    pub async fn set_to_profile(&self, aom: &str, profile: u8) -> Result<ScheduledSwitch> {
        self.aom(aom)?.use_profile(profile).await
    }

    /// Reset the phase accumulators, once per distinct DDS.
    pub async fn reset_phase(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for aom in self.aoms.values() {
            let channel = aom.channel();
            if seen.insert(channel.device_id().to_string()) {
                channel.reset_phase().await?;
            }
        }
        tracing::debug!(devices = seen.len(), "Phase reset");
        Ok(())
    }

    fn pulse_shape_channel(&self) -> DdsResult<&Arc<DdsChannel>> {
        let name = self.pulse_shape_aom.as_deref().ok_or_else(|| {
            DdsError::Configuration("no pulse_shape_aom configured".to_string())
        })?;
        Ok(self.aom(name)?.channel())
    }

    /// Load the sensible ramp of `duration_s` on the pulse-shape AOM.
    ///
    /// A duration of exactly zero leaves the current table in place.
    pub async fn set_sensible_pulse_shape(&self, duration_s: f64) -> Result<()> {
        if duration_s == 0.0 {
            return Ok(());
        }
        let channel = self.pulse_shape_channel()?;
        channel.set_sensible_pulse_shape(duration_s).await?;
        channel.identity().await?;
        tracing::info!(channel = %channel.name(), duration_s, "Pulse shape loaded");
        Ok(())
    }

    /// Raise the pulse-enable line.
    pub async fn pulse_shape_on(&self) -> Result<ScheduledSwitch> {
        self.pulse_shape_channel()?.pulse_enable(true).await
    }

    /// Lower the pulse-enable line.
    pub async fn pulse_shape_off(&self) -> Result<ScheduledSwitch> {
        self.pulse_shape_channel()?.pulse_enable(false).await
    }

    /// Shaped pulse: on, wait `duration_mu`, off.
    pub async fn pulse_shape_pulse(&self, duration_mu: MachineUnits) -> Result<()> {
        let channel = self.pulse_shape_channel()?;
        channel.pulse_enable(true).await?;
        channel.delay_mu(duration_mu).await?;
        channel.pulse_enable(false).await?;
        Ok(())
    }

    /// Symmetric two-tone drive on the configured sideband AOMs.
    ///
    /// Both writes are prepared and validated before either is sent, so an
    /// out-of-window sideband leaves both AOMs untouched.
    #[instrument(skip(self))]
    pub async fn set_bichromat(
        &self,
        sideband_hz: f64,
        phase_deg: f64,
        request: BichromaticRequest,
    ) -> Result<BichromaticTones> {
        let config = self.bichromatic.as_ref().ok_or_else(|| {
            DdsError::Configuration("no [bichromatic] section configured".to_string())
        })?;
        let amplitudes = SidebandAmplitudes::with_overrides(
            config.imbalance,
            config.total_amplitude,
            request.red_amplitude,
            request.blue_amplitude,
        )?;
        let tones = compose(sideband_hz, phase_deg, amplitudes, self.lsb_hz)?;

        let blue = self.aom(&config.blue_aom)?;
        let red = self.aom(&config.red_aom)?;
        let options = MappingOptions::calibration();
        let blue_write = blue.prepare(
            tones.blue.frequency_hz,
            request.blue_profile.unwrap_or(config.blue_profile),
            tones.blue.amplitude,
            tones.blue.phase_deg,
            &options,
        )?;
        let red_write = red.prepare(
            tones.red.frequency_hz,
            request.red_profile.unwrap_or(config.red_profile),
            tones.red.amplitude,
            tones.red.phase_deg,
            &options,
        )?;

        blue.apply(blue_write).await?;
        red.apply(red_write).await?;
        blue.channel().identity().await?;
        red.channel().identity().await?;

        tracing::info!(
            sideband_hz = tones.red.frequency_hz,
            red = tones.red.amplitude,
            blue = tones.blue.amplitude,
            "Bichromatic tones set"
        );
        Ok(tones)
    }
}

fn common_lsb<'a>(channels: impl Iterator<Item = &'a Arc<DdsChannel>>) -> DdsResult<f64> {
    let mut lsb: Option<(f64, &str)> = None;
    for channel in channels {
        let this = channel.lsb_frequency_hz();
        match lsb {
            None => lsb = Some((this, channel.name())),
            Some((first, name)) if first != this => {
                return Err(DdsError::Configuration(format!(
                    "channels '{}' and '{}' have different frequency LSBs ({} Hz vs {} Hz)",
                    name,
                    channel.name(),
                    first,
                    this
                )))
            }
            Some(_) => {}
        }
    }
    Ok(lsb.map_or(
        dds_core::words::WordCodec::default().lsb_frequency_hz(),
        |(first, _)| first,
    ))
}
