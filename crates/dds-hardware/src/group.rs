//! Profile store: named DDS channels with timed profile selection.
//!
//! A [`DdsGroup`] maps logical channel names to `(device, channel)` pairs
//! and pairs each DDS with the timed bus that carries its profile-select
//! lines. [`DdsChannel`] is the handle experiments use:
//!
//! - `set()` programs a profile over the serial link
//! - `use_profile()` switches to it at the current timeline position
//!
//! # Profile conventions
//!
//! Profile 0 is "on" and profile 7 is "off". Whenever profile 0 is written
//! with a non-zero amplitude, profile 7 is written with the same frequency
//! and zero amplitude, so `off()` silences the output without a frequency
//! jump. Profile 7 never holds a non-zero amplitude.

use crate::ledger::{ProfileLedger, ProfileSetting};
use crate::registry::DeviceRegistry;
use anyhow::Result;
use dds_core::capabilities::{ProfileProgrammable, PulseShaping, TimedBus};
use dds_core::error::{DdsError, DdsResult};
use dds_core::pulse_shape::{sensible_shape, PulseShape};
use dds_core::timing::{ControlWord, MachineUnits, ScheduledSwitch};
use dds_core::words::{check_channel, check_profile, ProfileWords, WordCodec, OFF_PROFILE, ON_PROFILE};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// A DDS in a group and the bus carrying its profile-select lines.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GroupDeviceConfig {
    /// Registry id of the DDS.
    #[validate(min_length = 1)]
    pub dds: String,
    /// Registry id of the timed bus, if profiles can be switched.
    #[serde(default)]
    pub bus: Option<String>,
}

/// Logical channel mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Registry id of the DDS.
    pub device: String,
    /// Output index on that DDS.
    pub channel: u8,
}

/// One `[[groups]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GroupConfig {
    /// Group name.
    #[validate(min_length = 1)]
    pub name: String,
    /// Member devices.
    #[validate(min_items = 1)]
    #[validate]
    pub devices: Vec<GroupDeviceConfig>,
    /// Logical channel name to `(device, channel)`.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelRef>,
}

/// Handle to one DDS output.
pub struct DdsChannel {
    name: String,
    device_id: String,
    index: u8,
    dds: Arc<dyn ProfileProgrammable>,
    shaper: Option<Arc<dyn PulseShaping>>,
    bus: Option<Arc<dyn TimedBus>>,
    ledger: Option<Arc<ProfileLedger>>,
}

impl DdsChannel {
    /// Channel `index` of `dds`, without a bus or pulse shaper.
    pub fn new(
        name: impl Into<String>,
        device_id: impl Into<String>,
        index: u8,
        dds: Arc<dyn ProfileProgrammable>,
    ) -> DdsResult<Self> {
        check_channel(index)?;
        Ok(Self {
            name: name.into(),
            device_id: device_id.into(),
            index,
            dds,
            shaper: None,
            bus: None,
            ledger: None,
        })
    }

    /// Attach the profile-select bus.
    pub fn with_bus(mut self, bus: Arc<dyn TimedBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach the pulse-shape table writer.
    pub fn with_pulse_shaping(mut self, shaper: Arc<dyn PulseShaping>) -> Self {
        self.shaper = Some(shaper);
        self
    }

    /// Record writes in `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<ProfileLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry id of the DDS.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Output index on the DDS.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Codec of the driving DDS.
    pub fn codec(&self) -> WordCodec {
        self.dds.codec()
    }

    /// Frequency LSB of the driving DDS.
    pub fn lsb_frequency_hz(&self) -> f64 {
        self.codec().lsb_frequency_hz()
    }

    /// Check a profile write without touching hardware.
    pub fn validate(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
    ) -> DdsResult<()> {
        self.encode(frequency_hz, profile, amplitude, phase_deg)
            .map(|_| ())
    }

    /// Words for the requested slot plus the off-profile mirror, if any.
    fn encode(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
    ) -> DdsResult<(ProfileWords, Option<ProfileWords>)> {
        check_profile(profile)?;
        let codec = self.codec();
        let words = codec.encode(frequency_hz, phase_deg, amplitude)?;

        if profile == OFF_PROFILE && !words.is_silent() {
            return Err(DdsError::range("amplitude", amplitude, 0.0, 0.0));
        }

        let mirror = if profile == ON_PROFILE && !words.is_silent() {
            Some(codec.encode(frequency_hz, 0.0, 0.0)?)
        } else {
            None
        };
        Ok((words, mirror))
    }

    /// Program a profile slot.
    ///
    /// Every word is encoded before the first transmission, so a rejected
    /// request leaves the device untouched. Ends with a phase reset; the
    /// ledger is only written once the device holds the complete pair.
    #[instrument(skip(self), fields(channel = %self.name))]
    pub async fn set(
        &self,
        frequency_hz: f64,
        profile: u8,
        amplitude: f64,
        phase_deg: f64,
    ) -> Result<()> {
        let (words, mirror) = self.encode(frequency_hz, profile, amplitude, phase_deg)?;

        self.dds
            .write_profile_words(self.index, profile, words)
            .await?;
        if let Some(off) = mirror {
            self.dds
                .write_profile_words(self.index, OFF_PROFILE, off)
                .await?;
        }
        self.dds.reset_phase().await?;

        let mut settings = vec![(
            profile,
            ProfileSetting {
                frequency_hz,
                phase_deg,
                amplitude,
                words,
            },
        )];
        if let Some(off) = mirror {
            settings.push((
                OFF_PROFILE,
                ProfileSetting {
                    frequency_hz,
                    phase_deg: 0.0,
                    amplitude: 0.0,
                    words: off,
                },
            ));
        }
        self.remember(&settings)?;

        tracing::debug!(
            channel = %self.name,
            profile,
            frequency_hz,
            amplitude,
            phase_deg,
            "Profile written"
        );
        Ok(())
    }

    fn remember(&self, settings: &[(u8, ProfileSetting)]) -> Result<()> {
        match &self.ledger {
            Some(ledger) => ledger.record_all(&self.device_id, self.index, settings),
            None => Ok(()),
        }
    }

    fn bus(&self) -> DdsResult<&Arc<dyn TimedBus>> {
        self.bus.as_ref().ok_or_else(|| {
            DdsError::Configuration(format!(
                "channel '{}' has no profile-select bus",
                self.name
            ))
        })
    }

    /// Switch to `profile` at the current timeline position.
    ///
    /// The select word goes out one lead time early and the timeline is
    /// held for the settle time before this returns.
    pub async fn use_profile(&self, profile: u8) -> Result<ScheduledSwitch> {
        let word = ControlWord::profile(self.index, profile)?;
        let switch = self.bus()?.schedule_switch(word).await?;
        tracing::trace!(channel = %self.name, profile, active_at_mu = switch.active_at_mu, "Profile selected");
        Ok(switch)
    }

    /// Switch to an "on" profile.
    pub async fn on(&self, profile: u8) -> Result<ScheduledSwitch> {
        self.use_profile(profile).await
    }

    /// Switch to the off profile.
    pub async fn off(&self) -> Result<ScheduledSwitch> {
        self.use_profile(OFF_PROFILE).await
    }

    /// Drive the pulse-enable line, with the same timing as a profile switch.
    pub async fn pulse_enable(&self, enable: bool) -> Result<ScheduledSwitch> {
        let word = ControlWord::pulse_enable(self.index, enable)?;
        self.bus()?.schedule_switch(word).await
    }

    /// Advance this channel's timeline.
    pub async fn delay_mu(&self, duration_mu: MachineUnits) -> Result<()> {
        self.bus()?.delay_mu(duration_mu).await
    }

    /// Reset the phase accumulators of the driving DDS.
    pub async fn reset_phase(&self) -> Result<()> {
        self.dds.reset_phase().await
    }

    /// Identification of the driving DDS; doubles as a completion check.
    pub async fn identity(&self) -> Result<String> {
        self.dds.identity().await
    }

    /// Upload an envelope to this channel's shape table.
    pub async fn load_pulse_shape(&self, shape: &PulseShape) -> Result<()> {
        let shaper = self.shaper.as_ref().ok_or_else(|| {
            DdsError::Configuration(format!(
                "device '{}' does not support pulse shaping",
                self.device_id
            ))
        })?;
        shaper.load_pulse_shape(self.index, shape).await
    }

    /// Upload the sensible ramp of `duration_s`.
    pub async fn set_sensible_pulse_shape(&self, duration_s: f64) -> Result<()> {
        let shape = sensible_shape(duration_s)?;
        self.load_pulse_shape(&shape).await
    }
}

/// Named channels built from one `[[groups]]` entry.
pub struct DdsGroup {
    name: String,
    channels: BTreeMap<String, Arc<DdsChannel>>,
}

impl DdsGroup {
    /// Resolve a group against the registry.
    pub fn from_config(
        config: &GroupConfig,
        registry: &DeviceRegistry,
        ledger: Option<Arc<ProfileLedger>>,
    ) -> DdsResult<Self> {
        let mut buses = BTreeMap::new();
        for member in &config.devices {
            let bus = match &member.bus {
                Some(bus_id) => Some(registry.get_timed_bus(bus_id).ok_or_else(|| {
                    DdsError::Configuration(format!(
                        "group '{}': '{}' is not a registered timed bus",
                        config.name, bus_id
                    ))
                })?),
                None => None,
            };
            buses.insert(member.dds.clone(), bus);
        }

        let mut channels = BTreeMap::new();
        for (name, target) in &config.channels {
            let bus = buses.get(&target.device).ok_or_else(|| {
                DdsError::Configuration(format!(
                    "group '{}': channel '{}' uses device '{}' which is not a group member",
                    config.name, name, target.device
                ))
            })?;
            let dds = registry
                .get_profile_programmable(&target.device)
                .ok_or_else(|| {
                    DdsError::Configuration(format!(
                        "group '{}': '{}' is not a registered DDS",
                        config.name, target.device
                    ))
                })?;

            let mut channel = DdsChannel::new(name.clone(), target.device.clone(), target.channel, dds)?;
            if let Some(bus) = bus {
                channel = channel.with_bus(bus.clone());
            }
            if let Some(shaper) = registry.get_pulse_shaping(&target.device) {
                channel = channel.with_pulse_shaping(shaper);
            }
            if let Some(ledger) = &ledger {
                channel = channel.with_ledger(ledger.clone());
            }
            channels.insert(name.clone(), Arc::new(channel));
        }

        tracing::info!(group = %config.name, channels = channels.len(), "DDS group ready");
        Ok(Self {
            name: config.name.clone(),
            channels,
        })
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel by logical name.
    pub fn channel(&self, name: &str) -> DdsResult<Arc<DdsChannel>> {
        self.channels.get(name).cloned().ok_or_else(|| {
            DdsError::Configuration(format!(
                "group '{}' has no channel '{}'",
                self.name, name
            ))
        })
    }

    /// All channels in name order.
    pub fn channels(&self) -> impl Iterator<Item = &Arc<DdsChannel>> {
        self.channels.values()
    }
}
