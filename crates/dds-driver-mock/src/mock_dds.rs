//! Simulated coherent DDS.
//!
//! Validates exactly like the serial driver and keeps what a real board
//! would hold in its registers, plus a log of the wire commands that would
//! have been sent. Tests use the log and write counter to prove that a
//! rejected request never reached the device.

use crate::common::{FaultConfig, MockMode, TimingConfig};
use anyhow::Result;
use async_trait::async_trait;
use dds_core::capabilities::{ProfileProgrammable, PulseShaping};
use dds_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use dds_core::pulse_shape::PulseShape;
use dds_core::words::{
    check_channel, check_profile, ProfileWords, WordCodec, DEFAULT_CLOCK_HZ,
    DEFAULT_MAX_FREQUENCY_HZ, NUM_CHANNELS, NUM_PROFILES,
};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::sleep;

// =============================================================================
// MockDdsFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockDds driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockDdsConfig {
    /// Reference clock (default: 1 GHz)
    #[serde(default = "default_clock_hz")]
    pub clock_hz: f64,

    /// Output ceiling (default: 450 MHz)
    #[serde(default = "default_max_frequency_hz")]
    pub max_frequency_hz: f64,

    /// Identification string returned by `identity()`
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Instant or realistic timing
    #[serde(default)]
    pub mode: MockMode,
}

fn default_clock_hz() -> f64 {
    DEFAULT_CLOCK_HZ
}

fn default_max_frequency_hz() -> f64 {
    DEFAULT_MAX_FREQUENCY_HZ
}

fn default_identity() -> String {
    "coherentDds simulation".to_string()
}

impl Default for MockDdsConfig {
    fn default() -> Self {
        Self {
            clock_hz: default_clock_hz(),
            max_frequency_hz: default_max_frequency_hz(),
            identity: default_identity(),
            mode: MockMode::default(),
        }
    }
}

/// Factory for creating MockDds instances.
pub struct MockDdsFactory;

static MOCK_DDS_CAPABILITIES: &[Capability] =
    &[Capability::ProfileProgrammable, Capability::PulseShaping];

impl DriverFactory for MockDdsFactory {
    fn driver_type(&self) -> &'static str {
        "mock_dds"
    }

    fn name(&self) -> &'static str {
        "Simulated Coherent DDS"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_DDS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockDdsConfig = config.clone().try_into()?;
        WordCodec::with_max_frequency(cfg.clock_hz, cfg.max_frequency_hz)?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockDdsConfig = config.try_into()?;
            let dds = Arc::new(MockDds::with_config(cfg)?);

            Ok(DeviceComponents::new()
                .with_profile_programmable(dds.clone())
                .with_pulse_shaping(dds.clone())
                .with_metadata(DeviceMetadata {
                    clock_hz: Some(dds.codec.clock_hz()),
                    max_frequency_hz: Some(dds.codec.max_frequency_hz()),
                    identity: Some(dds.identity.clone()),
                    address: None,
                }))
        })
    }
}

// =============================================================================
// MockDds
// =============================================================================

#[derive(Debug, Default)]
struct Registers {
    profiles: [[Option<ProfileWords>; NUM_PROFILES as usize]; NUM_CHANNELS as usize],
    pulse_shapes: [Option<Vec<u16>>; NUM_CHANNELS as usize],
    commands: Vec<String>,
    phase_resets: usize,
    resets: usize,
}

/// Simulated four-channel coherent DDS.
pub struct MockDds {
    codec: WordCodec,
    identity: String,
    mode: MockMode,
    timing: TimingConfig,
    faults: FaultConfig,
    registers: RwLock<Registers>,
    writes: AtomicUsize,
}

impl MockDds {
    /// Default 1 GHz board in instant mode.
    pub fn new() -> Self {
        Self::from_codec(WordCodec::default(), default_identity(), MockMode::Instant)
    }

    /// Build from a factory config.
    pub fn with_config(config: MockDdsConfig) -> Result<Self> {
        let codec = WordCodec::with_max_frequency(config.clock_hz, config.max_frequency_hz)?;
        Ok(Self::from_codec(codec, config.identity, config.mode))
    }

    fn from_codec(codec: WordCodec, identity: String, mode: MockMode) -> Self {
        Self {
            codec,
            identity,
            mode,
            timing: TimingConfig::coherent_dds(),
            faults: FaultConfig::none(),
            registers: RwLock::new(Registers::default()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Attach an error injection configuration.
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Words last written to a profile slot.
    pub fn profile(&self, channel: u8, profile: u8) -> Option<ProfileWords> {
        self.registers
            .read()
            .profiles
            .get(usize::from(channel))?
            .get(usize::from(profile))
            .copied()
            .flatten()
    }

    /// Quantized shape last loaded on a channel.
    pub fn pulse_shape(&self, channel: u8) -> Option<Vec<u16>> {
        self.registers
            .read()
            .pulse_shapes
            .get(usize::from(channel))
            .cloned()
            .flatten()
    }

    /// Number of commands that reached the simulated device.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Wire-format log of every accepted command.
    pub fn commands(&self) -> Vec<String> {
        self.registers.read().commands.clone()
    }

    /// Number of phase resets.
    pub fn phase_resets(&self) -> usize {
        self.registers.read().phase_resets
    }

    /// Number of device resets.
    pub fn resets(&self) -> usize {
        self.registers.read().resets
    }

    async fn transact(&self, operation: &'static str, command: String) -> Result<()> {
        self.faults.check("mock_dds", operation)?;
        if self.mode == MockMode::Realistic {
            sleep(self.timing.communication_delay()).await;
        }
        tracing::trace!(command = %command, "mock DDS command");
        self.registers.write().commands.push(command);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for MockDds {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileProgrammable for MockDds {
    fn codec(&self) -> WordCodec {
        self.codec
    }

    async fn identity(&self) -> Result<String> {
        self.transact("identity", "idn?".to_string()).await?;
        Ok(self.identity.clone())
    }

    async fn write_profile_words(
        &self,
        channel: u8,
        profile: u8,
        words: ProfileWords,
    ) -> Result<()> {
        check_channel(channel)?;
        check_profile(profile)?;
        self.transact(
            "set_profile",
            format!(
                "setProfile {} {} {} {} {}",
                channel, profile, words.frequency, words.phase, words.amplitude
            ),
        )
        .await?;
        self.registers.write().profiles[usize::from(channel)][usize::from(profile)] = Some(words);
        Ok(())
    }

    async fn reset_phase(&self) -> Result<()> {
        self.transact("reset_phase", "resetPhase".to_string()).await?;
        self.registers.write().phase_resets += 1;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.transact("reset", "reset".to_string()).await?;
        if self.mode == MockMode::Realistic {
            sleep(self.timing.reset_delay()).await;
        }
        let mut regs = self.registers.write();
        regs.profiles = Default::default();
        regs.resets += 1;
        Ok(())
    }
}

#[async_trait]
impl PulseShaping for MockDds {
    async fn load_pulse_shape(&self, channel: u8, shape: &PulseShape) -> Result<()> {
        check_channel(channel)?;
        let words = shape.quantize();
        self.transact("set_pulse_shape", format!("setPulseShape {}", channel))
            .await?;
        self.registers.write().pulse_shapes[usize::from(channel)] = Some(words);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dds_core::DdsError;

    #[tokio::test]
    async fn test_set_profile_stores_words() {
        let dds = MockDds::new();
        let words = dds.set_profile(1, 3, 100e6, 90.0, 0.5).await.unwrap();

        assert_eq!(dds.profile(1, 3), Some(words));
        assert_eq!(dds.write_count(), 1);
        assert_eq!(
            dds.commands(),
            vec![format!(
                "setProfile 1 3 {} {} {}",
                words.frequency, words.phase, words.amplitude
            )]
        );
    }

    #[tokio::test]
    async fn test_rejected_profile_is_not_written() {
        let dds = MockDds::new();
        let err = dds.set_profile(0, 0, 451e6, 0.0, 1.0).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DdsError>().and_then(DdsError::field),
            Some("frequency")
        );
        let err = dds.set_profile(4, 0, 1e6, 0.0, 1.0).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DdsError>().and_then(DdsError::field),
            Some("channel")
        );
        assert_eq!(dds.write_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_profiles() {
        let dds = MockDds::new();
        dds.set_profile(0, 0, 1e6, 0.0, 1.0).await.unwrap();
        dds.reset().await.unwrap();
        assert_eq!(dds.profile(0, 0), None);
        assert_eq!(dds.resets(), 1);
    }

    #[tokio::test]
    async fn test_pulse_shape_is_quantized() {
        let dds = MockDds::new();
        dds.load_pulse_shape(2, &PulseShape::trivial()).await.unwrap();
        assert_eq!(dds.pulse_shape(2), Some(vec![0x3fff]));
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = MockDdsFactory;
        assert_eq!(factory.driver_type(), "mock_dds");

        let valid = toml::Value::Table(toml::toml! {
            clock_hz = 1.0e9
        });
        assert!(factory.validate(&valid).is_ok());

        let invalid = toml::Value::Table(toml::toml! {
            clock_hz = 0.0
        });
        assert!(factory.validate(&invalid).is_err());
    }
}
