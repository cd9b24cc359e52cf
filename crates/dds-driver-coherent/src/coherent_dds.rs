//! Coherent DDS serial driver.
//!
//! Protocol: 115200 baud 8N1, newline-terminated ASCII.
//!
//! | Command                        | Reply lines |
//! |--------------------------------|-------------|
//! | `idn?`                         | 1           |
//! | `resetPhase`                   | 0           |
//! | `setProfile ch p f ph a`       | 0           |
//! | `reset`                        | 0 (then 50 ms busy) |
//! | `setDisableCoherence a b c d`  | 1           |
//! | `setPulseShape ch` + word line | 0           |
//! | `setClockSource x`             | 2           |
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//!     clock_hz = 1.0e9
//! };
//! let components = CoherentDdsFactory.build(config.into()).await?;
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use dds_core::capabilities::{ProfileProgrammable, PulseShaping};
use dds_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use dds_core::error::DdsError;
use dds_core::pulse_shape::PulseShape;
use dds_core::serial::{open_serial_async, read_reply, wrap_shared, DynSerial, SharedPort};
use dds_core::words::{
    check_channel, check_profile, ProfileWords, WordCodec, DEFAULT_CLOCK_HZ,
    DEFAULT_MAX_FREQUENCY_HZ, NUM_CHANNELS,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

const RESET_SETTLE: Duration = Duration::from_millis(50);

// =============================================================================
// CoherentDdsFactory - DriverFactory implementation
// =============================================================================

/// Configuration for the coherent DDS driver
#[derive(Debug, Clone, Deserialize)]
pub struct CoherentDdsConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,

    /// Reference clock in Hz (default: 1 GHz)
    #[serde(default = "default_clock_hz")]
    pub clock_hz: f64,

    /// Highest accepted output frequency (default: 450 MHz)
    #[serde(default = "default_max_frequency_hz")]
    pub max_frequency_hz: f64,

    /// Select the on-board 1 GHz oscillator instead of the external clock
    #[serde(default)]
    pub internal_clock: bool,

    /// Channels whose phase coherence is disabled
    #[serde(default)]
    pub incoherent_channels: [bool; NUM_CHANNELS as usize],

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Reply timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_clock_hz() -> f64 {
    DEFAULT_CLOCK_HZ
}

fn default_max_frequency_hz() -> f64 {
    DEFAULT_MAX_FREQUENCY_HZ
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    1000
}

impl CoherentDdsConfig {
    /// Config for `port` with all defaults.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            clock_hz: default_clock_hz(),
            max_frequency_hz: default_max_frequency_hz(),
            internal_clock: false,
            incoherent_channels: [false; NUM_CHANNELS as usize],
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Codec implied by the clock settings.
    pub fn codec(&self) -> Result<WordCodec> {
        Ok(WordCodec::with_max_frequency(
            self.clock_hz,
            self.max_frequency_hz,
        )?)
    }
}

/// Factory for creating coherent DDS driver instances.
pub struct CoherentDdsFactory;

static COHERENT_DDS_CAPABILITIES: &[Capability] =
    &[Capability::ProfileProgrammable, Capability::PulseShaping];

impl DriverFactory for CoherentDdsFactory {
    fn driver_type(&self) -> &'static str {
        "coherent_dds"
    }

    fn name(&self) -> &'static str {
        "Phase-Coherent 4-Channel DDS"
    }

    fn capabilities(&self) -> &'static [Capability] {
        COHERENT_DDS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: CoherentDdsConfig = config.clone().try_into()?;
        cfg.codec()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: CoherentDdsConfig = config.try_into().context("Invalid coherent DDS config")?;
            let dds = Arc::new(CoherentDds::open(&cfg).await?);
            let identity = dds.identity().await?;
            tracing::info!(port = %cfg.port, identity = %identity, "Connected to coherent DDS");

            Ok(DeviceComponents::new()
                .with_profile_programmable(dds.clone())
                .with_pulse_shaping(dds)
                .with_metadata(DeviceMetadata {
                    clock_hz: Some(cfg.clock_hz),
                    max_frequency_hz: Some(cfg.max_frequency_hz),
                    identity: Some(identity),
                    address: Some(cfg.port),
                }))
        })
    }
}

// =============================================================================
// CoherentDds
// =============================================================================

/// Serial connection to one coherent DDS board.
///
/// The port is owned by this instance; every command holds the port lock
/// for its full request/response exchange.
pub struct CoherentDds {
    port: SharedPort,
    codec: WordCodec,
    timeout: Duration,
}

impl CoherentDds {
    /// Open the serial port and run the init sequence.
    pub async fn open(config: &CoherentDdsConfig) -> Result<Self> {
        config.codec()?;
        let port = open_serial_async(&config.port, config.baud_rate, "coherent DDS").await?;
        Self::with_port(Box::new(port), config).await
    }

    /// Use an already open port (or a test double) and run the init sequence.
    pub async fn with_port(port: DynSerial, config: &CoherentDdsConfig) -> Result<Self> {
        let dds = Self {
            port: wrap_shared(port),
            codec: config.codec()?,
            timeout: Duration::from_millis(config.timeout_ms),
        };
        dds.initialize(config.incoherent_channels, config.internal_clock)
            .await?;
        Ok(dds)
    }

    /// Coherence settings, trivial pulse shapes, then the clock source.
    ///
    /// The trivial shape keeps the output amplifier at full scale so the
    /// pulse-enable line has no effect until a real shape is loaded.
    async fn initialize(
        &self,
        incoherent_channels: [bool; NUM_CHANNELS as usize],
        internal_clock: bool,
    ) -> Result<()> {
        self.set_disable_coherence(incoherent_channels).await?;
        for channel in 0..NUM_CHANNELS {
            self.load_pulse_shape(channel, &PulseShape::trivial()).await?;
        }
        if internal_clock {
            self.set_clock_source(true).await?;
        }
        tracing::debug!(?incoherent_channels, internal_clock, "Coherent DDS initialized");
        Ok(())
    }

    /// Write one command without waiting for a reply.
    async fn send(&self, command: &str) -> Result<()> {
        let mut guard = self.port.lock().await;
        let port = guard.get_mut();
        port.write_all(command.as_bytes()).await.map_err(DdsError::from)?;
        port.flush().await.map_err(DdsError::from)?;
        tracing::trace!(command = command.trim_end(), "coherent DDS send");
        Ok(())
    }

    /// Write one command and collect `lines` reply lines.
    #[instrument(skip(self))]
    async fn query(&self, command: &str, lines: usize) -> Result<Vec<String>> {
        let mut guard = self.port.lock().await;
        {
            let port = guard.get_mut();
            port.write_all(command.as_bytes()).await.map_err(DdsError::from)?;
            port.flush().await.map_err(DdsError::from)?;
        }

        let mut replies = Vec::with_capacity(lines);
        for _ in 0..lines {
            replies.push(read_reply(&mut *guard, self.timeout, command.trim_end()).await?);
        }
        tracing::debug!(command = command.trim_end(), ?replies, "coherent DDS query");
        Ok(replies)
    }

    /// Enable or disable phase coherence per channel.
    ///
    /// Returns the board's acknowledgement line.
    pub async fn set_disable_coherence(
        &self,
        incoherent: [bool; NUM_CHANNELS as usize],
    ) -> Result<String> {
        let [a, b, c, d] = incoherent.map(u8::from);
        let mut reply = self
            .query(&format!("setDisableCoherence {} {} {} {}\n", a, b, c, d), 1)
            .await?;
        Ok(reply.pop().unwrap_or_default())
    }

    /// Choose the internal 1 GHz oscillator (`true`) or the external clock.
    pub async fn set_clock_source(&self, internal: bool) -> Result<Vec<String>> {
        self.query(&format!("setClockSource {}\n", u8::from(internal)), 2)
            .await
    }
}

#[async_trait]
impl ProfileProgrammable for CoherentDds {
    fn codec(&self) -> WordCodec {
        self.codec
    }

    async fn identity(&self) -> Result<String> {
        let mut reply = self.query("idn?\n", 1).await?;
        reply
            .pop()
            .ok_or_else(|| DdsError::Protocol("empty identity reply".to_string()).into())
    }

    #[instrument(skip(self))]
    async fn write_profile_words(
        &self,
        channel: u8,
        profile: u8,
        words: ProfileWords,
    ) -> Result<()> {
        check_channel(channel)?;
        check_profile(profile)?;
        self.send(&format!(
            "setProfile {} {} {} {} {}\n",
            channel, profile, words.frequency, words.phase, words.amplitude
        ))
        .await
    }

    async fn reset_phase(&self) -> Result<()> {
        self.send("resetPhase\n").await
    }

    async fn reset(&self) -> Result<()> {
        self.send("reset\n").await?;
        tokio::time::sleep(RESET_SETTLE).await;
        Ok(())
    }
}

#[async_trait]
impl PulseShaping for CoherentDds {
    async fn load_pulse_shape(&self, channel: u8, shape: &PulseShape) -> Result<()> {
        check_channel(channel)?;
        let words = shape
            .quantize()
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.send(&format!("setPulseShape {}\n{}\n", channel, words))
            .await
    }
}
