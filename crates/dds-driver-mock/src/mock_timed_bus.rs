//! Simulated real-time profile-select bus.
//!
//! Keeps a timeline cursor and a record of every `(time, word)` written.
//! Enforces the two rules of the real link: the cursor never moves backwards
//! and a transfer may not start before the previous one has shifted out.

use anyhow::Result;
use async_trait::async_trait;
use dds_core::capabilities::TimedBus;
use dds_core::driver::{Capability, DeviceComponents, DriverFactory};
use dds_core::error::DdsError;
use dds_core::timing::{BusTiming, MachineUnits, DEFAULT_DDS_LATENCY_MU};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

/// Slack between the start of the timeline and the first activation, so
/// the first switch can be written ahead of it.
pub const DEFAULT_START_MU: MachineUnits = 1_000_000;

// =============================================================================
// MockTimedBusFactory - DriverFactory implementation
// =============================================================================

/// Configuration for MockTimedBus driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockTimedBusConfig {
    /// Coarse reference period in ns (default: 8)
    #[serde(default = "default_ref_period_mu")]
    pub ref_period_mu: MachineUnits,

    /// SPI clock divider (default: 2)
    #[serde(default = "default_clock_div")]
    pub clock_div: MachineUnits,

    /// DDS output latency in ns (default: 1300)
    #[serde(default = "default_dds_latency_mu")]
    pub dds_latency_mu: MachineUnits,

    /// Initial cursor position
    #[serde(default = "default_start_mu")]
    pub start_mu: MachineUnits,
}

fn default_ref_period_mu() -> MachineUnits {
    8
}

fn default_clock_div() -> MachineUnits {
    2
}

fn default_dds_latency_mu() -> MachineUnits {
    DEFAULT_DDS_LATENCY_MU
}

fn default_start_mu() -> MachineUnits {
    DEFAULT_START_MU
}

impl MockTimedBusConfig {
    /// Bus timing described by this config.
    pub fn timing(&self) -> BusTiming {
        BusTiming {
            ref_period_mu: self.ref_period_mu,
            clock_div: self.clock_div,
            dds_latency_mu: self.dds_latency_mu,
        }
    }
}

/// Factory for creating MockTimedBus instances.
pub struct MockTimedBusFactory;

static MOCK_TIMED_BUS_CAPABILITIES: &[Capability] = &[Capability::TimedBus];

impl DriverFactory for MockTimedBusFactory {
    fn driver_type(&self) -> &'static str {
        "mock_timed_bus"
    }

    fn name(&self) -> &'static str {
        "Simulated Profile-Select Bus"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MOCK_TIMED_BUS_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockTimedBusConfig = config.clone().try_into()?;
        if cfg.ref_period_mu <= 0 || cfg.clock_div <= 0 {
            return Err(DdsError::Configuration(
                "ref_period_mu and clock_div must be positive".to_string(),
            )
            .into());
        }
        if cfg.dds_latency_mu < 0 {
            return Err(
                DdsError::Configuration("dds_latency_mu must not be negative".to_string()).into(),
            );
        }
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: MockTimedBusConfig = config.try_into()?;
            let bus = Arc::new(MockTimedBus::starting_at(cfg.timing(), cfg.start_mu));
            Ok(DeviceComponents::new().with_timed_bus(bus))
        })
    }
}

// =============================================================================
// MockTimedBus
// =============================================================================

/// One recorded bus transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusEvent {
    /// Start of the transfer.
    pub at_mu: MachineUnits,
    /// 32-bit SPI word.
    pub word: u32,
}

impl BusEvent {
    /// Control byte carried in the top eight bits.
    pub fn control_byte(&self) -> u8 {
        (self.word >> 24) as u8
    }
}

#[derive(Debug)]
struct Timeline {
    now_mu: MachineUnits,
    bus_free_at_mu: MachineUnits,
    events: Vec<BusEvent>,
}

/// Simulated profile-select bus with collision detection.
pub struct MockTimedBus {
    timing: BusTiming,
    timeline: Mutex<Timeline>,
}

impl MockTimedBus {
    /// Bus with the cursor at [`DEFAULT_START_MU`].
    pub fn new(timing: BusTiming) -> Self {
        Self::starting_at(timing, DEFAULT_START_MU)
    }

    /// Bus with the cursor at `start_mu`.
    pub fn starting_at(timing: BusTiming, start_mu: MachineUnits) -> Self {
        Self {
            timing,
            timeline: Mutex::new(Timeline {
                now_mu: start_mu,
                bus_free_at_mu: MachineUnits::MIN,
                events: Vec::new(),
            }),
        }
    }

    /// Every transfer written so far, in call order.
    pub fn events(&self) -> Vec<BusEvent> {
        self.timeline.lock().events.clone()
    }
}

#[async_trait]
impl TimedBus for MockTimedBus {
    fn timing(&self) -> BusTiming {
        self.timing
    }

    fn now_mu(&self) -> MachineUnits {
        self.timeline.lock().now_mu
    }

    async fn write_at(&self, at_mu: MachineUnits, word: u32) -> Result<()> {
        let mut timeline = self.timeline.lock();
        if at_mu < timeline.bus_free_at_mu {
            return Err(DdsError::Timeline(format!(
                "bus collision: transfer at {} mu overlaps previous transfer ending at {} mu",
                at_mu, timeline.bus_free_at_mu
            ))
            .into());
        }
        timeline.bus_free_at_mu = at_mu + self.timing.xfer_period_mu();
        timeline.events.push(BusEvent { at_mu, word });
        tracing::trace!(at_mu, word = format_args!("{:#010x}", word), "timed bus write");
        Ok(())
    }

    async fn delay_mu(&self, duration_mu: MachineUnits) -> Result<()> {
        if duration_mu < 0 {
            return Err(DdsError::Timeline(format!(
                "negative delay of {} mu would rewind the timeline",
                duration_mu
            ))
            .into());
        }
        self.timeline.lock().now_mu += duration_mu;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dds_core::timing::ControlWord;

    #[tokio::test]
    async fn test_switch_is_written_ahead_and_blocks_for_settle() {
        let timing = BusTiming::default();
        let bus = MockTimedBus::starting_at(timing, 10_000);
        let word = ControlWord::profile(1, 3).unwrap();

        let switch = bus.schedule_switch(word).await.unwrap();
        let p = timing.profile_timing();

        assert_eq!(switch.active_at_mu, 10_000);
        assert_eq!(switch.write_at_mu, 10_000 - p.lead_mu);
        assert_eq!(bus.now_mu(), 10_000 + p.settle_mu);
        assert_eq!(
            bus.events(),
            vec![BusEvent {
                at_mu: 10_000 - p.lead_mu,
                word: word.spi_word()
            }]
        );
    }

    #[tokio::test]
    async fn test_overlapping_write_is_a_collision() {
        let bus = MockTimedBus::new(BusTiming::default());
        bus.write_at(5_000, 0).await.unwrap();
        let err = bus.write_at(5_000 + 100, 0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DdsError>(),
            Some(DdsError::Timeline(_))
        ));
        assert_eq!(bus.events().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_delay_is_rejected() {
        let bus = MockTimedBus::new(BusTiming::default());
        assert!(bus.delay_mu(-1).await.is_err());
        assert_eq!(bus.now_mu(), DEFAULT_START_MU);
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = MockTimedBusFactory;
        let valid = toml::Value::Table(toml::toml! {
            ref_period_mu = 8
        });
        assert!(factory.validate(&valid).is_ok());

        let invalid = toml::Value::Table(toml::toml! {
            clock_div = 0
        });
        assert!(factory.validate(&invalid).is_err());
    }
}
