//! Driver factory and component types.
//!
//! Drivers implement [`DriverFactory`] and are registered with the device
//! registry at startup via explicit `registry.register_factory(...)` calls.
//! A factory turns one `[devices.driver]` TOML table into a
//! [`DeviceComponents`] bag holding the capabilities the device provides.
//!
//! ```text
//! main.rs ──register_factory──▶ DeviceRegistry ──build(toml)──▶ DeviceComponents
//! ```

use crate::capabilities::{ProfileProgrammable, PulseShaping, TimedBus};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Runtime capability flags for device introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Corresponds to [`ProfileProgrammable`].
    ProfileProgrammable,
    /// Corresponds to [`PulseShaping`].
    PulseShaping,
    /// Corresponds to [`TimedBus`].
    TimedBus,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProfileProgrammable => "Profile Programmable",
            Self::PulseShaping => "Pulse Shaping",
            Self::TimedBus => "Timed Bus",
        }
    }
}

/// Container for capability trait objects returned by drivers.
///
/// ```rust,ignore
/// let driver = Arc::new(CoherentDds::open(&cfg).await?);
///
/// let components = DeviceComponents::new()
///     .with_profile_programmable(driver.clone())
///     .with_pulse_shaping(driver);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Serial profile programming.
    pub profile_programmable: Option<Arc<dyn ProfileProgrammable>>,

    /// Envelope table upload.
    pub pulse_shaping: Option<Arc<dyn PulseShaping>>,

    /// Real-time profile-select bus.
    pub timed_bus: Option<Arc<dyn TimedBus>>,

    /// Descriptive metadata.
    pub metadata: DeviceMetadata,
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.profile_programmable.is_some() {
            caps.push(Capability::ProfileProgrammable);
        }
        if self.pulse_shaping.is_some() {
            caps.push(Capability::PulseShaping);
        }
        if self.timed_bus.is_some() {
            caps.push(Capability::TimedBus);
        }

        caps
    }

    /// Set ProfileProgrammable implementation
    pub fn with_profile_programmable(mut self, p: Arc<dyn ProfileProgrammable>) -> Self {
        self.profile_programmable = Some(p);
        self
    }

    /// Set PulseShaping implementation
    pub fn with_pulse_shaping(mut self, p: Arc<dyn PulseShaping>) -> Self {
        self.pulse_shaping = Some(p);
        self
    }

    /// Set TimedBus implementation
    pub fn with_timed_bus(mut self, t: Arc<dyn TimedBus>) -> Self {
        self.timed_bus = Some(t);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Descriptive information that does not fit the capability traits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceMetadata {
    /// Reference clock of a DDS.
    pub clock_hz: Option<f64>,
    /// Output ceiling of a DDS.
    pub max_frequency_hz: Option<f64>,
    /// Identification string captured at connect time.
    pub identity: Option<String>,
    /// Serial port or other address.
    pub address: Option<String>,
}

/// Trait for driver factories that create device instances.
///
/// Factories are registered once at startup and live for the program's
/// lifetime. `build()` returns a `'static` future, so a factory must not
/// hold mutable state across builds.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in TOML config `type` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// Opens the hardware link, runs the device's init sequence and returns
    /// the populated components. Connection failures are returned, never
    /// retried.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_name() {
        assert_eq!(Capability::TimedBus.name(), "Timed Bus");
    }

    #[test]
    fn test_device_components_capabilities() {
        let empty = DeviceComponents::new();
        assert!(empty.capabilities().is_empty());
    }

    #[test]
    fn test_device_components_metadata() {
        let components = DeviceComponents::new().with_metadata(DeviceMetadata {
            clock_hz: Some(1e9),
            ..Default::default()
        });
        assert_eq!(components.metadata.clock_hz, Some(1e9));
    }

    #[test]
    fn test_capability_serde() {
        let json = serde_json::to_string(&Capability::ProfileProgrammable).unwrap();
        assert_eq!(json, "\"profile_programmable\"");

        let cap: Capability = serde_json::from_str("\"pulse_shaping\"").unwrap();
        assert_eq!(cap, Capability::PulseShaping);
    }
}
