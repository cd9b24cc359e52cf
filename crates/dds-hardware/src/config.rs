//! System configuration.
//!
//! One TOML file describes the whole stack: the devices to build, how their
//! channels are grouped and named, the AOMs on those channels and the
//! bichromatic pair. Values can be overridden from the environment with the
//! `DDS_` prefix (`DDS_LEDGER_PATH=/tmp/profiles.json`).
//!
//! ```toml
//! pulse_shape_aom = "rH2"
//! ledger_path = "profiles.json"
//!
//! [[devices]]
//! id = "dds"
//! [devices.driver]
//! type = "coherent_dds"
//! port = "/dev/ttyUSB0"
//!
//! [[devices]]
//! id = "bus"
//! [devices.driver]
//! type = "mock_timed_bus"
//!
//! [[groups]]
//! name = "raman"
//! devices = [{ dds = "dds", bus = "bus" }]
//! channels = { ch1 = { device = "dds", channel = 0 } }
//! ```

use crate::aom::AomConfig;
use crate::bichromatic::BichromaticConfig;
use crate::group::GroupConfig;
use dds_core::error::{DdsError, DdsResult};
use dds_core::words::NUM_CHANNELS;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SIMULATION_CONFIG: &str = include_str!("../../../config/simulation.toml");

const DDS_DRIVER_TYPES: &[&str] = &["coherent_dds", "mock_dds"];

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// File read error
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    /// Parse error (invalid TOML)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Validation error
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Schema validation error
    #[error("Schema validation failed:\n{0}")]
    SchemaValidationError(String),
}

/// One `[[devices]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceConfig {
    /// Registry id.
    #[validate(min_length = 1)]
    pub id: String,
    /// Human-readable name (defaults to the id).
    #[serde(default)]
    pub name: Option<String>,
    /// Driver table; `type` selects the factory, the rest is passed to it.
    pub driver: toml::Value,
}

impl DeviceConfig {
    /// Factory type and the remaining driver table.
    pub fn split_driver(&self) -> DdsResult<(String, toml::Value)> {
        let mut table = self.driver.as_table().cloned().ok_or_else(|| {
            DdsError::Configuration(format!("device '{}': driver must be a table", self.id))
        })?;
        match table.remove("type") {
            Some(toml::Value::String(driver_type)) => Ok((driver_type, toml::Value::Table(table))),
            _ => Err(DdsError::Configuration(format!(
                "device '{}': driver table needs a string 'type'",
                self.id
            ))),
        }
    }

    fn driver_type(&self) -> Option<&str> {
        self.driver.get("type").and_then(toml::Value::as_str)
    }
}

/// Whole-system configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SystemConfig {
    /// Devices to build at startup.
    #[serde(default)]
    #[validate]
    pub devices: Vec<DeviceConfig>,
    /// Named channel groups.
    #[serde(default)]
    #[validate]
    pub groups: Vec<GroupConfig>,
    /// AOMs and their frequency mappings.
    #[serde(default)]
    #[validate]
    pub aoms: Vec<AomConfig>,
    /// Sideband pair for `set_bichromat`.
    #[serde(default)]
    #[validate]
    pub bichromatic: Option<BichromaticConfig>,
    /// AOM whose channel carries the pulse-shape table.
    #[serde(default)]
    pub pulse_shape_aom: Option<String>,
    /// Profile ledger file; in memory only if unset.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
}

impl SystemConfig {
    /// Load from a TOML file merged with `DDS_*` environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.display().to_string()));
        }
        if !path.is_file() {
            return Err(ConfigLoadError::ReadError(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        debug!(path = %path.display(), "Loading system config");

        let config: SystemConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DDS_").split("__"))
            .extract()
            .map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;

        config.check()?;
        info!(
            path = %path.display(),
            devices = config.devices.len(),
            aoms = config.aoms.len(),
            "Loaded system config"
        );
        Ok(config)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        let config: SystemConfig =
            toml::from_str(content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Built-in configuration with simulated devices.
    pub fn simulation() -> Result<Self, ConfigLoadError> {
        Self::from_toml_str(SIMULATION_CONFIG)
    }

    /// Schema checks followed by cross-reference checks.
    pub fn check(&self) -> Result<(), ConfigLoadError> {
        if let Err(errors) = self.validate() {
            let error_messages: Vec<String> =
                errors.to_string().lines().map(|s| s.to_string()).collect();
            return Err(ConfigLoadError::SchemaValidationError(
                error_messages.join("\n"),
            ));
        }

        if let Err(errors) = validate_system_config(self) {
            return Err(ConfigLoadError::ValidationError(errors.join("\n")));
        }
        Ok(())
    }

    /// Point every DDS at `port` (switching it to the serial driver) and/or
    /// change its reference clock.
    pub fn with_dds_overrides(mut self, port: Option<&str>, clock_hz: Option<f64>) -> Self {
        for device in &mut self.devices {
            let is_dds = device
                .driver_type()
                .is_some_and(|ty| DDS_DRIVER_TYPES.contains(&ty));
            let Some(table) = device.driver.as_table_mut().filter(|_| is_dds) else {
                continue;
            };
            if let Some(port) = port {
                table.insert("type".into(), toml::Value::String("coherent_dds".into()));
                table.insert("port".into(), toml::Value::String(port.into()));
            }
            if let Some(clock_hz) = clock_hz {
                table.insert("clock_hz".into(), toml::Value::Float(clock_hz));
            }
        }
        self
    }
}

/// Cross-reference checks serde_valid cannot express.
///
/// Returns every problem found, not just the first.
pub fn validate_system_config(config: &SystemConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let mut device_ids = BTreeSet::new();
    for device in &config.devices {
        if !device_ids.insert(device.id.as_str()) {
            errors.push(format!("duplicate device id '{}'", device.id));
        }
        if let Err(e) = device.split_driver() {
            errors.push(e.to_string());
        }
    }

    let mut groups: BTreeMap<&str, &GroupConfig> = BTreeMap::new();
    for group in &config.groups {
        if groups.insert(group.name.as_str(), group).is_some() {
            errors.push(format!("duplicate group '{}'", group.name));
        }
        let members: BTreeSet<&str> = group.devices.iter().map(|d| d.dds.as_str()).collect();
        for member in &group.devices {
            if !device_ids.contains(member.dds.as_str()) {
                errors.push(format!(
                    "group '{}': unknown device '{}'",
                    group.name, member.dds
                ));
            }
            if let Some(bus) = &member.bus {
                if !device_ids.contains(bus.as_str()) {
                    errors.push(format!("group '{}': unknown bus '{}'", group.name, bus));
                }
            }
        }
        for (name, target) in &group.channels {
            if !members.contains(target.device.as_str()) {
                errors.push(format!(
                    "group '{}': channel '{}' refers to '{}', which is not a group member",
                    group.name, name, target.device
                ));
            }
            if target.channel >= NUM_CHANNELS {
                errors.push(format!(
                    "group '{}': channel '{}' has index {} (max {})",
                    group.name,
                    name,
                    target.channel,
                    NUM_CHANNELS - 1
                ));
            }
        }
    }

    let mut aom_names = BTreeSet::new();
    for aom in &config.aoms {
        if !aom_names.insert(aom.name.as_str()) {
            errors.push(format!("duplicate AOM '{}'", aom.name));
        }
        match groups.get(aom.group.as_str()) {
            Some(group) if !group.channels.contains_key(&aom.channel) => errors.push(format!(
                "AOM '{}': group '{}' has no channel '{}'",
                aom.name, aom.group, aom.channel
            )),
            Some(_) => {}
            None => errors.push(format!(
                "AOM '{}': unknown group '{}'",
                aom.name, aom.group
            )),
        }
        let [min, max] = aom.range_hz;
        if !(min.is_finite() && max.is_finite() && min < max) {
            errors.push(format!(
                "AOM '{}': range [{}, {}] is empty",
                aom.name, min, max
            ));
        }
        if aom.order == 0 {
            errors.push(format!("AOM '{}': order must be non-zero", aom.name));
        }
    }

    if let Some(bichromatic) = &config.bichromatic {
        for name in [&bichromatic.blue_aom, &bichromatic.red_aom] {
            if !aom_names.contains(name.as_str()) {
                errors.push(format!("bichromatic: unknown AOM '{}'", name));
            }
        }
        if bichromatic.blue_aom == bichromatic.red_aom {
            errors.push("bichromatic: blue and red AOM must differ".to_string());
        }
    }

    if let Some(name) = &config.pulse_shape_aom {
        if !aom_names.contains(name.as_str()) {
            errors.push(format!("pulse_shape_aom: unknown AOM '{}'", name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_config_is_valid() {
        let config = SystemConfig::simulation().unwrap();
        assert_eq!(config.aoms.len(), 4);
        assert_eq!(config.pulse_shape_aom.as_deref(), Some("rH2"));
        assert!(config.bichromatic.is_some());
    }

    #[test]
    fn split_driver_strips_type() {
        let device: DeviceConfig = toml::from_str(
            r#"
            id = "dds"
            driver = { type = "mock_dds", clock_hz = 1.0e9 }
            "#,
        )
        .unwrap();
        let (ty, table) = device.split_driver().unwrap();
        assert_eq!(ty, "mock_dds");
        assert!(table.get("type").is_none());
        assert_eq!(table.get("clock_hz").and_then(toml::Value::as_float), Some(1e9));
    }

    #[test]
    fn dangling_references_are_reported() {
        let err = SystemConfig::from_toml_str(
            r#"
            pulse_shape_aom = "nowhere"

            [[devices]]
            id = "dds"
            driver = { type = "mock_dds" }

            [[groups]]
            name = "raman"
            devices = [{ dds = "dds", bus = "missing_bus" }]
            channels = { ch1 = { device = "other", channel = 5 } }

            [[aoms]]
            name = "a"
            group = "raman"
            channel = "ch9"
            range_hz = [1.0, 2.0]
            mapping = { formula = "direct" }
            "#,
        )
        .unwrap_err();

        let message = match err {
            ConfigLoadError::ValidationError(message) => message,
            other => panic!("expected cross-reference errors, got {other:?}"),
        };
        for needle in ["missing_bus", "'other'", "index 5", "ch9", "nowhere"] {
            assert!(message.contains(needle), "{needle} not in {message}");
        }
    }

    #[test]
    fn schema_errors_are_separate() {
        let err = SystemConfig::from_toml_str(
            r#"
            [[devices]]
            id = ""
            driver = { type = "mock_dds" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::SchemaValidationError(_)));
    }

    #[test]
    fn overrides_switch_dds_to_serial() {
        let config = SystemConfig::simulation()
            .unwrap()
            .with_dds_overrides(Some("/dev/ttyUSB3"), Some(500e6));
        let dds = config.devices.iter().find(|d| d.id == "dds").unwrap();
        assert_eq!(dds.driver_type(), Some("coherent_dds"));
        assert_eq!(dds.driver.get("port").and_then(toml::Value::as_str), Some("/dev/ttyUSB3"));
        assert_eq!(dds.driver.get("clock_hz").and_then(toml::Value::as_float), Some(500e6));

        let bus = config.devices.iter().find(|d| d.id == "bus").unwrap();
        assert_eq!(bus.driver_type(), Some("mock_timed_bus"));
        assert!(bus.driver.get("port").is_none());
    }

    #[test]
    fn file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            SystemConfig::from_file(&missing),
            Err(ConfigLoadError::NotFound(_))
        ));
        assert!(matches!(
            SystemConfig::from_file(dir.path()),
            Err(ConfigLoadError::ReadError(_))
        ));

        let path = dir.path().join("system.toml");
        std::fs::write(&path, SIMULATION_CONFIG).unwrap();
        let config = SystemConfig::from_file(&path).unwrap();
        assert_eq!(config.devices.len(), 2);
    }
}
