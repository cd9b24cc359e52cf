//! Device registry.
//!
//! Holds the driver factories and every device built from them, and hands
//! out capability trait objects by device id. Created once at startup and
//! passed around as `Arc<DeviceRegistry>`; both maps are `DashMap`s so no
//! outer lock is needed.
//!
//! ```rust,ignore
//! let registry = DeviceRegistry::with_default_factories();
//! registry
//!     .register_from_toml("dds", "Raman DDS", "coherent_dds", driver_table)
//!     .await?;
//! let dds = registry.get_profile_programmable("dds");
//! ```

use crate::config::{DeviceConfig, SystemConfig};
use dashmap::DashMap;
use dds_core::capabilities::{ProfileProgrammable, PulseShaping, TimedBus};
use dds_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use dds_core::error::{DdsError, DdsResult, DriverError, DriverErrorKind};
use std::sync::Arc;

/// Device identifier used in configuration.
pub type DeviceId = String;

// =============================================================================
// Device Info (for introspection)
// =============================================================================

/// Information about a registered device (returned by list operations)
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Unique identifier
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Driver type name (e.g., "coherent_dds", "mock_timed_bus")
    pub driver_type: String,
    /// Capabilities this device supports
    pub capabilities: Vec<Capability>,
    /// Clock, identity and address reported by the driver
    pub metadata: DeviceMetadata,
}

struct RegisteredDevice {
    name: String,
    driver_type: String,
    components: DeviceComponents,
}

impl RegisteredDevice {
    fn info(&self, id: &str) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: self.name.clone(),
            driver_type: self.driver_type.clone(),
            capabilities: self.components.capabilities(),
            metadata: self.components.metadata.clone(),
        }
    }
}

// =============================================================================
// Device Registry
// =============================================================================

/// Central registry for DDS and timed-bus devices.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, RegisteredDevice>,
    factories: DashMap<String, Box<dyn DriverFactory>>,
}

impl DeviceRegistry {
    /// Create a new empty device registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every factory compiled into this build.
    pub fn with_default_factories() -> Self {
        let registry = Self::new();
        register_all_factories(&registry);
        registry
    }

    // =========================================================================
    // Driver Factory Management
    // =========================================================================

    /// Register a driver factory, replacing any previous one of the same type.
    pub fn register_factory(&self, factory: Box<dyn DriverFactory>) -> Option<Box<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::info!(
            driver_type = %driver_type,
            name = %factory.name(),
            capabilities = ?factory.capabilities(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Check if a factory is registered for a driver type.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// List all registered factory driver types.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Check a driver table against its factory without building anything.
    pub fn validate_driver_config(&self, driver_type: &str, config: &toml::Value) -> DdsResult<()> {
        let factory = self.factories.get(driver_type).ok_or_else(|| {
            DdsError::Configuration(format!(
                "No factory registered for driver_type '{}'. Available factories: {:?}",
                driver_type,
                self.list_factories()
            ))
        })?;
        factory.validate(config).map_err(|e| {
            DriverError::new(driver_type, DriverErrorKind::Configuration, e.to_string()).into()
        })
    }

    // =========================================================================
    // Device Registration
    // =========================================================================

    /// Build a device from its driver table and register it.
    ///
    /// Fails if the id is taken, no factory matches, the table does not
    /// validate, or the driver cannot be brought up.
    pub async fn register_from_toml(
        &self,
        device_id: &str,
        device_name: &str,
        driver_type: &str,
        config: toml::Value,
    ) -> DdsResult<()> {
        if self.devices.contains_key(device_id) {
            return Err(DdsError::Configuration(format!(
                "Device '{}' is already registered",
                device_id
            )));
        }

        self.validate_driver_config(driver_type, &config)
            .map_err(|e| {
                DdsError::Configuration(format!(
                    "Configuration validation failed for device '{}' ({}): {}",
                    device_id, driver_type, e
                ))
            })?;

        tracing::info!(
            device_id = %device_id,
            device_name = %device_name,
            driver_type = %driver_type,
            "Building device from factory"
        );

        // build() returns a 'static future; the map guard is released first
        let build = match self.factories.get(driver_type) {
            Some(factory) => factory.build(config),
            None => {
                return Err(DdsError::Configuration(format!(
                    "Factory '{}' was removed during registration",
                    driver_type
                )))
            }
        };
        let components = build.await.map_err(|e| {
            DriverError::new(
                driver_type,
                DriverErrorKind::Initialization,
                format!("Factory build failed for device '{}': {:#}", device_id, e),
            )
        })?;

        self.register_components(device_id, device_name, driver_type, components)
    }

    /// Register an already built device.
    pub fn register_components(
        &self,
        device_id: &str,
        device_name: &str,
        driver_type: &str,
        components: DeviceComponents,
    ) -> DdsResult<()> {
        match self.devices.entry(device_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DdsError::Configuration(format!(
                "Device '{}' is already registered",
                device_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(
                    device_id = %device_id,
                    capabilities = ?components.capabilities(),
                    "Device registered"
                );
                slot.insert(RegisteredDevice {
                    name: device_name.to_string(),
                    driver_type: driver_type.to_string(),
                    components,
                });
                Ok(())
            }
        }
    }

    /// Remove a device. Returns false if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.devices.remove(id).is_some()
    }

    /// Drop every device. Ports close when the last handle goes away.
    pub fn shutdown(&self) {
        let count = self.devices.len();
        self.devices.clear();
        tracing::info!(devices = count, "Device registry shut down");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All devices, sorted by id.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<DeviceInfo> = self
            .devices
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Info for one device.
    pub fn get_device_info(&self, id: &str) -> Option<DeviceInfo> {
        self.devices.get(id).map(|device| device.info(id))
    }

    /// Check if a device is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no devices are registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Get a device as ProfileProgrammable.
    pub fn get_profile_programmable(&self, id: &str) -> Option<Arc<dyn ProfileProgrammable>> {
        self.devices
            .get(id)
            .and_then(|d| d.components.profile_programmable.clone())
    }

    /// Get a device as PulseShaping.
    pub fn get_pulse_shaping(&self, id: &str) -> Option<Arc<dyn PulseShaping>> {
        self.devices
            .get(id)
            .and_then(|d| d.components.pulse_shaping.clone())
    }

    /// Get a device as TimedBus.
    pub fn get_timed_bus(&self, id: &str) -> Option<Arc<dyn TimedBus>> {
        self.devices
            .get(id)
            .and_then(|d| d.components.timed_bus.clone())
    }
}

/// Register the mock factories and, when enabled, the serial driver.
pub fn register_all_factories(registry: &DeviceRegistry) {
    registry.register_factory(Box::new(dds_driver_mock::MockDdsFactory));
    registry.register_factory(Box::new(dds_driver_mock::MockTimedBusFactory));

    #[cfg(feature = "driver-coherent")]
    {
        registry.register_factory(Box::new(dds_driver_coherent::CoherentDdsFactory));
    }
}

/// Build and register every configured device.
///
/// Every driver table is validated before the first device is built, and
/// any build failure aborts: a DDS that cannot be reached at startup is
/// fatal.
pub async fn create_registry_from_config(config: &SystemConfig) -> DdsResult<DeviceRegistry> {
    let registry = DeviceRegistry::with_default_factories();

    let mut validation_errors = Vec::new();
    let mut prepared = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        match device
            .split_driver()
            .and_then(|(ty, table)| {
                registry.validate_driver_config(&ty, &table)?;
                Ok((ty, table))
            }) {
            Ok((driver_type, table)) => prepared.push((device, driver_type, table)),
            Err(e) => validation_errors.push(format!("Device '{}': {}", device.id, e)),
        }
    }

    if !validation_errors.is_empty() {
        return Err(DdsError::Configuration(format!(
            "Hardware configuration validation failed:\n  - {}",
            validation_errors.join("\n  - ")
        )));
    }

    for (device, driver_type, table) in prepared {
        register_device(&registry, device, &driver_type, table).await?;
    }

    tracing::info!(devices = registry.len(), "Device registry ready");
    Ok(registry)
}

async fn register_device(
    registry: &DeviceRegistry,
    device: &DeviceConfig,
    driver_type: &str,
    table: toml::Value,
) -> DdsResult<()> {
    let name = device.name.as_deref().unwrap_or(&device.id);
    registry
        .register_from_toml(&device.id, name, driver_type, table)
        .await
        .map_err(|e| {
            tracing::error!(device_id = %device.id, error = %e, "Device failed to start");
            e
        })
}
