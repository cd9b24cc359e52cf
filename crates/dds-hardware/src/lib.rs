//! Device registry, profile store and AOM frequency mapping.
//!
//! Builds the runtime object graph from a [`SystemConfig`]:
//!
//! ```text
//! SystemConfig ─▶ DeviceRegistry ─▶ DdsGroup/DdsChannel ─▶ Aom ─▶ AomInterface
//!                 (drivers)          (profile store)       (mapping)
//! ```
//!
//! - [`registry`]: factories and built devices, looked up by capability
//! - [`group`]: named channels, profile writes and timed profile selects
//! - [`aom`]: logical-to-RF frequency mapping and AOM windows
//! - [`bichromatic`]: symmetric sideband pairs
//! - [`interface`]: the by-name API experiments use
//! - [`ledger`]: persisted record of what each profile slot holds
//! - [`config`]: TOML loading and validation

pub mod aom;
pub mod bichromatic;
pub mod config;
pub mod group;
pub mod interface;
pub mod ledger;
pub mod registry;

pub use aom::{Aom, AomConfig, FrequencyMapping, LinearFormula, MappingOptions, QubitReference};
pub use bichromatic::{balanced_amplitudes, compose, BichromaticTones, SidebandAmplitudes};
pub use config::{ConfigLoadError, SystemConfig};
pub use group::{DdsChannel, DdsGroup};
pub use interface::{AomInterface, BichromaticRequest, DEFAULT_PULSE_SHAPE_DURATION_S};
pub use ledger::ProfileLedger;
pub use registry::{create_registry_from_config, DeviceInfo, DeviceRegistry};
