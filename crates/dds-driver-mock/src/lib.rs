//! Mock hardware drivers for the coherent DDS stack.
//!
//! Simulated devices for running the full control path without a board or
//! a real-time controller attached. All waits use `tokio::time::sleep`.
//!
//! # Available Mock Drivers
//!
//! - [`MockDds`] - four-channel DDS with profile registers, pulse-shape
//!   tables and a wire-format command log
//! - [`MockTimedBus`] - profile-select bus with a timeline cursor and
//!   collision detection
//!
//! # Driver Factory Pattern
//!
//! ```rust,ignore
//! use dds_driver_mock::{MockDdsFactory, MockTimedBusFactory};
//! use dds_hardware::DeviceRegistry;
//!
//! let registry = DeviceRegistry::new();
//! registry.register_factory(Box::new(MockDdsFactory));
//! registry.register_factory(Box::new(MockTimedBusFactory));
//! ```

pub mod common;
mod mock_dds;
mod mock_timed_bus;

pub use common::{FaultConfig, FaultScenario, MockMode, TimingConfig};

pub use mock_dds::{MockDds, MockDdsConfig, MockDdsFactory};
pub use mock_timed_bus::{
    BusEvent, MockTimedBus, MockTimedBusConfig, MockTimedBusFactory, DEFAULT_START_MU,
};
