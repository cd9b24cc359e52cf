//! Common infrastructure for mock devices.
//!
//! - **mode**: Operational modes (Instant, Realistic)
//! - **timing**: Serial round-trip delays for realistic mode
//! - **faults**: Deterministic error injection

pub mod faults;
pub mod mode;
pub mod timing;

pub use faults::{FaultConfig, FaultScenario};
pub use mode::MockMode;
pub use timing::TimingConfig;
