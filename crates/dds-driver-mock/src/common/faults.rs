//! Error injection for mock devices.
//!
//! Scenarios are deterministic so tests can assert exactly which call fails
//! and that nothing is retried behind their back.

use dds_core::error::{DdsError, DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A failure to inject.
#[derive(Debug, Clone)]
pub enum FaultScenario {
    /// Fail every call to `operation` after `count` successful ones.
    FailAfterN {
        /// Operation name, e.g. `"set_profile"`.
        operation: &'static str,
        /// Successful calls before the first failure.
        count: u32,
    },
    /// Every call to `operation` times out.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
    /// All operations fail from the first call onwards.
    CommunicationLoss,
}

/// Error injection configuration shared by clones of one device.
#[derive(Clone, Debug, Default)]
pub struct FaultConfig {
    scenarios: Arc<Vec<FaultScenario>>,
    counts: Arc<Mutex<HashMap<&'static str, u32>>>,
}

impl FaultConfig {
    /// No injected failures.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<FaultScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            counts: Arc::default(),
        }
    }

    /// Decide whether `operation` fails this time.
    pub fn check(&self, driver_type: &str, operation: &'static str) -> Result<(), DdsError> {
        let mut counts = self.counts.lock();
        let seen = counts.entry(operation).or_insert(0);
        *seen += 1;

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::CommunicationLoss => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    )
                    .into());
                }
                FaultScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DdsError::Timeout {
                        command: operation.to_string(),
                        timeout_ms: 0,
                    });
                }
                FaultScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && *seen > *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        format!("Injected failure after {} operations", count),
                    )
                    .into());
                }
                _ => {}
            }
        }
        Ok(())
    }
}
