//! Error types for the DDS control stack.
//!
//! `DdsError` is the single taxonomy used by every crate in the workspace.
//! Capability traits return `anyhow::Result` so drivers can attach context,
//! but the root cause is always one of these variants and callers recover it
//! with `err.downcast_ref::<DdsError>()`.
//!
//! ## Error Categories
//!
//! - **Validation** (`Range`, `AomRange`): the request was rejected before any
//!   byte reached the hardware. Permanent, fix the request.
//! - **Link** (`Connection`, `Protocol`, `Timeout`, `Io`): the serial
//!   transaction failed. No retries are attempted.
//! - **Timeline** (`Timeline`): a timed bus write would overlap a previous
//!   transfer or rewind the cursor.
//! - **Setup** (`Configuration`): bad configuration or missing capability.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Coarse classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device did not come up.
    Initialization,
    /// Driver table in the config is unusable.
    Configuration,
    /// Link-level failure.
    Communication,
    /// Request rejected by the driver.
    InvalidParameter,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a driver factory or driver instance.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Factory type name, e.g. `coherent_dds`.
    pub driver_type: String,
    /// Failure class.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the stack's error type.
pub type DdsResult<T> = std::result::Result<T, DdsError>;

/// Primary error type for the DDS stack.
#[derive(Error, Debug)]
pub enum DdsError {
    /// A numeric argument or derived word is outside its valid domain.
    ///
    /// `field` names the offending input (`frequency`, `phase_word`,
    /// `amplitude`, `channel`, `profile`, `duration`, ...).
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    Range {
        /// Offending field name.
        field: &'static str,
        /// Value that was supplied (or computed).
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// A mapped AOM drive frequency is outside the AOM's window.
    #[error(
        "{aom} AOM frequency out of range, {} MHz not in [{}, {}] MHz",
        frequency_hz / 1e6,
        min_hz / 1e6,
        max_hz / 1e6
    )]
    AomRange {
        /// AOM name.
        aom: String,
        /// Computed physical drive frequency.
        frequency_hz: f64,
        /// Lower edge of the window.
        min_hz: f64,
        /// Upper edge of the window.
        max_hz: f64,
    },

    /// The device answered with something the driver cannot interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The link could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A reply did not arrive within the port timeout.
    #[error("Timed out after {timeout_ms} ms waiting for reply to '{command}'")]
    Timeout {
        /// Command awaiting a reply.
        command: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// A timed bus operation violates the timeline.
    #[error("Timeline error: {0}")]
    Timeline(String),

    /// Configuration is semantically invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver-level failure with a classified kind.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl DdsError {
    /// Build a [`DdsError::Range`].
    pub fn range(field: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::Range {
            field,
            value,
            min,
            max,
        }
    }

    /// Name of the offending field for range errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Range { field, .. } => Some(field),
            _ => None,
        }
    }

    /// True if the request was rejected before touching hardware.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Range { .. } | Self::AomRange { .. })
    }
}

/// Reject values outside `[min, max]`, including NaN.
pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> DdsResult<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(DdsError::range(field, value, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_error_names_field() {
        let err = check_range("amplitude", 1.5, 0.0, 1.0).unwrap_err();
        assert_eq!(err.field(), Some("amplitude"));
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "amplitude out of range: 1.5 not in [0, 1]");
    }

    #[test]
    fn nan_is_out_of_range() {
        assert!(check_range("frequency", f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn aom_range_message_reports_mhz() {
        let err = DdsError::AomRange {
            aom: "rPara".to_string(),
            frequency_hz: 260e6,
            min_hz: 200e6,
            max_hz: 250e6,
        };
        assert_eq!(
            err.to_string(),
            "rPara AOM frequency out of range, 260 MHz not in [200, 250] MHz"
        );
    }

    #[test]
    fn driver_error_display() {
        let err = DriverError::new(
            "coherent_dds",
            DriverErrorKind::Communication,
            "port closed",
        );
        assert_eq!(
            err.to_string(),
            "Driver 'coherent_dds' communication error: port closed"
        );
    }
}
