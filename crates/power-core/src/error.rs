//! Error types for power characterization.
//!
//! This module defines `PowerError`, the single error type shared by the
//! acquisition session, the step executors and the scenario engine. Using the
//! `thiserror` crate, each variant carries enough context (step, channel,
//! chunk) for the failure to be reported without a debugger attached.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: calibration or settings data that is missing or
//!   invalid. Raised before any hardware is touched.
//! - **`ChannelConfiguration`**: the DAQ rejected every terminal mode for a channel.
//! - **`AcquisitionTimeout`**: a chunk read kept failing past its retry bound.
//! - **`InsufficientSamples`**: too few samples for the requested statistic.
//! - **`AlreadyRunning`**: re-entrancy guard on the scenario engine.
//! - **`Driver`**: structured failure reported by an external collaborator.
//!
//! Collaborator traits return [`DriverError`] directly; it converts into
//! `PowerError` with `?`.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device could not be opened or initialized
    Initialization,
    /// Device rejected a configuration (terminal mode, range, rate)
    Configuration,
    /// Transport failure between host and device
    Communication,
    /// Device reported a hardware fault
    Hardware,
    /// Operation exceeded its deadline
    Timeout,
    /// Access to the device was denied
    Permission,
    /// Argument outside what the device accepts
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl DriverErrorKind {
    /// Whether a failure of this kind means "this configuration is not
    /// supported" rather than "the device is broken".
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            DriverErrorKind::Configuration | DriverErrorKind::InvalidParameter
        )
    }
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Permission => "permission",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured error returned by collaborator implementations.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver identifier (e.g. "mock_daq", "adb")
    pub driver_type: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Human-readable detail
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

/// Convenience alias for results using the crate error type.
pub type PowerResult<T> = std::result::Result<T, PowerError>;

/// Primary error type for power characterization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PowerError {
    /// Calibration or settings data is missing or invalid.
    ///
    /// **Error Type**: Permanent - requires fixing the configuration.
    ///
    /// **Recovery Strategy**: Abort before acquisition starts and report the
    /// offending value. Never substitute a default shunt resistance.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No terminal configuration was accepted by the DAQ for a channel.
    ///
    /// `attempts` lists every mode tried together with the device's reason
    /// for rejecting it, in the order they were tried.
    #[error("Channel '{channel}' accepted no terminal configuration (tried: {})", format_attempts(.attempts))]
    ChannelConfiguration {
        /// Channel identifier
        channel: String,
        /// (mode, rejection reason) pairs
        attempts: Vec<(String, String)>,
    },

    /// A chunk read failed on every attempt allowed by the retry bound.
    ///
    /// **Error Type**: Transient at the device level, fatal for the
    /// acquisition step that raised it.
    #[error("Acquisition chunk {chunk} failed after {attempts} attempts: {last_error}")]
    AcquisitionTimeout {
        /// Zero-based chunk index within the capture
        chunk: usize,
        /// Number of read attempts made
        attempts: u32,
        /// Error reported by the final attempt
        last_error: String,
    },

    /// Statistics cannot be computed from the available samples.
    #[error("Insufficient samples: {available} available, at least {required} required")]
    InsufficientSamples {
        /// Samples supplied
        available: usize,
        /// Samples needed for the requested trim
        required: usize,
    },

    /// A scenario run is already in progress.
    ///
    /// **Recovery Strategy**: Wait for the current run to reach `Completed`
    /// or `Failed`, or call `stop()` first.
    #[error("A scenario is already running (engine is {status})")]
    AlreadyRunning {
        /// Engine status at the time of the rejected call
        status: String,
    },

    /// Another acquisition session currently owns the DAQ.
    #[error("An acquisition session is already open")]
    SessionBusy,

    /// Operation called in a state that does not allow it.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Rejected operation
        operation: &'static str,
        /// Current state name
        state: String,
    },

    /// Scenario name is not registered.
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Step action id has no executor.
    #[error("Unknown step action '{action}' in step '{step}'")]
    UnknownAction {
        /// Step name
        step: String,
        /// Action id
        action: String,
    },

    /// Async runtime unavailable or worker task failure.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Structured collaborator error.
    #[error("{0}")]
    Driver(#[from] DriverError),
}

impl PowerError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PowerError::Configuration(message.into())
    }

    /// Channel this error is attributable to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            PowerError::ChannelConfiguration { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

fn format_attempts(attempts: &[(String, String)]) -> String {
    attempts
        .iter()
        .map(|(mode, reason)| format!("{mode}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}
