//! Run events delivered to subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::RunReport;

/// Severity of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal progress
    Info,
    /// Recoverable problem
    Warn,
    /// Failure
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One entry of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When it was logged
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Step running at the time, if any
    pub step_index: Option<usize>,
    /// Text
    pub message: String,
}

/// Event broadcast by the engine while a scenario runs.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run began
    Started {
        /// Scenario name
        scenario: String,
        /// Number of steps
        total_steps: usize,
    },
    /// A step is about to run
    Progress {
        /// Zero-based index
        step_index: usize,
        /// Number of steps
        total_steps: usize,
        /// Step name
        step_name: String,
    },
    /// A log entry was recorded
    Log(LogEntry),
    /// A step returned
    StepFinished {
        /// Zero-based index
        step_index: usize,
        /// Step name
        step_name: String,
        /// Executor result
        success: bool,
    },
    /// An acquisition chunk was read
    AcquisitionProgress {
        /// Step that owns the acquisition
        step_index: usize,
        /// Samples per channel read so far
        samples_per_channel: usize,
        /// Target for fixed-duration captures
        target: Option<usize>,
    },
    /// An export step published the results so far
    ExportReady(Arc<RunReport>),
    /// The run ended; carries the final report
    Finished(Arc<RunReport>),
}
