//! Read-only run results for exporters.

use chrono::{DateTime, Utc};
use power_core::data::{ChannelSummary, ResultRow};
use serde::{Deserialize, Serialize};

use crate::engine::EngineStatus;
use crate::events::LogEntry;

/// Where and why a run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Step that failed, or that was running when cancelled
    pub step_index: usize,
    /// Its name
    pub step_name: String,
    /// Channel the failure is attributable to
    pub channel: Option<String>,
    /// Reason
    pub message: String,
    /// Last step that finished successfully
    pub last_completed_step: Option<usize>,
    /// Stopped on request rather than by an error
    pub cancelled: bool,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} '{}'", self.step_index, self.step_name)?;
        if let Some(channel) = &self.channel {
            write!(f, " channel '{channel}'")?;
        }
        write!(f, ": {}", self.message)?;
        match self.last_completed_step {
            Some(index) => write!(f, " (last completed step {index})"),
            None => write!(f, " (no step completed)"),
        }
    }
}

/// Snapshot of a run's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Scenario name
    pub scenario: String,
    /// Engine status when the report was taken
    pub status: EngineStatus,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end, for finished runs
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of steps in the scenario
    pub total_steps: usize,
    /// Last successfully completed step
    pub last_completed_step: Option<usize>,
    /// Result rows in step order, then sample order
    pub rows: Vec<ResultRow>,
    /// One summary per channel per acquisition
    pub summaries: Vec<ChannelSummary>,
    /// Failure record for failed or cancelled runs
    pub failure: Option<RunFailure>,
    /// Run log
    pub log: Vec<LogEntry>,
}

impl RunReport {
    /// False once a run has failed or been stopped. A snapshot taken while
    /// the run is still healthy counts as complete so far.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
            && matches!(self.status, EngineStatus::Completed | EngineStatus::Running)
    }

    /// Channel ids appearing in the rows, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rows
            .iter()
            .flat_map(|r| r.readings.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Whether any summary carries an implausible-shunt-drop flag.
    pub fn has_implausible_channels(&self) -> bool {
        self.summaries.iter().any(|s| !s.is_plausible_shunt_drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: EngineStatus, failure: Option<RunFailure>) -> RunReport {
        RunReport {
            scenario: "s".into(),
            status,
            started_at: Utc::now(),
            ended_at: None,
            total_steps: 2,
            last_completed_step: Some(0),
            rows: Vec::new(),
            summaries: Vec::new(),
            failure,
            log: Vec::new(),
        }
    }

    #[test]
    fn test_completeness_by_status() {
        assert!(report(EngineStatus::Completed, None).is_complete());
        assert!(report(EngineStatus::Running, None).is_complete());
        assert!(!report(EngineStatus::Stopping, None).is_complete());
        assert!(!report(EngineStatus::Failed, None).is_complete());

        let failure = RunFailure {
            step_index: 1,
            step_name: "wait".into(),
            channel: None,
            message: "stopped".into(),
            last_completed_step: Some(0),
            cancelled: true,
        };
        assert!(!report(EngineStatus::Failed, Some(failure)).is_complete());
    }
}
