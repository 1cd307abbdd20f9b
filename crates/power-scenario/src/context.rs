//! Step execution context.
//!
//! A [`StepContext`] lives on the engine's worker task for the length of one
//! run. Step executors receive it mutably; it is the only place run state
//! (result rows, the active acquisition session, the run log) is mutated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use power_acquisition::{
    AcquisitionGate, AcquisitionOutcome, AcquisitionRequest, AcquisitionSession, AcquisitionSettings,
};
use power_core::cancel::CancellationFlag;
use power_core::capabilities::{DaqBackend, DeviceControl, PowerSupply};
use power_core::channel::ChannelConfig;
use power_core::data::{ChannelSummary, ResultRow};
use power_core::error::{PowerError, PowerResult};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::engine::EngineStatus;
use crate::events::{LogEntry, LogLevel, RunEvent};
use crate::report::RunReport;

/// The external collaborators a run drives.
#[derive(Clone)]
pub struct Hardware {
    /// Programmable supply
    pub supply: Arc<dyn PowerSupply>,
    /// Handset command bridge
    pub device: Arc<dyn DeviceControl>,
    /// DAQ device factory
    pub daq: Arc<dyn DaqBackend>,
}

impl std::fmt::Debug for Hardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hardware").finish_non_exhaustive()
    }
}

/// Engine configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Granularity of interruptible waits
    #[serde(with = "humantime_serde")]
    pub wait_chunk: Duration,
    /// Deadline for one device-control command
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Extra attempts for a failed device-control command
    pub command_retries: u32,
    /// Pause between command attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            wait_chunk: Duration::from_millis(100),
            command_timeout: Duration::from_secs(5),
            command_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl EngineSettings {
    /// Validate the section.
    pub fn validate(&self) -> PowerResult<()> {
        if self.wait_chunk.is_zero() {
            return Err(PowerError::config("engine.wait_chunk must be > 0"));
        }
        if self.command_timeout.is_zero() {
            return Err(PowerError::config("engine.command_timeout must be > 0"));
        }
        Ok(())
    }
}

/// Everything a run needs besides the collaborators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    /// Engine tuning
    pub engine: EngineSettings,
    /// Acquisition defaults
    pub acquisition: AcquisitionSettings,
    /// Calibrated channels
    pub channels: Vec<ChannelConfig>,
}

impl RunConfig {
    /// Validate all sections, including every enabled channel's calibration.
    pub fn validate(&self) -> PowerResult<()> {
        self.engine.validate()?;
        self.acquisition.validate()?;
        for channel in self.channels.iter().filter(|c| c.enabled) {
            channel.validate()?;
        }
        Ok(())
    }

    /// Enabled channels whose id or label is in `ids`, in `ids` order.
    pub fn select_channels(&self, ids: &[String]) -> PowerResult<Vec<ChannelConfig>> {
        ids.iter()
            .map(|id| {
                self.channels
                    .iter()
                    .find(|c| &c.id == id || &c.label == id)
                    .cloned()
                    .ok_or_else(|| PowerError::config(format!("channel '{id}' is not configured")))
            })
            .collect()
    }
}

/// Result of an interruptible wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Full duration elapsed
    Completed,
    /// Cancellation observed at a chunk boundary
    Cancelled,
    /// The acquisition pumped during the wait failed
    Failed,
}

/// Failure detail noted by an executor before returning `false`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FailureNote {
    pub channel: Option<String>,
    pub message: String,
}

/// Mutable run state handed to step executors.
pub struct StepContext {
    hardware: Hardware,
    config: Arc<RunConfig>,
    cancel: CancellationFlag,
    gate: AcquisitionGate,
    events: broadcast::Sender<RunEvent>,
    scenario: String,
    total_steps: usize,
    started_at: DateTime<Utc>,
    step_index: usize,
    step_name: String,
    pub(crate) last_completed_step: Option<usize>,
    pub(crate) rows: Vec<ResultRow>,
    pub(crate) summaries: Vec<ChannelSummary>,
    pub(crate) log: Vec<LogEntry>,
    pub(crate) failure: Option<FailureNote>,
    pub(crate) session: Option<AcquisitionSession>,
}

impl StepContext {
    pub(crate) fn new(
        hardware: Hardware,
        config: Arc<RunConfig>,
        cancel: CancellationFlag,
        gate: AcquisitionGate,
        events: broadcast::Sender<RunEvent>,
        scenario: &str,
        total_steps: usize,
    ) -> Self {
        Self {
            hardware,
            config,
            cancel,
            gate,
            events,
            scenario: scenario.to_string(),
            total_steps,
            started_at: Utc::now(),
            step_index: 0,
            step_name: String::new(),
            last_completed_step: None,
            rows: Vec::new(),
            summaries: Vec::new(),
            log: Vec::new(),
            failure: None,
            session: None,
        }
    }

    pub(crate) fn begin_step(&mut self, index: usize, name: &str) {
        self.step_index = index;
        self.step_name = name.to_string();
        self.failure = None;
    }

    /// Collaborators.
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Index of the running step.
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Whether `stop()` was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Result rows collected so far.
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Whether an acquisition session is open.
    pub fn acquisition_active(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Record a log entry, broadcast it and mirror it to `tracing`.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let step = self.step_index;
        match level {
            LogLevel::Debug => tracing::debug!(step, scenario = %self.scenario, "{message}"),
            LogLevel::Info => tracing::info!(step, scenario = %self.scenario, "{message}"),
            LogLevel::Warn => tracing::warn!(step, scenario = %self.scenario, "{message}"),
            LogLevel::Error => tracing::error!(step, scenario = %self.scenario, "{message}"),
        }
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            step_index: Some(step),
            message,
        };
        self.log.push(entry.clone());
        self.emit(RunEvent::Log(entry));
    }

    /// Note why the current step failed and return `false` for the executor.
    pub fn fail(&mut self, channel: Option<&str>, message: impl Into<String>) -> bool {
        let message = message.into();
        self.log(LogLevel::Error, format!("{}: {message}", self.step_name));
        self.failure = Some(FailureNote {
            channel: channel.map(str::to_string),
            message,
        });
        false
    }

    /// Note a failure from an error, attributing it to its channel if it has one.
    pub fn fail_with(&mut self, err: &PowerError) -> bool {
        let channel = err.channel().map(str::to_string);
        self.fail(channel.as_deref(), err.to_string())
    }

    /// Sleep for `duration` in chunks, observing cancellation between chunks.
    ///
    /// While an acquisition is open, the samples due so far are read after
    /// every chunk so the capture keeps pace with the hardware.
    pub async fn wait(&mut self, duration: Duration) -> WaitOutcome {
        let chunk = self.config.engine.wait_chunk;
        let Some(deadline) = Instant::now().checked_add(duration) else {
            self.fail(None, format!("wait of {duration:?} is out of range"));
            return WaitOutcome::Failed;
        };

        loop {
            if self.cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Completed;
            }
            tokio::time::sleep(chunk.min(deadline - now)).await;
            if self.session.is_some() && !self.pump_acquisition().await {
                return WaitOutcome::Failed;
            }
        }
    }

    /// Send a device-control command, retrying up to the configured bound.
    ///
    /// Returns the reply, or `None` after the failure has been noted.
    pub async fn command(&mut self, command: &str) -> Option<String> {
        let engine = self.config.engine.clone();
        let attempts = engine.command_retries.saturating_add(1);
        let device = Arc::clone(&self.hardware.device);

        for attempt in 1..=attempts {
            match device.send(command, engine.command_timeout).await {
                Ok(reply) => {
                    tracing::debug!(command, attempt, "device command ok");
                    return Some(reply);
                }
                Err(err) if attempt < attempts => {
                    self.log(
                        LogLevel::Warn,
                        format!("'{command}' failed (attempt {attempt}/{attempts}): {err}; retrying"),
                    );
                    tokio::time::sleep(engine.retry_delay).await;
                }
                Err(err) => {
                    self.fail(None, format!("'{command}' failed after {attempts} attempts: {err}"));
                }
            }
        }
        None
    }

    /// Run several commands in order; stops at the first failure.
    pub async fn commands(&mut self, commands: &[&str]) -> bool {
        for command in commands {
            if self.command(command).await.is_none() {
                return false;
            }
        }
        true
    }

    /// Build an acquisition request from the configured defaults.
    pub fn acquisition_request(
        &self,
        channels: Vec<ChannelConfig>,
        duration: Option<Duration>,
    ) -> power_acquisition::AcquisitionRequestBuilder {
        let builder = AcquisitionRequest::builder(&self.config.acquisition).channels(channels);
        match duration {
            Some(d) => builder.duration(d),
            None => builder,
        }
    }

    /// Open, configure and start a session, and keep it in the context.
    pub async fn begin_acquisition(&mut self, request: AcquisitionRequest) -> PowerResult<()> {
        if self.session.is_some() {
            return Err(PowerError::SessionBusy);
        }
        let mut session = AcquisitionSession::new(request, self.gate.clone())?;
        session.open(self.hardware.daq.as_ref()).await?;
        session.start().await?;
        self.session = Some(session);
        Ok(())
    }

    /// Stream the open session to its target (or to what is due), then finish it.
    pub async fn end_acquisition(&mut self) -> PowerResult<AcquisitionOutcome> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| PowerError::InvalidState {
                operation: "stop acquisition",
                state: "no acquisition running".to_string(),
            })?;
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let step_index = self.step_index;
        let streamed = session
            .stream(&cancel, |p| {
                let _ = events.send(RunEvent::AcquisitionProgress {
                    step_index,
                    samples_per_channel: p.samples_per_channel,
                    target: p.target,
                });
            })
            .await;
        if let Err(err) = streamed {
            session.abort().await;
            return Err(err);
        }
        session.finish().await
    }

    async fn pump_acquisition(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return true;
        };
        let due = session.samples_due();
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        let step_index = self.step_index;
        let pumped = session
            .stream_to(due, &cancel, |p| {
                let _ = events.send(RunEvent::AcquisitionProgress {
                    step_index,
                    samples_per_channel: p.samples_per_channel,
                    target: p.target,
                });
            })
            .await;
        match pumped {
            Ok(()) => true,
            Err(err) => {
                if let Some(mut session) = self.session.take() {
                    session.abort().await;
                }
                self.fail_with(&err)
            }
        }
    }

    /// Append an acquisition's rows and channel summaries to the run.
    pub fn record(&mut self, outcome: &AcquisitionOutcome) {
        let rows = outcome.rows(self.step_index);
        let count = rows.len();
        self.rows.extend(rows);
        self.summaries.extend(
            outcome
                .series
                .iter()
                .map(|s| ChannelSummary::from_series(s, self.step_index)),
        );
        for series in outcome.series.iter().filter(|s| !s.is_plausible_shunt_drop) {
            let message = format!(
                "channel '{}' read in {} mode does not look like a shunt drop; values kept and flagged",
                series.channel, series.terminal_mode
            );
            self.log(LogLevel::Warn, message);
        }
        self.log(
            LogLevel::Info,
            format!(
                "acquisition recorded {count} rows from {} samples per channel{}",
                outcome.samples_per_channel,
                if outcome.cancelled { " (cancelled)" } else { "" }
            ),
        );
    }

    /// Close a session left open when the run ended.
    ///
    /// With `keep` the samples read so far are recorded; otherwise the
    /// session is aborted.
    pub(crate) async fn close_open_acquisition(&mut self, keep: bool) {
        if self.session.is_none() {
            return;
        }
        if keep {
            let ended = self.end_acquisition().await;
            match ended {
                Ok(outcome) => self.record(&outcome),
                Err(err) => self.log(LogLevel::Warn, format!("partial acquisition lost: {err}")),
            }
            return;
        }
        if let Some(mut session) = self.session.take() {
            session.abort().await;
            self.log(LogLevel::Warn, "open acquisition closed during cleanup");
        }
    }

    /// Report of the run as it stands.
    pub(crate) fn report(&self, status: EngineStatus) -> RunReport {
        RunReport {
            scenario: self.scenario.clone(),
            status,
            started_at: self.started_at,
            ended_at: None,
            total_steps: self.total_steps,
            last_completed_step: self.last_completed_step,
            rows: self.rows.clone(),
            summaries: self.summaries.clone(),
            failure: None,
            log: self.log.clone(),
        }
    }
}
