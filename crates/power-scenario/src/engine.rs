//! Scenario engine.
//!
//! The engine runs one scenario at a time on a background tokio task:
//!
//! ```text
//! ┌──────┐ start() ┌─────────┐ stop() ┌──────────┐
//! │ Idle │────────▶│ Running │───────▶│ Stopping │
//! └──────┘         └────┬────┘        └────┬─────┘
//!                       │                  │
//!                       ▼                  ▼
//!              ┌─────────────────┐   ┌──────────┐
//!              │ Completed/Failed│◀──│ (unwind) │
//!              └─────────────────┘   └──────────┘
//! ```
//!
//! All run state lives on the worker task. Callers observe it through
//! [`ScenarioEngine::snapshot`], the broadcast [`RunEvent`] stream and the
//! final [`RunReport`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = ScenarioEngine::new(hardware, config, Arc::new(StepLibrary::standard()));
//! let mut events = engine.subscribe();
//! engine.start(registry.get("screen_on_off")?)?;
//! while let Ok(event) = events.recv().await {
//!     if let RunEvent::Finished(report) = event {
//!         println!("{} rows", report.rows.len());
//!         break;
//!     }
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use power_acquisition::AcquisitionGate;
use power_core::cancel::CancellationFlag;
use power_core::error::{PowerError, PowerResult};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::{Hardware, RunConfig, StepContext};
use crate::events::{LogLevel, RunEvent};
use crate::report::{RunFailure, RunReport};
use crate::scenario::ScenarioDefinition;
use crate::steps::StepLibrary;

const EVENT_CAPACITY: usize = 1024;

/// Engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Never started
    Idle,
    /// Executing steps
    Running,
    /// Stop requested, unwinding at the next interruption point
    Stopping,
    /// Every step succeeded
    Completed,
    /// A step failed or the run was stopped
    Failed,
}

impl EngineStatus {
    /// Whether a run is in progress.
    pub fn is_active(self) -> bool {
        matches!(self, EngineStatus::Running | EngineStatus::Stopping)
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Idle => write!(f, "idle"),
            EngineStatus::Running => write!(f, "running"),
            EngineStatus::Stopping => write!(f, "stopping"),
            EngineStatus::Completed => write!(f, "completed"),
            EngineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Thread-safe copy of the run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Scenario being (or last) run
    pub scenario: Option<String>,
    /// Engine status
    pub status: EngineStatus,
    /// Step currently executing
    pub current_step_index: Option<usize>,
    /// Its name
    pub current_step_name: Option<String>,
    /// Number of steps in the scenario
    pub total_steps: usize,
    /// Run start
    pub started_at: Option<DateTime<Utc>>,
    /// Run end
    pub ended_at: Option<DateTime<Utc>>,
    /// Last step that succeeded
    pub last_completed_step: Option<usize>,
}

impl Default for RunSnapshot {
    fn default() -> Self {
        Self {
            scenario: None,
            status: EngineStatus::Idle,
            current_step_index: None,
            current_step_name: None,
            total_steps: 0,
            started_at: None,
            ended_at: None,
            last_completed_step: None,
        }
    }
}

struct EngineShared {
    hardware: Hardware,
    config: Arc<RunConfig>,
    library: Arc<StepLibrary>,
    gate: AcquisitionGate,
    snapshot: RwLock<RunSnapshot>,
    cancel: CancellationFlag,
    events: broadcast::Sender<RunEvent>,
    report: RwLock<Option<Arc<RunReport>>>,
}

impl EngineShared {
    fn update(&self, f: impl FnOnce(&mut RunSnapshot)) {
        f(&mut *self.snapshot.write());
    }
}

/// Runs scenarios against a set of collaborators.
pub struct ScenarioEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScenarioEngine {
    /// Create an idle engine.
    pub fn new(hardware: Hardware, config: RunConfig, library: Arc<StepLibrary>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(EngineShared {
                hardware,
                config: Arc::new(config),
                library,
                gate: AcquisitionGate::new(),
                snapshot: RwLock::new(RunSnapshot::default()),
                cancel: CancellationFlag::new(),
                events,
                report: RwLock::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start `scenario` on a background task.
    ///
    /// Fails with [`PowerError::AlreadyRunning`] while a run is in progress;
    /// the running scenario is not affected. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, scenario: Arc<ScenarioDefinition>) -> PowerResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PowerError::Runtime(format!("no tokio runtime: {e}")))?;
        scenario.validate(&self.shared.library)?;
        self.shared.config.validate()?;
        self.reap_finished_worker();

        {
            let mut snapshot = self.shared.snapshot.write();
            if snapshot.status.is_active() {
                return Err(PowerError::AlreadyRunning {
                    status: snapshot.status.to_string(),
                });
            }
            *snapshot = RunSnapshot {
                scenario: Some(scenario.name.clone()),
                status: EngineStatus::Running,
                total_steps: scenario.steps.len(),
                started_at: Some(Utc::now()),
                ..RunSnapshot::default()
            };
        }
        self.shared.cancel.reset();
        *self.shared.report.write() = None;

        info!(scenario = %scenario.name, steps = scenario.steps.len(), "scenario started");
        let shared = Arc::clone(&self.shared);
        let handle = runtime.spawn(run(shared, scenario));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Fail a run whose worker task ended without publishing a final status.
    fn reap_finished_worker(&self) {
        let mut worker = self.worker.lock();
        if !worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        worker.take();
        drop(worker);
        self.shared.update(|s| {
            if s.status.is_active() {
                error!(scenario = ?s.scenario, "scenario worker ended abnormally");
                s.status = EngineStatus::Failed;
                s.ended_at = Some(Utc::now());
            }
        });
    }

    /// Request cooperative cancellation. Returns `false` when nothing is running.
    pub fn stop(&self) -> bool {
        let mut snapshot = self.shared.snapshot.write();
        if snapshot.status != EngineStatus::Running {
            return false;
        }
        snapshot.status = EngineStatus::Stopping;
        self.shared.cancel.cancel();
        info!(step = ?snapshot.current_step_index, "stop requested");
        true
    }

    /// Current status.
    pub fn status(&self) -> EngineStatus {
        self.shared.snapshot.read().status
    }

    /// Copy of the run's progress.
    pub fn snapshot(&self) -> RunSnapshot {
        self.shared.snapshot.read().clone()
    }

    /// Subscribe to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.shared.events.subscribe()
    }

    /// Report of the last finished run.
    pub fn report(&self) -> Option<Arc<RunReport>> {
        self.shared.report.read().clone()
    }

    /// Step library in use.
    pub fn library(&self) -> &StepLibrary {
        &self.shared.library
    }

    /// Wait for the current run to end and return its report.
    pub async fn wait(&self) -> Option<Arc<RunReport>> {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "scenario worker ended abnormally");
                self.shared.update(|s| {
                    s.status = EngineStatus::Failed;
                    s.ended_at = Some(Utc::now());
                });
            }
        }
        self.report()
    }
}

impl Drop for ScenarioEngine {
    fn drop(&mut self) {
        if self.status().is_active() {
            self.shared.cancel.cancel();
        }
    }
}

async fn run(shared: Arc<EngineShared>, scenario: Arc<ScenarioDefinition>) {
    let total = scenario.steps.len();
    let mut ctx = StepContext::new(
        shared.hardware.clone(),
        Arc::clone(&shared.config),
        shared.cancel.clone(),
        shared.gate.clone(),
        shared.events.clone(),
        &scenario.name,
        total,
    );
    ctx.emit(RunEvent::Started {
        scenario: scenario.name.clone(),
        total_steps: total,
    });

    let mut failure = None;
    for (index, step) in scenario.steps.iter().enumerate() {
        ctx.begin_step(index, &step.name);
        if shared.cancel.is_cancelled() {
            failure = Some(RunFailure {
                step_index: index,
                step_name: step.name.clone(),
                channel: None,
                message: "stopped before the step started".to_string(),
                last_completed_step: ctx.last_completed_step,
                cancelled: true,
            });
            break;
        }

        shared.update(|s| {
            s.current_step_index = Some(index);
            s.current_step_name = Some(step.name.clone());
        });
        ctx.emit(RunEvent::Progress {
            step_index: index,
            total_steps: total,
            step_name: step.name.clone(),
        });
        ctx.log(
            LogLevel::Info,
            format!("step {}/{total}: {}", index + 1, step.name),
        );

        let success = match shared.library.get(&step.action_id) {
            Some(executor) => executor.execute(step, &mut ctx).await,
            None => ctx.fail(None, format!("no executor for action '{}'", step.action_id)),
        };
        ctx.emit(RunEvent::StepFinished {
            step_index: index,
            step_name: step.name.clone(),
            success,
        });

        if success {
            ctx.last_completed_step = Some(index);
            shared.update(|s| s.last_completed_step = Some(index));
            continue;
        }

        let cancelled = shared.cancel.is_cancelled();
        let note = ctx.failure.take();
        let message = match (&note, cancelled) {
            (Some(note), _) => note.message.clone(),
            (None, true) => "stopped on request".to_string(),
            (None, false) => "step reported failure".to_string(),
        };
        failure = Some(RunFailure {
            step_index: index,
            step_name: step.name.clone(),
            channel: note.and_then(|n| n.channel),
            message,
            last_completed_step: ctx.last_completed_step,
            cancelled,
        });
        break;
    }

    let keep_samples = failure.as_ref().map_or(true, |f| f.cancelled);
    ctx.close_open_acquisition(keep_samples).await;

    let status = match &failure {
        None => EngineStatus::Completed,
        Some(_) => EngineStatus::Failed,
    };
    match &failure {
        None => ctx.log(LogLevel::Info, "scenario completed"),
        Some(f) if f.cancelled => ctx.log(LogLevel::Warn, format!("scenario stopped: {f}")),
        Some(f) => ctx.log(LogLevel::Error, format!("scenario failed: {f}")),
    }

    let ended_at = Utc::now();
    let mut report = ctx.report(status);
    report.ended_at = Some(ended_at);
    report.failure = failure;
    let report = Arc::new(report);

    *shared.report.write() = Some(Arc::clone(&report));
    shared.update(|s| {
        s.status = status;
        s.ended_at = Some(ended_at);
        s.current_step_index = None;
        s.current_step_name = None;
    });
    if status == EngineStatus::Failed && report.rows.is_empty() {
        warn!(scenario = %report.scenario, "run ended without result rows");
    }
    info!(
        scenario = %report.scenario,
        %status,
        rows = report.rows.len(),
        "scenario finished"
    );
    ctx.emit(RunEvent::Finished(report));
}
