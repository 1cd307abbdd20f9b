//! Scenario engine for handset power characterization.
//!
//! A scenario is a named list of [`Step`]s. Each step names an action that a
//! [`StepExecutor`] from the [`StepLibrary`] carries out: programming the
//! supply, sending handset commands, waiting, or capturing shunt currents
//! through a [`power_acquisition::AcquisitionSession`].
//!
//! The [`ScenarioEngine`] runs one scenario at a time on a background task,
//! broadcasts [`RunEvent`]s, honours `stop()` at every wait chunk and
//! acquisition chunk, and always closes an open acquisition before reporting.

pub mod builtins;
pub mod context;
pub mod engine;
pub mod events;
pub mod report;
pub mod scenario;
pub mod steps;

pub use context::{EngineSettings, Hardware, RunConfig, StepContext, WaitOutcome};
pub use engine::{EngineStatus, RunSnapshot, ScenarioEngine};
pub use events::{LogEntry, LogLevel, RunEvent};
pub use report::{RunFailure, RunReport};
pub use scenario::{ScenarioDefinition, ScenarioRegistry, Step, StepParameters};
pub use steps::{StepExecutor, StepLibrary};
