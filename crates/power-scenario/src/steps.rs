//! Step executors.
//!
//! Every scenario step names an action id. The [`StepLibrary`] maps action
//! ids to [`StepExecutor`]s; scenarios are validated against it when they are
//! registered, so an unknown action never reaches the engine.
//!
//! Executors report success as a plain `bool`. Before returning `false` an
//! executor notes the reason with [`StepContext::fail`], which the engine
//! turns into the run's failure record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use power_core::channel::ChannelConfig;
use power_core::error::{PowerError, PowerResult};

use crate::context::{StepContext, WaitOutcome};
use crate::engine::EngineStatus;
use crate::events::{LogLevel, RunEvent};
use crate::scenario::Step;

/// Handset shell commands used by the built-in actions.
pub mod commands {
    /// Wake the display
    pub const SCREEN_ON: &str = "input keyevent KEYCODE_WAKEUP";
    /// Toggle the display off
    pub const SCREEN_OFF: &str = "input keyevent KEYCODE_POWER";
    /// Go to the launcher
    pub const HOME: &str = "input keyevent KEYCODE_HOME";
    /// Swipe up past the keyguard
    pub const UNLOCK_SWIPE: &str = "input swipe 500 1500 500 500";
    /// Open the recent-apps overview
    pub const RECENT_APPS: &str = "input keyevent KEYCODE_APP_SWITCH";
    /// Dismiss the topmost recent app
    pub const DISMISS_SWIPE: &str = "input swipe 500 1000 500 100";
    /// Turn airplane mode on
    pub const AIRPLANE_ON: &str = "settings put global airplane_mode_on 1";
    /// Tell the framework airplane mode changed
    pub const AIRPLANE_BROADCAST: &str =
        "am broadcast -a android.intent.action.AIRPLANE_MODE --ez state true";
    /// Enable the Bluetooth radio
    pub const BLUETOOTH_ON: &str = "svc bluetooth enable";
    /// Fixed backlight
    pub const MANUAL_BRIGHTNESS: &str = "settings put system screen_brightness_mode 0";
    /// Mid-scale backlight level
    pub const BRIGHTNESS: &str = "settings put system screen_brightness 128";
    /// Keep the screen on for the length of a run
    pub const SCREEN_TIMEOUT: &str = "settings put system screen_off_timeout 600000";
    /// Battery status dump
    pub const BATTERY: &str = "dumpsys battery";
}

/// Executes one kind of step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Action id this executor handles.
    fn action_id(&self) -> &'static str;

    /// Check the step's parameters. Called when a scenario is registered.
    fn validate(&self, _step: &Step) -> PowerResult<()> {
        Ok(())
    }

    /// Run the step. Returns `false` on failure, after noting the reason on
    /// the context.
    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool;
}

/// Executors by action id.
#[derive(Default, Clone)]
pub struct StepLibrary {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for StepLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepLibrary")
            .field("actions", &self.action_ids())
            .finish()
    }
}

impl StepLibrary {
    /// Empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with every built-in action.
    pub fn standard() -> Self {
        let mut library = Self::new();
        library.register(SetVoltage);
        library.register(ReadSupply);
        library.register(Wait);
        library.register(Shell);
        library.register(DeviceCommands::new(
            "enable_airplane_mode",
            &[commands::AIRPLANE_ON, commands::AIRPLANE_BROADCAST],
        ));
        library.register(DeviceCommands::new("enable_bluetooth", &[commands::BLUETOOTH_ON]));
        library.register(DeviceCommands::new("screen_on", &[commands::SCREEN_ON]));
        library.register(DeviceCommands::new("screen_off", &[commands::SCREEN_OFF]));
        library.register(DeviceCommands::new("press_home", &[commands::HOME]));
        library.register(DeviceCommands::new(
            "unlock_screen",
            &[commands::SCREEN_ON, commands::UNLOCK_SWIPE],
        ));
        library.register(DeviceCommands::new(
            "clear_recent_apps",
            &[commands::RECENT_APPS, commands::DISMISS_SWIPE, commands::HOME],
        ));
        library.register(DeviceCommands::new(
            "apply_default_settings",
            &[
                commands::MANUAL_BRIGHTNESS,
                commands::BRIGHTNESS,
                commands::SCREEN_TIMEOUT,
            ],
        ));
        library.register(LaunchApp);
        library.register(QueryBattery);
        library.register(ScreenCycle);
        library.register(StartAcquisition);
        library.register(StopAcquisition);
        library.register(Acquire);
        library.register(Export);
        library
    }

    /// Add (or replace) an executor.
    pub fn register<E: StepExecutor + 'static>(&mut self, executor: E) {
        self.executors
            .insert(executor.action_id().to_string(), Arc::new(executor));
    }

    /// Executor for `action_id`.
    pub fn get(&self, action_id: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(action_id).cloned()
    }

    /// Registered action ids, sorted.
    pub fn action_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Duration from `key`, falling back to the step's nominal duration.
fn step_duration(step: &Step, key: &str) -> PowerResult<Duration> {
    Ok(step
        .parameters
        .duration(key)?
        .unwrap_or(step.nominal_duration))
}

/// Wait and translate the outcome into a step result.
async fn wait_step(ctx: &mut StepContext, duration: Duration) -> bool {
    match ctx.wait(duration).await {
        WaitOutcome::Completed => true,
        WaitOutcome::Cancelled => {
            ctx.log(LogLevel::Info, "wait interrupted by stop request");
            false
        }
        WaitOutcome::Failed => false,
    }
}

// =============================================================================
// Supply
// =============================================================================

struct SetVoltage;

#[async_trait]
impl StepExecutor for SetVoltage {
    fn action_id(&self) -> &'static str {
        "set_voltage"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        match step.parameters.f64("voltage") {
            Some(v) if v.is_finite() && v >= 0.0 => Ok(()),
            Some(v) => Err(PowerError::config(format!("voltage {v} is not a valid set point"))),
            None => Err(PowerError::config("set_voltage needs a 'voltage' parameter")),
        }
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        let Some(volts) = step.parameters.f64("voltage") else {
            return ctx.fail(None, "missing 'voltage' parameter");
        };
        let supply = Arc::clone(&ctx.hardware().supply);
        match supply.set_voltage(volts).await {
            Ok(true) => {
                ctx.log(LogLevel::Info, format!("supply set to {volts:.3} V"));
                true
            }
            Ok(false) => ctx.fail(None, format!("supply refused {volts:.3} V")),
            Err(err) => ctx.fail(None, err.to_string()),
        }
    }
}

struct ReadSupply;

#[async_trait]
impl StepExecutor for ReadSupply {
    fn action_id(&self) -> &'static str {
        "read_supply"
    }

    async fn execute(&self, _step: &Step, ctx: &mut StepContext) -> bool {
        let supply = Arc::clone(&ctx.hardware().supply);
        match supply.read_voltage_current().await {
            Ok((volts, amps)) => {
                ctx.log(
                    LogLevel::Info,
                    format!("supply output {volts:.3} V, {:.1} mA", amps * 1000.0),
                );
                true
            }
            Err(err) => ctx.fail(None, err.to_string()),
        }
    }
}

// =============================================================================
// Timing
// =============================================================================

struct Wait;

#[async_trait]
impl StepExecutor for Wait {
    fn action_id(&self) -> &'static str {
        "wait"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        step_duration(step, "duration").map(|_| ())
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        match step_duration(step, "duration") {
            Ok(duration) => wait_step(ctx, duration).await,
            Err(err) => ctx.fail_with(&err),
        }
    }
}

// =============================================================================
// Device control
// =============================================================================

struct Shell;

#[async_trait]
impl StepExecutor for Shell {
    fn action_id(&self) -> &'static str {
        "shell"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        match step.parameters.str("command") {
            Some(cmd) if !cmd.trim().is_empty() => Ok(()),
            _ => Err(PowerError::config("shell needs a non-empty 'command' parameter")),
        }
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        let Some(command) = step.parameters.str("command") else {
            return ctx.fail(None, "missing 'command' parameter");
        };
        let Some(reply) = ctx.command(command).await else {
            return false;
        };
        match step.parameters.str("expect") {
            Some(expected) if !reply.contains(expected) => ctx.fail(
                None,
                format!("reply to '{command}' does not contain '{expected}'"),
            ),
            _ => true,
        }
    }
}

/// Fixed list of device commands sent in order.
struct DeviceCommands {
    id: &'static str,
    commands: &'static [&'static str],
}

impl DeviceCommands {
    fn new(id: &'static str, commands: &'static [&'static str]) -> Self {
        Self { id, commands }
    }
}

#[async_trait]
impl StepExecutor for DeviceCommands {
    fn action_id(&self) -> &'static str {
        self.id
    }

    async fn execute(&self, _step: &Step, ctx: &mut StepContext) -> bool {
        ctx.commands(self.commands).await
    }
}

struct LaunchApp;

impl LaunchApp {
    fn command(step: &Step) -> Option<String> {
        if let Some(intent) = step.parameters.str("intent") {
            return Some(format!("am start -a {intent}"));
        }
        step.parameters.str("package").map(|package| {
            format!("monkey -p {package} -c android.intent.category.LAUNCHER 1")
        })
    }
}

#[async_trait]
impl StepExecutor for LaunchApp {
    fn action_id(&self) -> &'static str {
        "launch_app"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        Self::command(step)
            .map(|_| ())
            .ok_or_else(|| PowerError::config("launch_app needs an 'intent' or 'package' parameter"))
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        let Some(command) = Self::command(step) else {
            return ctx.fail(None, "nothing to launch");
        };
        ctx.command(&command).await.is_some()
    }
}

/// Battery level from `dumpsys battery` output.
pub fn parse_battery_level(reply: &str) -> Option<u8> {
    reply.lines().find_map(|line| {
        line.trim()
            .strip_prefix("level:")
            .and_then(|rest| rest.trim().parse().ok())
    })
}

struct QueryBattery;

#[async_trait]
impl StepExecutor for QueryBattery {
    fn action_id(&self) -> &'static str {
        "query_battery"
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        let Some(reply) = ctx.command(commands::BATTERY).await else {
            return false;
        };
        let Some(level) = parse_battery_level(&reply) else {
            return ctx.fail(None, "battery level missing from dumpsys output");
        };
        ctx.log(LogLevel::Info, format!("battery level {level}%"));
        match step.parameters.u64("min_level") {
            Some(min) if u64::from(level) < min => {
                ctx.fail(None, format!("battery at {level}%, need at least {min}%"))
            }
            _ => true,
        }
    }
}

struct ScreenCycle;

impl ScreenCycle {
    const DEFAULT_CYCLES: u64 = 10;

    fn plan(step: &Step) -> PowerResult<(u64, Duration)> {
        let cycles = step.parameters.u64("cycles").unwrap_or(Self::DEFAULT_CYCLES);
        if cycles == 0 {
            return Err(PowerError::config("screen_cycle needs at least one cycle"));
        }
        let interval = step
            .parameters
            .duration("interval")?
            .unwrap_or(Duration::from_secs(1));
        Ok((cycles, interval))
    }
}

#[async_trait]
impl StepExecutor for ScreenCycle {
    fn action_id(&self) -> &'static str {
        "screen_cycle"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        Self::plan(step).map(|_| ())
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        let (cycles, interval) = match Self::plan(step) {
            Ok(plan) => plan,
            Err(err) => return ctx.fail_with(&err),
        };
        for cycle in 1..=cycles {
            ctx.log(LogLevel::Debug, format!("screen cycle {cycle}/{cycles}"));
            if ctx.command(commands::SCREEN_OFF).await.is_none() || !wait_step(ctx, interval).await
            {
                return false;
            }
            if ctx.command(commands::SCREEN_ON).await.is_none() || !wait_step(ctx, interval).await {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Acquisition
// =============================================================================

/// Channel selection plus per-step overrides of the acquisition defaults.
struct CaptureParams {
    channels: Option<Vec<String>>,
    duration: Option<Duration>,
    sample_rate: Option<f64>,
    compression_ratio: Option<usize>,
    chunk_size: Option<usize>,
}

impl CaptureParams {
    fn parse(step: &Step) -> PowerResult<Self> {
        let to_usize = |key: &str| -> PowerResult<Option<usize>> {
            step.parameters
                .u64(key)
                .map(|v| {
                    usize::try_from(v)
                        .map_err(|_| PowerError::config(format!("parameter '{key}' is too large")))
                })
                .transpose()
        };
        Ok(Self {
            channels: step.parameters.strings("channels"),
            duration: step.parameters.duration("duration")?,
            sample_rate: step.parameters.f64("sample_rate"),
            compression_ratio: to_usize("compression_ratio")?,
            chunk_size: to_usize("chunk_size")?,
        })
    }

    fn channels(&self, ctx: &StepContext) -> PowerResult<Vec<ChannelConfig>> {
        match &self.channels {
            Some(ids) => ctx.config().select_channels(ids),
            None => Ok(ctx.config().channels.clone()),
        }
    }

    async fn begin(&self, ctx: &mut StepContext, duration: Option<Duration>) -> bool {
        let request = self.channels(ctx).and_then(|channels| {
            let mut builder = ctx.acquisition_request(channels, duration);
            if let Some(rate) = self.sample_rate {
                builder = builder.sample_rate(rate);
            }
            if let Some(ratio) = self.compression_ratio {
                builder = builder.compression_ratio(ratio);
            }
            if let Some(chunk) = self.chunk_size {
                builder = builder.chunk_size(chunk);
            }
            builder.build()
        });
        let begun = match request {
            Ok(request) => ctx.begin_acquisition(request).await,
            Err(err) => Err(err),
        };
        match begun {
            Ok(()) => {
                ctx.log(LogLevel::Info, "acquisition started");
                true
            }
            Err(err) => ctx.fail_with(&err),
        }
    }
}

async fn end_and_record(ctx: &mut StepContext) -> bool {
    let ended = ctx.end_acquisition().await;
    match ended {
        Ok(outcome) => {
            ctx.record(&outcome);
            !outcome.cancelled
        }
        Err(err) => ctx.fail_with(&err),
    }
}

struct StartAcquisition;

#[async_trait]
impl StepExecutor for StartAcquisition {
    fn action_id(&self) -> &'static str {
        "start_acquisition"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        CaptureParams::parse(step).map(|_| ())
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        match CaptureParams::parse(step) {
            Ok(params) => {
                let duration = params.duration;
                params.begin(ctx, duration).await
            }
            Err(err) => ctx.fail_with(&err),
        }
    }
}

struct StopAcquisition;

#[async_trait]
impl StepExecutor for StopAcquisition {
    fn action_id(&self) -> &'static str {
        "stop_acquisition"
    }

    async fn execute(&self, _step: &Step, ctx: &mut StepContext) -> bool {
        end_and_record(ctx).await
    }
}

/// Fixed-duration capture in a single step.
struct Acquire;

impl Acquire {
    fn duration(step: &Step, params: &CaptureParams) -> PowerResult<Duration> {
        match params.duration.unwrap_or(step.nominal_duration) {
            d if d.is_zero() => Err(PowerError::config(
                "acquire needs a 'duration' parameter or a nominal duration",
            )),
            d => Ok(d),
        }
    }
}

#[async_trait]
impl StepExecutor for Acquire {
    fn action_id(&self) -> &'static str {
        "acquire"
    }

    fn validate(&self, step: &Step) -> PowerResult<()> {
        let params = CaptureParams::parse(step)?;
        Self::duration(step, &params).map(|_| ())
    }

    async fn execute(&self, step: &Step, ctx: &mut StepContext) -> bool {
        let planned = CaptureParams::parse(step)
            .and_then(|params| Self::duration(step, &params).map(|d| (params, d)));
        let (params, duration) = match planned {
            Ok(planned) => planned,
            Err(err) => return ctx.fail_with(&err),
        };
        if !params.begin(ctx, Some(duration)).await {
            return false;
        }
        end_and_record(ctx).await
    }
}

// =============================================================================
// Export
// =============================================================================

/// Publishes the rows collected so far to subscribers.
struct Export;

#[async_trait]
impl StepExecutor for Export {
    fn action_id(&self) -> &'static str {
        "export"
    }

    async fn execute(&self, _step: &Step, ctx: &mut StepContext) -> bool {
        if ctx.acquisition_active() {
            ctx.log(LogLevel::Warn, "exporting while an acquisition is still open");
        }
        if ctx.rows().is_empty() {
            ctx.log(LogLevel::Warn, "no rows collected yet");
        }
        let report = Arc::new(ctx.report(EngineStatus::Running));
        ctx.log(
            LogLevel::Info,
            format!("{} rows ready for export", report.rows.len()),
        );
        ctx.emit(RunEvent::ExportReady(report));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_library_actions() {
        let library = StepLibrary::standard();
        let ids = library.action_ids();
        for id in [
            "set_voltage",
            "wait",
            "enable_airplane_mode",
            "screen_cycle",
            "start_acquisition",
            "stop_acquisition",
            "acquire",
            "export",
        ] {
            assert!(ids.contains(&id), "missing {id}");
        }
        assert!(library.get("teleport").is_none());
    }

    #[test]
    fn test_parse_battery_level() {
        let reply = "Current Battery Service state:\n  AC powered: false\n  level: 87\n  scale: 100\n";
        assert_eq!(parse_battery_level(reply), Some(87));
        assert_eq!(parse_battery_level("no battery here"), None);
    }

    #[test]
    fn test_set_voltage_requires_voltage() {
        let library = StepLibrary::standard();
        let executor = library.get("set_voltage").unwrap();
        assert!(executor.validate(&Step::new("s", "set_voltage")).is_err());
        assert!(executor
            .validate(&Step::new("s", "set_voltage").with("voltage", 4.0))
            .is_ok());
        assert!(executor
            .validate(&Step::new("s", "set_voltage").with("voltage", -1.0))
            .is_err());
    }

    #[test]
    fn test_acquire_needs_a_duration() {
        let library = StepLibrary::standard();
        let executor = library.get("acquire").unwrap();
        assert!(executor.validate(&Step::new("a", "acquire")).is_err());
        assert!(executor
            .validate(&Step::new("a", "acquire").with("duration", "5s"))
            .is_ok());
        assert!(executor
            .validate(&Step::new("a", "acquire").lasting(Duration::from_secs(300)))
            .is_ok());
    }

    #[test]
    fn test_launch_app_command() {
        let step = Step::new("l", "launch_app").with("package", "com.example.app");
        assert_eq!(
            LaunchApp::command(&step).unwrap(),
            "monkey -p com.example.app -c android.intent.category.LAUNCHER 1"
        );
        let step = Step::new("l", "launch_app").with("intent", "android.intent.action.DIAL");
        assert_eq!(
            LaunchApp::command(&step).unwrap(),
            "am start -a android.intent.action.DIAL"
        );
    }
}
