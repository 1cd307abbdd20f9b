//! Scenario engine runs against the simulated bench.

use std::sync::Arc;
use std::time::Duration;

use power_acquisition::AcquisitionSettings;
use power_core::capabilities::{DaqBackend, DeviceControl, PowerSupply};
use power_core::channel::ChannelConfig;
use power_core::error::PowerError;
use power_driver_mock::{ErrorConfig, ErrorScenario, MockChannel, MockDaq, MockDeviceControl, MockPowerSupply};
use power_scenario::*;

struct Bench {
    supply: Arc<MockPowerSupply>,
    device: Arc<MockDeviceControl>,
    daq: MockDaq,
}

impl Bench {
    fn new() -> Self {
        Self::with_device(MockDeviceControl::new())
    }

    fn with_device(device: MockDeviceControl) -> Self {
        Self {
            supply: Arc::new(MockPowerSupply::new()),
            device: Arc::new(device),
            daq: MockDaq::builder()
                .channel("ai0", MockChannel::shunt_drop(0.0005))
                .channel("ai1", MockChannel::shunt_drop(0.0010))
                .build(),
        }
    }

    fn engine(&self) -> ScenarioEngine {
        let supply: Arc<dyn PowerSupply> = self.supply.clone();
        let device: Arc<dyn DeviceControl> = self.device.clone();
        let daq: Arc<dyn DaqBackend> = Arc::new(self.daq.clone());
        ScenarioEngine::new(
            Hardware { supply, device, daq },
            config(),
            Arc::new(StepLibrary::standard()),
        )
    }
}

fn config() -> RunConfig {
    RunConfig {
        engine: EngineSettings {
            retry_delay: Duration::from_millis(10),
            ..EngineSettings::default()
        },
        acquisition: AcquisitionSettings {
            sample_rate: 1000.0,
            chunk_size: 250,
            compression_ratio: 50,
            ..AcquisitionSettings::default()
        },
        channels: vec![
            ChannelConfig::new("ai0", "A", 0.01),
            ChannelConfig::new("ai1", "B", 0.01),
        ],
    }
}

fn scenario(steps: Vec<Step>) -> Arc<ScenarioDefinition> {
    Arc::new(ScenarioDefinition::new("test", "", steps))
}

#[tokio::test(start_paused = true)]
async fn test_supply_wait_acquire() {
    let bench = Bench::new();
    let engine = bench.engine();
    let mut events = engine.subscribe();

    engine
        .start(scenario(vec![
            Step::new("supply", "set_voltage").with("voltage", 4.0),
            Step::new("settle", "wait").with("duration", "2s"),
            Step::new("capture", "acquire")
                .with("channels", vec!["A", "B"])
                .with("duration", "5s"),
        ]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.status, EngineStatus::Completed);
    assert!(report.is_complete());
    assert_eq!(report.last_completed_step, Some(2));
    assert_eq!(bench.supply.set_points(), vec![4.0]);

    assert_eq!(report.rows.len(), 100);
    for pair in report.rows.windows(2) {
        assert!((pair[1].time_elapsed - pair[0].time_elapsed - 0.05).abs() < 1e-9);
    }
    let first = &report.rows[0];
    assert_eq!(first.step_index, 2);
    assert!((first.readings["ai0"].current_amps - 0.05).abs() < 1e-9);
    assert!((first.readings["ai1"].current_amps - 0.1).abs() < 1e-9);
    assert_eq!(report.channels(), vec!["ai0", "ai1"]);
    assert_eq!(report.summaries.len(), 2);
    assert!(bench.daq.all_handles_closed());

    let mut progress = Vec::new();
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            RunEvent::Progress { step_index, total_steps, .. } => {
                progress.push((step_index, total_steps))
            }
            RunEvent::Finished(_) => finished = true,
            _ => {}
        }
    }
    assert_eq!(progress, vec![(0, 3), (1, 3), (2, 3)]);
    assert!(finished);
    assert_eq!(engine.status(), EngineStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_wait_is_prompt() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![
            Step::new("long wait", "wait").with("duration", "60s"),
            Step::new("never", "export"),
        ]))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert_eq!(engine.snapshot().current_step_index, Some(0));
    let stopped_at = tokio::time::Instant::now();
    assert!(engine.stop());
    assert_eq!(engine.status(), EngineStatus::Stopping);

    let report = engine.wait().await.unwrap();
    assert!(stopped_at.elapsed() <= EngineSettings::default().wait_chunk);
    assert_eq!(report.status, EngineStatus::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert!(failure.cancelled);
    assert_eq!(failure.step_index, 0);
    assert_eq!(failure.last_completed_step, None);
    assert!(!engine.stop());
}

#[tokio::test(start_paused = true)]
async fn test_second_start_rejected() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(Arc::new(ScenarioDefinition::new(
            "first",
            "",
            vec![Step::new("wait", "wait").with("duration", "10s")],
        )))
        .unwrap();

    let second = engine.start(Arc::new(ScenarioDefinition::new(
        "second",
        "",
        vec![Step::new("wait", "wait").with("duration", "1s")],
    )));
    assert!(matches!(second, Err(PowerError::AlreadyRunning { .. })));
    assert_eq!(engine.snapshot().scenario.as_deref(), Some("first"));

    let report = engine.wait().await.unwrap();
    assert_eq!(report.scenario, "first");
    assert_eq!(report.status, EngineStatus::Completed);

    // finished engines accept a new run
    engine
        .start(scenario(vec![Step::new("w", "wait").with("duration", "1s")]))
        .unwrap();
    assert!(engine.wait().await.unwrap().is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_failed_step_closes_open_acquisition() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![
            Step::new("start", "start_acquisition"),
            // above the mock supply's limit
            Step::new("overvolt", "set_voltage").with("voltage", 9.0),
            Step::new("stop", "stop_acquisition"),
        ]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.status, EngineStatus::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.step_index, 1);
    assert_eq!(failure.last_completed_step, Some(0));
    assert!(!failure.cancelled);
    assert!(failure.message.contains("refused"));
    assert!(report.rows.is_empty());
    assert_eq!(bench.daq.open_count(), 1);
    assert!(bench.daq.all_handles_closed());
}

#[tokio::test(start_paused = true)]
async fn test_open_ended_acquisition_spans_waits() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![
            Step::new("start", "start_acquisition"),
            Step::new("dwell", "wait").with("duration", "2s"),
            Step::new("stop", "stop_acquisition"),
        ]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert!(report.is_complete(), "{:?}", report.failure);
    // 2 s at 1000 Hz compressed 50:1
    assert_eq!(report.rows.len(), 40);
    assert!(bench.daq.all_handles_closed());
}

#[tokio::test(start_paused = true)]
async fn test_stop_keeps_partial_acquisition() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![
            Step::new("start", "start_acquisition"),
            Step::new("dwell", "wait").with("duration", "30s"),
            Step::new("stop", "stop_acquisition"),
        ]))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    engine.stop();
    let report = engine.wait().await.unwrap();

    assert!(report.failure.as_ref().unwrap().cancelled);
    assert!(!report.rows.is_empty());
    assert!(bench.daq.all_handles_closed());
}

#[tokio::test(start_paused = true)]
async fn test_device_command_retries() {
    let device = MockDeviceControl::new().with_error_config(ErrorConfig::scenario(
        ErrorScenario::FailFirst {
            operation: "send",
            count: 2,
        },
    ));
    let bench = Bench::with_device(device);
    let engine = bench.engine();
    engine
        .start(scenario(vec![Step::new("home", "press_home")]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(bench.device.count_matching("KEYCODE_HOME"), 3);
    let warnings = report
        .log
        .iter()
        .filter(|e| e.level == LogLevel::Warn)
        .count();
    assert_eq!(warnings, 2);
}

#[tokio::test(start_paused = true)]
async fn test_device_command_gives_up() {
    let device = MockDeviceControl::new().with_error_config(ErrorConfig::scenario(
        ErrorScenario::FailFirst {
            operation: "send",
            count: 10,
        },
    ));
    let bench = Bench::with_device(device);
    let engine = bench.engine();
    engine
        .start(scenario(vec![
            Step::new("home", "press_home"),
            Step::new("never", "screen_on"),
        ]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.status, EngineStatus::Failed);
    assert_eq!(report.failure.as_ref().unwrap().step_index, 0);
    // one attempt plus two retries
    assert_eq!(bench.device.commands().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_screen_cycle_commands() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![Step::new("cycle", "screen_cycle")
            .with("cycles", 3)
            .with("interval", "500ms")]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(bench.device.count_matching("KEYCODE_POWER"), 3);
    assert_eq!(bench.device.count_matching("KEYCODE_WAKEUP"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_channel_fails_step() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![Step::new("capture", "acquire")
            .with("channels", "ai7")
            .with("duration", "1s")]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.status, EngineStatus::Failed);
    assert!(report.failure.as_ref().unwrap().message.contains("ai7"));
    assert_eq!(bench.daq.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_wait_fails_step() {
    let bench = Bench::new();
    let engine = bench.engine();
    engine
        .start(scenario(vec![
            Step::new("forever", "wait").lasting(Duration::MAX)
        ]))
        .unwrap();
    let report = engine.wait().await.unwrap();

    assert_eq!(report.status, EngineStatus::Failed);
    let failure = report.failure.as_ref().unwrap();
    assert!(!failure.cancelled);
    assert!(failure.message.contains("out of range"));
}

#[tokio::test]
async fn test_invalid_scenario_rejected_before_start() {
    let bench = Bench::new();
    let engine = bench.engine();
    let bad = scenario(vec![Step::new("x", "set_voltage")]);
    assert!(matches!(engine.start(bad), Err(PowerError::Configuration(_))));
    assert_eq!(engine.status(), EngineStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_export_publishes_rows() {
    let bench = Bench::new();
    let engine = bench.engine();
    let mut events = engine.subscribe();
    engine
        .start(scenario(vec![
            Step::new("capture", "acquire").with("duration", "1s"),
            Step::new("export", "export"),
        ]))
        .unwrap();
    engine.wait().await.unwrap();

    let mut exported = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::ExportReady(report) = event {
            exported = Some(report);
        }
    }
    let exported = exported.unwrap();
    assert_eq!(exported.status, EngineStatus::Running);
    assert_eq!(exported.rows.len(), 20);
}

struct Crash;

#[async_trait::async_trait]
impl StepExecutor for Crash {
    fn action_id(&self) -> &'static str {
        "crash"
    }

    async fn execute(&self, _step: &Step, _ctx: &mut StepContext) -> bool {
        panic!("executor crashed");
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_after_worker_panic() {
    let bench = Bench::new();
    let mut library = StepLibrary::standard();
    library.register(Crash);
    let engine = ScenarioEngine::new(
        Hardware {
            supply: bench.supply.clone(),
            device: bench.device.clone(),
            daq: Arc::new(bench.daq.clone()),
        },
        config(),
        Arc::new(library),
    );

    engine
        .start(scenario(vec![Step::new("boom", "crash")]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.status(), EngineStatus::Running);

    engine
        .start(scenario(vec![Step::new("settle", "wait").with("duration", "100ms")]))
        .unwrap();
    let report = engine.wait().await.unwrap();
    assert_eq!(report.status, EngineStatus::Completed);
}
