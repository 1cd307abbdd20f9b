//! Built-in scenarios.

use std::time::Duration;

use crate::scenario::{ScenarioDefinition, Step};

const SUPPLY_VOLTS: f64 = 4.0;

/// All built-in scenarios.
pub fn all() -> Vec<ScenarioDefinition> {
    vec![screen_on_off(), phone_app(), idle_wait()]
}

/// Screen on/off cycling with the handset in airplane mode.
pub fn screen_on_off() -> ScenarioDefinition {
    ScenarioDefinition::new(
        "screen_on_off",
        "Screen on/off power consumption: 10 cycles at 2 s per cycle after a 20 s stabilisation",
        vec![
            Step::new("init_supply", "set_voltage")
                .lasting(secs(2))
                .with("voltage", SUPPLY_VOLTS),
            Step::new("airplane_mode", "enable_airplane_mode").lasting(secs(2)),
            Step::new("clear_apps", "clear_recent_apps").lasting(secs(3)),
            Step::new("unlock_screen", "unlock_screen").lasting(secs(2)),
            Step::new("home_screen", "press_home").lasting(secs(2)),
            Step::new("stabilize", "wait").lasting(secs(20)),
            Step::new("start_monitoring", "start_acquisition").lasting(secs(1)),
            Step::new("screen_test", "screen_cycle")
                .lasting(secs(20))
                .with("cycles", 10)
                .with("interval", "1s"),
            Step::new("stop_monitoring", "stop_acquisition").lasting(secs(1)),
            Step::new("save_data", "export").lasting(secs(2)),
        ],
    )
}

fn init_sequence() -> Vec<Step> {
    vec![
        Step::new("default_settings", "apply_default_settings").lasting(secs(5)),
        Step::new("lcd_on", "screen_on").lasting(secs(1)),
        Step::new("unlock", "unlock_screen").lasting(secs(2)),
        Step::new("init_supply", "set_voltage")
            .lasting(secs(2))
            .with("voltage", SUPPLY_VOLTS),
        Step::new("airplane_mode", "enable_airplane_mode").lasting(secs(2)),
        Step::new("bluetooth_on", "enable_bluetooth").lasting(secs(2)),
        Step::new("home", "press_home").lasting(secs(1)),
        Step::new("clear_apps", "clear_recent_apps").lasting(secs(3)),
        Step::new("current_stabilization", "wait").lasting(secs(10)),
    ]
}

/// Dialer launch measured against the common init sequence.
pub fn phone_app() -> ScenarioDefinition {
    let mut steps = init_sequence();
    steps.extend([
        Step::new("start_daq", "start_acquisition").lasting(secs(2)),
        Step::new("open_phone_app", "launch_app")
            .lasting(secs(1))
            .with("intent", "android.intent.action.DIAL"),
        Step::new("phone_app_dwell", "wait").lasting(secs(9)),
        Step::new("stop_daq", "stop_acquisition").lasting(secs(2)),
        Step::new("export", "export").lasting(secs(3)),
    ]);
    ScenarioDefinition::new(
        "phone_app",
        "Phone app launch: init sequence, then 10 s with the dialer open",
        steps,
    )
}

/// Five minutes of idle after the common init sequence.
pub fn idle_wait() -> ScenarioDefinition {
    let mut steps = init_sequence();
    steps.extend([
        Step::new("idle_capture", "acquire").lasting(Duration::from_secs(300)),
        Step::new("export", "export").lasting(secs(3)),
    ]);
    ScenarioDefinition::new(
        "idle_wait",
        "Idle current: init sequence, then a 5 minute capture",
        steps,
    )
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}
