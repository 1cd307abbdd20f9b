//! Collaborator assembly.
//!
//! Vendor DAQ and supply bindings are not part of this crate. The DAQ and the
//! supply are therefore always simulated from the configured channels; the
//! handset bridge is `adb` unless the configuration or the caller asks for
//! the simulated one.

use std::sync::Arc;

use power_core::capabilities::{DaqBackend, DeviceControl, PowerSupply};
use power_core::error::PowerResult;
use power_driver_mock::{MockChannel, MockDaq, MockDeviceControl, MockMode, MockPowerSupply};
use power_scenario::Hardware;
use tracing::{info, warn};

use crate::adb::AdbDeviceControl;
use crate::config::{BenchConfig, DeviceBackend};

/// Load current the simulated bench draws on every rail.
pub const SIMULATED_LOAD_AMPS: f64 = 0.1;

/// Build the collaborators for a run. Fails on an enabled channel without a
/// usable shunt resistance.
pub fn hardware(config: &BenchConfig, simulate_handset: bool) -> PowerResult<Hardware> {
    let mut daq = MockDaq::builder().mode(MockMode::Realistic);
    for channel in config.enabled_channels() {
        let shunt = channel.shunt_resistance()?;
        daq = daq.channel(
            channel.id.clone(),
            MockChannel::shunt_drop(SIMULATED_LOAD_AMPS * shunt).with_noise(shunt * 0.001),
        );
    }
    warn!(
        device = %config.acquisition.device_id,
        "no vendor DAQ or supply binding linked; using simulated instruments"
    );
    let daq: Arc<dyn DaqBackend> = Arc::new(daq.build());
    let supply: Arc<dyn PowerSupply> = Arc::new(
        MockPowerSupply::new()
            .with_load(SIMULATED_LOAD_AMPS)
            .with_mode(MockMode::Realistic),
    );

    let device: Arc<dyn DeviceControl> =
        if simulate_handset || config.device_control.backend == DeviceBackend::Mock {
            info!("using simulated handset");
            Arc::new(MockDeviceControl::new().with_mode(MockMode::Realistic))
        } else {
            info!(serial = ?config.device_control.serial, "using adb handset bridge");
            Arc::new(AdbDeviceControl::new(&config.device_control))
        };

    Ok(Hardware { supply, device, daq })
}
