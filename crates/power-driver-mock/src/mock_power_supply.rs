//! Simulated programmable power supply.

use crate::common::{ErrorConfig, MockMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use power_core::capabilities::PowerSupply;
use power_core::error::DriverError;
use std::time::Duration;

const DRIVER_TYPE: &str = "mock_power_supply";

/// Supply that records every set point and reports a fixed load current.
#[derive(Debug)]
pub struct MockPowerSupply {
    output_volts: Mutex<f64>,
    load_amps: f64,
    max_volts: f64,
    set_points: Mutex<Vec<f64>>,
    mode: MockMode,
    error_config: ErrorConfig,
}

impl MockPowerSupply {
    /// Supply with a 0.1 A load and a 5.0 V limit.
    pub fn new() -> Self {
        Self {
            output_volts: Mutex::new(0.0),
            load_amps: 0.1,
            max_volts: 5.0,
            set_points: Mutex::new(Vec::new()),
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
        }
    }

    /// Set the reported load current.
    pub fn with_load(mut self, amps: f64) -> Self {
        self.load_amps = amps;
        self
    }

    /// Set points above `volts` are refused with `Ok(false)`.
    pub fn with_max_volts(mut self, volts: f64) -> Self {
        self.max_volts = volts;
        self
    }

    /// Set the operational mode.
    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Inject errors.
    pub fn with_error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Accepted set points in call order.
    pub fn set_points(&self) -> Vec<f64> {
        self.set_points.lock().clone()
    }

    /// Current output voltage.
    pub fn output_volts(&self) -> f64 {
        *self.output_volts.lock()
    }
}

impl Default for MockPowerSupply {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerSupply for MockPowerSupply {
    async fn set_voltage(&self, volts: f64) -> Result<bool, DriverError> {
        self.error_config
            .check_operation(DRIVER_TYPE, "set_voltage")?;
        if self.mode.is_paced() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !volts.is_finite() || volts < 0.0 || volts > self.max_volts {
            tracing::debug!(volts, max = self.max_volts, "mock supply refused set point");
            return Ok(false);
        }
        *self.output_volts.lock() = volts;
        self.set_points.lock().push(volts);
        Ok(true)
    }

    async fn read_voltage_current(&self) -> Result<(f64, f64), DriverError> {
        self.error_config.check_operation(DRIVER_TYPE, "read")?;
        let volts = self.output_volts();
        let amps = if volts > 0.0 { self.load_amps } else { 0.0 };
        Ok((volts, amps))
    }
}
