//! Error injection for simulated devices.
//!
//! Every simulated operation calls [`ErrorConfig::check_operation`] with its
//! operation name before doing any work. Scenarios are evaluated in order,
//! then the per-operation random failure rate.

use super::rng::MockRng;
use parking_lot::Mutex;
use power_core::error::{DriverError, DriverErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate, `"*"` for all operations
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// A scripted failure pattern.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// The first `count` calls fail with a timeout, later calls succeed
    FailFirst {
        /// Operation name
        operation: &'static str,
        /// Number of failing calls
        count: u32,
    },
    /// Calls after the first `count` fail with a hardware error
    FailAfterN {
        /// Operation name
        operation: &'static str,
        /// Number of succeeding calls
        count: u32,
    },
    /// Every call times out
    Timeout {
        /// Operation name
        operation: &'static str,
    },
    /// The first call of any operation loses the link; all later calls fail
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, evaluated in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Custom failure rates per operation.
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` fails now.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        let tracked = self.scenarios.iter().any(|s| {
            matches!(s,
                ErrorScenario::FailFirst { operation: op, .. }
                | ErrorScenario::FailAfterN { operation: op, .. } if *op == operation)
        });
        let call = if tracked {
            let counter = state.operation_counts.entry(operation).or_insert(0);
            *counter += 1;
            *counter
        } else {
            0
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailFirst {
                    operation: op,
                    count,
                } if *op == operation && call <= *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Injected timeout on '{operation}' (call {call} of {count})"),
                    ));
                }
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && call > *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("Injected failure after {count} operations"),
                    ));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{operation}' timed out"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                format!("Random failure on operation '{operation}'"),
            ));
        }

        Ok(())
    }

    /// Clear counters and link state.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
