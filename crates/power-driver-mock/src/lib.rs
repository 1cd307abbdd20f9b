//! Simulated collaborators for handset power characterization.
//!
//! Provides simulated implementations of the `power-core` capability traits
//! for tests and for dry runs of scenarios without a bench:
//!
//! - [`MockDaq`]: analog inputs with configurable terminal-mode support,
//!   shunt drop, ground offset, noise and spikes
//! - [`MockPowerSupply`]: records set points
//! - [`MockDeviceControl`]: records commands, scripted replies
//!
//! All three share the error injection framework in [`common`].

pub mod common;
pub mod mock_daq;
pub mod mock_device_control;
pub mod mock_power_supply;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng};
pub use mock_daq::{MockChannel, MockDaq, MockDaqBuilder, MockDaqHandle};
pub use mock_device_control::MockDeviceControl;
pub use mock_power_supply::MockPowerSupply;
