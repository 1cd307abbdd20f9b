//! `power-core`
//!
//! Core types for handset power characterization.
//!
//! This crate holds everything the acquisition session and the scenario engine
//! share: the error taxonomy, the collaborator capability traits, channel
//! calibration records, the result data model and the pure sample-processing
//! functions.
//!
//! ## Key Types
//!
//! - [`PowerError`]: error taxonomy with step/channel context
//! - [`ChannelConfig`]: shunt calibration for one rail
//! - [`TerminalMode`]: DAQ input reference configuration
//! - [`CompressedChannelSeries`] / [`ResultRow`]: acquisition output
//! - [`PowerSupply`], [`DeviceControl`], [`DaqBackend`], [`DaqHandle`]: collaborators
//!
//! ## Processing
//!
//! ```rust
//! use power_core::processing::{compress, shunt_current, trimmed_mean};
//!
//! let volts = compress(&[0.0004, 0.0006, 0.0005, 0.0005], 2).unwrap();
//! let amps: Vec<f64> = volts
//!     .iter()
//!     .map(|v| shunt_current(*v, 0.01, None).unwrap())
//!     .collect();
//! assert!((trimmed_mean(&amps, 0.0).unwrap() - 0.05).abs() < 1e-9);
//! ```

pub mod cancel;
pub mod capabilities;
pub mod channel;
pub mod data;
pub mod error;
pub mod processing;

pub use cancel::CancellationFlag;
pub use capabilities::{DaqBackend, DaqHandle, DeviceControl, PowerSupply};
pub use channel::{ChannelConfig, TerminalMode, VoltageRange};
pub use data::{ChannelReading, ChannelSummary, CompressedChannelSeries, ResultRow};
pub use error::{DriverError, DriverErrorKind, PowerError, PowerResult};
pub use processing::SampleStatistics;
