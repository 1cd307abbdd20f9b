//! Collaborator Capabilities
//!
//! The characterization core never talks to vendor drivers directly. It drives
//! three external collaborators through small capability traits:
//!
//! - [`PowerSupply`]: programmable supply feeding the handset battery terminals
//! - [`DeviceControl`]: text-command bridge into the handset (shell over adb)
//! - [`DaqBackend`] / [`DaqHandle`]: multi-channel analog acquisition device
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync, except the single-owner handle)
//! - Returns [`DriverError`] so callers can tell a rejected configuration
//!   from a broken device via [`DriverErrorKind`](crate::error::DriverErrorKind)
//! - Carries no retry logic; retries belong to the step executor or session
//!   that called it
//!
//! # Example
//!
//! ```rust,ignore
//! async fn bring_up(supply: &dyn PowerSupply) -> Result<(), DriverError> {
//!     supply.set_voltage(4.0).await?;
//!     let (volts, amps) = supply.read_voltage_current().await?;
//!     tracing::info!(volts, amps, "supply settled");
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{TerminalMode, VoltageRange};
use crate::error::DriverError;

/// Capability: Programmable power supply / monitor
///
/// # Contract
/// - `set_voltage` returns `Ok(false)` when the supply refused the set point
///   without a transport fault (output disabled, limit exceeded)
/// - `read_voltage_current` returns `(volts, amps)` measured at the output
#[async_trait]
pub trait PowerSupply: Send + Sync {
    /// Program the output voltage.
    async fn set_voltage(&self, volts: f64) -> Result<bool, DriverError>;

    /// Read back the output voltage and current.
    async fn read_voltage_current(&self) -> Result<(f64, f64), DriverError>;
}

/// Capability: Device-control command bridge
///
/// A single synchronous "send command, get text reply" call bounded by
/// `timeout`. Implementations must not retry internally.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Send one command and return the textual reply.
    async fn send(&self, command: &str, timeout: Duration) -> Result<String, DriverError>;
}

/// Capability: DAQ device factory
///
/// Opening is the only point where device presence is checked. A failure
/// here is never retried.
#[async_trait]
pub trait DaqBackend: Send + Sync {
    /// Open the device and return an exclusively owned handle.
    async fn open(&self, device_id: &str) -> Result<Box<dyn DaqHandle>, DriverError>;
}

/// An open DAQ task.
///
/// # Contract
/// - `configure_channel` fails with a `Configuration` or `InvalidParameter`
///   kind when the device does not support the requested terminal mode or
///   range on that channel. Any other kind is a device fault.
/// - `read_chunk` returns one vector per configured channel (in configuration
///   order), each holding exactly `samples_per_channel` readings in volts.
/// - `close` must be safe to call after `stop` or after a failed `start`.
///
/// # Thread Safety
/// - Handles are single-owner and are moved, never shared, so only `Send`
///   is required.
#[async_trait]
pub trait DaqHandle: Send {
    /// Add `channel` to the task with the given terminal mode and range.
    async fn configure_channel(
        &mut self,
        channel: &str,
        mode: TerminalMode,
        range: VoltageRange,
    ) -> Result<(), DriverError>;

    /// Start hardware-timed sampling at `sample_rate` Hz per channel.
    async fn start(&mut self, sample_rate: f64) -> Result<(), DriverError>;

    /// Read the next block of samples, channel-major.
    async fn read_chunk(
        &mut self,
        samples_per_channel: usize,
        timeout: Duration,
    ) -> Result<Vec<Vec<f64>>, DriverError>;

    /// Stop sampling.
    async fn stop(&mut self) -> Result<(), DriverError>;

    /// Release the device.
    async fn close(&mut self) -> Result<(), DriverError>;
}
