//! Simulated multi-channel analog input device.
//!
//! Each channel models a shunt resistor on one rail:
//!
//! - a set of terminal modes the wiring accepts (others are rejected with a
//!   `Configuration` error, like a real driver rejecting differential mode on
//!   a single-ended-only input)
//! - a steady shunt drop in volts
//! - a ground offset added only under the ground-referenced mode, which is
//!   what makes a mis-wired RSE reading look like the rail voltage
//! - uniform noise and periodic spikes
//!
//! # Example
//!
//! ```rust,ignore
//! let daq = MockDaq::builder()
//!     .channel("ai0", MockChannel::shunt_drop(0.0005))
//!     .channel("ai1", MockChannel::shunt_drop(0.0008).rse_only(3.3))
//!     .mode(MockMode::Realistic)
//!     .build();
//! let handle = daq.open("Dev1").await?;
//! ```

use crate::common::{ErrorConfig, MockMode, MockRng};
use async_trait::async_trait;
use parking_lot::Mutex;
use power_core::capabilities::{DaqBackend, DaqHandle};
use power_core::channel::{TerminalMode, VoltageRange};
use power_core::error::{DriverError, DriverErrorKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DRIVER_TYPE: &str = "mock_daq";

/// Electrical model of one simulated input.
#[derive(Debug, Clone, PartialEq)]
pub struct MockChannel {
    /// Modes the wiring accepts
    pub accepted_modes: Vec<TerminalMode>,
    /// Steady shunt drop in volts
    pub shunt_drop_volts: f64,
    /// Added under the ground-referenced mode
    pub ground_offset_volts: f64,
    /// Uniform noise amplitude in volts
    pub noise_volts: f64,
    /// Every `n`th sample carries a spike
    pub spike_every: Option<usize>,
    /// Spike height in volts
    pub spike_volts: f64,
}

impl MockChannel {
    /// A channel that accepts every mode and reads a steady drop.
    pub fn shunt_drop(volts: f64) -> Self {
        Self {
            accepted_modes: TerminalMode::NEGOTIATION_ORDER.to_vec(),
            shunt_drop_volts: volts,
            ground_offset_volts: 0.0,
            noise_volts: 0.0,
            spike_every: None,
            spike_volts: 0.0,
        }
    }

    /// Restrict the accepted modes.
    pub fn accepting(mut self, modes: &[TerminalMode]) -> Self {
        self.accepted_modes = modes.to_vec();
        self
    }

    /// Accept only the ground-referenced mode and read `rail_volts` on top of the drop.
    pub fn rse_only(mut self, rail_volts: f64) -> Self {
        self.accepted_modes = vec![TerminalMode::ReferencedSingleEnded];
        self.ground_offset_volts = rail_volts;
        self
    }

    /// Add uniform noise.
    pub fn with_noise(mut self, volts: f64) -> Self {
        self.noise_volts = volts;
        self
    }

    /// Add a spike of `volts` every `every` samples.
    pub fn with_spikes(mut self, every: usize, volts: f64) -> Self {
        self.spike_every = Some(every.max(1));
        self.spike_volts = volts;
        self
    }

    fn sample(&self, mode: TerminalMode, index: u64, rng: &MockRng) -> f64 {
        let mut volts = self.shunt_drop_volts + rng.noise(self.noise_volts);
        if mode.is_ground_referenced() {
            volts += self.ground_offset_volts;
        }
        if let Some(every) = self.spike_every {
            if (index + 1) % every as u64 == 0 {
                volts += self.spike_volts;
            }
        }
        volts
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::shunt_drop(0.0005)
    }
}

struct Shared {
    channels: HashMap<String, MockChannel>,
    default_channel: Option<MockChannel>,
    mode: MockMode,
    rng: MockRng,
    error_config: ErrorConfig,
    open_failure: Option<DriverErrorKind>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    configured: Mutex<Vec<(String, TerminalMode)>>,
}

/// Simulated DAQ device. Clones share counters and state.
#[derive(Clone)]
pub struct MockDaq {
    shared: Arc<Shared>,
}

impl MockDaq {
    /// Device where every unknown channel reads a 0.5 mV drop in any mode.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create builder.
    pub fn builder() -> MockDaqBuilder {
        MockDaqBuilder::default()
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of handles closed.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Number of successful chunk reads across all handles.
    pub fn read_count(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    /// True when every opened handle has been closed.
    pub fn all_handles_closed(&self) -> bool {
        self.open_count() == self.close_count()
    }

    /// Accepted (channel, mode) pairs in configuration order.
    pub fn configured_modes(&self) -> Vec<(String, TerminalMode)> {
        self.shared.configured.lock().clone()
    }
}

impl Default for MockDaq {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockDaq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDaq")
            .field("channels", &self.shared.channels.len())
            .field("mode", &self.shared.mode)
            .field("opens", &self.open_count())
            .field("closes", &self.close_count())
            .finish()
    }
}

#[async_trait]
impl DaqBackend for MockDaq {
    async fn open(&self, device_id: &str) -> Result<Box<dyn DaqHandle>, DriverError> {
        if let Some(kind) = self.shared.open_failure {
            return Err(DriverError::new(
                DRIVER_TYPE,
                kind,
                format!("device '{device_id}' not present"),
            ));
        }
        self.shared.error_config.check_operation(DRIVER_TYPE, "open")?;
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(device = device_id, "mock DAQ opened");
        Ok(Box::new(MockDaqHandle {
            shared: Arc::clone(&self.shared),
            device_id: device_id.to_string(),
            channels: Vec::new(),
            sample_rate: None,
            sample_index: 0,
            closed: false,
        }))
    }
}

/// Builder for [`MockDaq`].
#[derive(Default)]
pub struct MockDaqBuilder {
    channels: HashMap<String, MockChannel>,
    strict_channels: bool,
    mode: MockMode,
    seed: Option<u64>,
    error_config: ErrorConfig,
    open_failure: Option<DriverErrorKind>,
}

impl MockDaqBuilder {
    /// Define a channel.
    pub fn channel(mut self, id: impl Into<String>, channel: MockChannel) -> Self {
        self.channels.insert(id.into(), channel);
        self
    }

    /// Reject channels that were not defined.
    pub fn strict_channels(mut self) -> Self {
        self.strict_channels = true;
        self
    }

    /// Set the operational mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seed the noise generator.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Inject errors.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Make every `open` fail with `kind`.
    pub fn fail_open(mut self, kind: DriverErrorKind) -> Self {
        self.open_failure = Some(kind);
        self
    }

    /// Build the device.
    pub fn build(self) -> MockDaq {
        MockDaq {
            shared: Arc::new(Shared {
                channels: self.channels,
                default_channel: (!self.strict_channels).then(MockChannel::default),
                mode: self.mode,
                rng: MockRng::new(self.seed),
                error_config: self.error_config,
                open_failure: self.open_failure,
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
                configured: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Open task on a [`MockDaq`].
pub struct MockDaqHandle {
    shared: Arc<Shared>,
    device_id: String,
    channels: Vec<(String, MockChannel, TerminalMode)>,
    sample_rate: Option<f64>,
    sample_index: u64,
    closed: bool,
}

impl MockDaqHandle {
    fn error(&self, kind: DriverErrorKind, message: impl Into<String>) -> DriverError {
        DriverError::new(DRIVER_TYPE, kind, message)
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            return Err(self.error(
                DriverErrorKind::Unknown,
                format!("task on '{}' already closed", self.device_id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DaqHandle for MockDaqHandle {
    async fn configure_channel(
        &mut self,
        channel: &str,
        mode: TerminalMode,
        range: VoltageRange,
    ) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.shared
            .error_config
            .check_operation(DRIVER_TYPE, "configure")?;

        if range.span() <= 0.0 {
            return Err(self.error(
                DriverErrorKind::InvalidParameter,
                format!("invalid range {range}"),
            ));
        }
        let model = self
            .shared
            .channels
            .get(channel)
            .or(self.shared.default_channel.as_ref())
            .cloned()
            .ok_or_else(|| {
                self.error(
                    DriverErrorKind::InvalidParameter,
                    format!("physical channel '{channel}' does not exist"),
                )
            })?;
        if !model.accepted_modes.contains(&mode) {
            return Err(self.error(
                DriverErrorKind::Configuration,
                format!("terminal configuration '{mode}' not supported on '{channel}'"),
            ));
        }

        self.shared
            .configured
            .lock()
            .push((channel.to_string(), mode));
        self.channels.push((channel.to_string(), model, mode));
        Ok(())
    }

    async fn start(&mut self, sample_rate: f64) -> Result<(), DriverError> {
        self.ensure_open()?;
        if self.channels.is_empty() {
            return Err(self.error(DriverErrorKind::Configuration, "no channels configured"));
        }
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(self.error(
                DriverErrorKind::InvalidParameter,
                format!("sample rate {sample_rate} Hz"),
            ));
        }
        self.shared.error_config.check_operation(DRIVER_TYPE, "start")?;
        self.sample_rate = Some(sample_rate);
        self.sample_index = 0;
        Ok(())
    }

    async fn read_chunk(
        &mut self,
        samples_per_channel: usize,
        timeout: Duration,
    ) -> Result<Vec<Vec<f64>>, DriverError> {
        self.ensure_open()?;
        let rate = self
            .sample_rate
            .ok_or_else(|| self.error(DriverErrorKind::Configuration, "task not started"))?;

        if self.shared.mode.is_paced() {
            let needed = Duration::from_secs_f64(samples_per_channel as f64 / rate);
            if needed > timeout {
                tokio::time::sleep(timeout).await;
                return Err(self.error(
                    DriverErrorKind::Timeout,
                    format!(
                        "{samples_per_channel} samples not available within {timeout:?}"
                    ),
                ));
            }
            tokio::time::sleep(needed).await;
        }
        self.shared.error_config.check_operation(DRIVER_TYPE, "read")?;

        let start = self.sample_index;
        let rng = &self.shared.rng;
        let data = self
            .channels
            .iter()
            .map(|(_, model, mode)| {
                (0..samples_per_channel as u64)
                    .map(|i| model.sample(*mode, start + i, rng))
                    .collect()
            })
            .collect();
        self.sample_index += samples_per_channel as u64;
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.sample_rate = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if !self.closed {
            self.closed = true;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(device = %self.device_id, "mock DAQ closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unaccepted_mode() {
        let daq = MockDaq::builder()
            .channel(
                "ai0",
                MockChannel::shunt_drop(0.001).accepting(&[TerminalMode::NonReferencedSingleEnded]),
            )
            .build();
        let mut handle = daq.open("Dev1").await.unwrap();
        let err = handle
            .configure_channel("ai0", TerminalMode::Differential, VoltageRange::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Configuration);
        assert!(handle
            .configure_channel(
                "ai0",
                TerminalMode::NonReferencedSingleEnded,
                VoltageRange::default()
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_ground_offset_only_under_rse() {
        let daq = MockDaq::builder()
            .channel("ai0", MockChannel::shunt_drop(0.001).rse_only(3.3))
            .build();
        let mut handle = daq.open("Dev1").await.unwrap();
        handle
            .configure_channel(
                "ai0",
                TerminalMode::ReferencedSingleEnded,
                VoltageRange::default(),
            )
            .await
            .unwrap();
        handle.start(1000.0).await.unwrap();
        let data = handle
            .read_chunk(10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].len(), 10);
        assert!((data[0][0] - 3.301).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_spikes_are_periodic() {
        let daq = MockDaq::builder()
            .channel("ai0", MockChannel::shunt_drop(0.0).with_spikes(5, 1.0))
            .build();
        let mut handle = daq.open("Dev1").await.unwrap();
        handle
            .configure_channel("ai0", TerminalMode::Differential, VoltageRange::default())
            .await
            .unwrap();
        handle.start(100.0).await.unwrap();
        let data = handle.read_chunk(10, Duration::from_secs(1)).await.unwrap();
        let spikes = data[0].iter().filter(|v| **v > 0.5).count();
        assert_eq!(spikes, 2);
    }

    #[tokio::test]
    async fn test_close_counted_once() {
        let daq = MockDaq::new();
        let mut handle = daq.open("Dev1").await.unwrap();
        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(daq.open_count(), 1);
        assert_eq!(daq.close_count(), 1);
        assert!(daq.all_handles_closed());
    }

    #[tokio::test]
    async fn test_fail_open() {
        let daq = MockDaq::builder()
            .fail_open(DriverErrorKind::Initialization)
            .build();
        assert!(daq.open("Dev9").await.is_err());
        assert_eq!(daq.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realistic_read_is_paced() {
        let daq = MockDaq::builder().mode(MockMode::Realistic).build();
        let mut handle = daq.open("Dev1").await.unwrap();
        handle
            .configure_channel("ai0", TerminalMode::Differential, VoltageRange::default())
            .await
            .unwrap();
        handle.start(1000.0).await.unwrap();

        let before = tokio::time::Instant::now();
        handle
            .read_chunk(500, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(before.elapsed(), Duration::from_millis(500));

        let err = handle
            .read_chunk(5000, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }
}
