//! Hardware acquisition session.
//!
//! One session owns one DAQ handle for one capture:
//!
//! ```text
//! Idle -> Configuring -> Streaming -> Draining -> Closed
//!   \__________\______________\__________\_____-> Failed
//! ```
//!
//! - `open` claims the device gate, opens the handle and negotiates a terminal
//!   mode for every channel.
//! - `start` arms hardware-timed sampling.
//! - `stream` / `stream_to` read fixed-size chunks, checking the cancellation
//!   flag before each one. A failed read is retried up to the configured bound.
//! - `finish` compresses, derives currents and statistics, then stops and
//!   closes the handle.
//!
//! The handle is released on every exit path: `finish`, any failure, `abort`,
//! and as a last resort on drop.

use chrono::{DateTime, Utc};
use power_core::cancel::CancellationFlag;
use power_core::capabilities::{DaqBackend, DaqHandle};
use power_core::data::{CompressedChannelSeries, ResultRow};
use power_core::error::{PowerError, PowerResult};
use power_core::processing::{compress_with, shunt_current, PartialBlock, SampleStatistics};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::gate::{AcquisitionGate, SessionPass};
use crate::negotiator::{is_plausible_shunt_drop, mean_magnitude, ChannelNegotiator, NegotiatedChannel};
use crate::settings::AcquisitionRequest;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, device not touched
    Idle,
    /// Handle open, negotiating channels
    Configuring,
    /// Sampling
    Streaming,
    /// Processing captured samples
    Draining,
    /// Finished and released
    Closed,
    /// Aborted by an error; handle released
    Failed,
}

impl SessionState {
    /// Whether the session can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Configuring => "configuring",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Progress reported after every chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamProgress {
    /// Chunks read so far
    pub chunks: usize,
    /// Samples per channel read so far
    pub samples_per_channel: usize,
    /// Samples per channel targeted, for fixed-duration captures
    pub target: Option<usize>,
}

/// Result of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionOutcome {
    /// One series per channel, in request order
    pub series: Vec<CompressedChannelSeries>,
    /// Wall-clock time sampling started
    pub started_at: DateTime<Utc>,
    /// Samples per second per channel
    pub sample_rate: f64,
    /// Raw samples per compressed sample
    pub compression_ratio: usize,
    /// Raw samples per channel captured
    pub samples_per_channel: usize,
    /// Streaming stopped early on a cancellation request
    pub cancelled: bool,
}

impl AcquisitionOutcome {
    /// Expand the series into timestamped rows attributed to `step_index`.
    pub fn rows(&self, step_index: usize) -> Vec<ResultRow> {
        ResultRow::expand(
            &self.series,
            self.started_at,
            self.sample_rate,
            self.compression_ratio,
            step_index,
        )
    }
}

/// One capture on one DAQ handle.
pub struct AcquisitionSession {
    request: AcquisitionRequest,
    negotiator: ChannelNegotiator,
    gate: AcquisitionGate,
    pass: Option<SessionPass>,
    state: SessionState,
    handle: Option<Box<dyn DaqHandle>>,
    negotiated: Vec<NegotiatedChannel>,
    raw: Vec<Vec<f64>>,
    samples_read: usize,
    chunks_read: usize,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    cancelled: bool,
}

impl AcquisitionSession {
    /// Create a session. The request is validated before anything else happens.
    pub fn new(request: AcquisitionRequest, gate: AcquisitionGate) -> PowerResult<Self> {
        request.validate()?;
        let negotiator = ChannelNegotiator::new(request.terminal_order.clone(), request.voltage_range);
        Ok(Self {
            request,
            negotiator,
            gate,
            pass: None,
            state: SessionState::Idle,
            handle: None,
            negotiated: Vec::new(),
            raw: Vec::new(),
            samples_read: 0,
            chunks_read: 0,
            started_at: None,
            started: None,
            cancelled: false,
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The request this session runs.
    pub fn request(&self) -> &AcquisitionRequest {
        &self.request
    }

    /// Negotiation results, in channel order.
    pub fn negotiated(&self) -> &[NegotiatedChannel] {
        &self.negotiated
    }

    /// Samples per channel read so far.
    pub fn samples_read(&self) -> usize {
        self.samples_read
    }

    /// Whether a DAQ handle is currently held.
    pub fn holds_handle(&self) -> bool {
        self.handle.is_some()
    }

    fn transition(&mut self, to: SessionState) {
        debug!(from = %self.state, to = %to, device = %self.request.device_id, "acquisition session state");
        self.state = to;
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> PowerResult<()> {
        if self.state != expected {
            return Err(PowerError::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Claim the device, open it and negotiate every channel.
    pub async fn open(&mut self, backend: &dyn DaqBackend) -> PowerResult<()> {
        self.expect_state(SessionState::Idle, "open an acquisition session")?;
        self.pass = Some(self.gate.try_acquire()?);
        self.transition(SessionState::Configuring);

        let opened = backend.open(&self.request.device_id).await;
        let handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                error!(device = %self.request.device_id, error = %err, "DAQ device could not be opened");
                return Err(self.fail(PowerError::Driver(err)).await);
            }
        };
        self.handle = Some(handle);

        let ids: Vec<String> = self.request.channels.iter().map(|c| c.id.clone()).collect();
        for id in ids {
            let Some(handle) = self.handle.as_deref_mut() else {
                return Err(self.fail(PowerError::Runtime("DAQ handle lost".into())).await);
            };
            let negotiated = self.negotiator.negotiate(handle, &id).await;
            match negotiated {
                Ok(negotiated) => self.negotiated.push(negotiated),
                Err(err) => {
                    error!(channel = %id, error = %err, "channel configuration failed");
                    return Err(self.fail(err).await);
                }
            }
        }

        self.raw = vec![Vec::new(); self.negotiated.len()];
        info!(
            device = %self.request.device_id,
            channels = self.negotiated.len(),
            "acquisition configured"
        );
        Ok(())
    }

    /// Start hardware-timed sampling.
    pub async fn start(&mut self) -> PowerResult<()> {
        self.expect_state(SessionState::Configuring, "start streaming")?;
        let rate = self.request.sample_rate;
        let result = match self.handle.as_deref_mut() {
            Some(handle) => handle.start(rate).await.map_err(PowerError::from),
            None => Err(PowerError::Runtime("DAQ handle lost".into())),
        };
        if let Err(err) = result {
            return Err(self.fail(err).await);
        }

        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        self.transition(SessionState::Streaming);
        info!(
            sample_rate = rate,
            chunk_size = self.request.chunk_size,
            target = ?self.request.total_samples(),
            "acquisition streaming"
        );
        Ok(())
    }

    /// Samples per channel the hardware has produced since `start`.
    pub fn samples_due(&self) -> usize {
        self.started
            .map(|t| (t.elapsed().as_secs_f64() * self.request.sample_rate).floor() as usize)
            .unwrap_or(0)
    }

    /// Stream the fixed-duration target, or whatever is due for open-ended captures.
    pub async fn stream<F>(&mut self, cancel: &CancellationFlag, progress: F) -> PowerResult<()>
    where
        F: FnMut(StreamProgress),
    {
        let target = match self.request.total_samples() {
            Some(total) => total,
            None => self.samples_due(),
        };
        self.stream_to(target, cancel, progress).await
    }

    /// Read chunks until `target` samples per channel have been collected.
    ///
    /// Cancellation is checked before every chunk. When set, streaming stops
    /// with the samples collected so far and the outcome is marked cancelled.
    pub async fn stream_to<F>(
        &mut self,
        target: usize,
        cancel: &CancellationFlag,
        mut progress: F,
    ) -> PowerResult<()>
    where
        F: FnMut(StreamProgress),
    {
        self.expect_state(SessionState::Streaming, "read samples")?;
        let target = match self.request.total_samples() {
            Some(total) => target.min(total),
            None => target,
        };

        while self.samples_read < target {
            if cancel.is_cancelled() {
                info!(
                    samples = self.samples_read,
                    target_samples = target,
                    "acquisition cancelled at chunk boundary"
                );
                self.cancelled = true;
                break;
            }
            let n = self.request.chunk_size.min(target - self.samples_read);
            self.read_chunk(n).await?;
            progress(StreamProgress {
                chunks: self.chunks_read,
                samples_per_channel: self.samples_read,
                target: self.request.total_samples(),
            });
        }
        Ok(())
    }

    async fn read_chunk(&mut self, samples: usize) -> PowerResult<()> {
        let timeout = self.request.read_timeout;
        let attempts = self.request.max_chunk_retries.saturating_add(1);
        let chunk = self.chunks_read;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let Some(handle) = self.handle.as_deref_mut() else {
                return Err(self.fail(PowerError::Runtime("DAQ handle lost".into())).await);
            };
            let result = tokio::time::timeout(timeout, handle.read_chunk(samples, timeout)).await;
            match result {
                Ok(Ok(data)) => match self.append(data, samples) {
                    Ok(()) => return Ok(()),
                    Err(msg) => last_error = msg,
                },
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("no data within {timeout:?}"),
            }
            warn!(chunk, attempt, attempts, error = %last_error, "chunk read failed");
        }

        Err(self
            .fail(PowerError::AcquisitionTimeout {
                chunk,
                attempts,
                last_error,
            })
            .await)
    }

    fn append(&mut self, data: Vec<Vec<f64>>, samples: usize) -> Result<(), String> {
        if data.len() != self.raw.len() || data.iter().any(|c| c.len() != samples) {
            return Err(format!(
                "malformed chunk: expected {} channels x {samples} samples",
                self.raw.len()
            ));
        }
        for (buffer, chunk) in self.raw.iter_mut().zip(data) {
            buffer.extend(chunk);
        }
        self.samples_read += samples;
        self.chunks_read += 1;
        Ok(())
    }

    /// Compress, derive currents and statistics, then release the device.
    pub async fn finish(&mut self) -> PowerResult<AcquisitionOutcome> {
        self.expect_state(SessionState::Streaming, "finish acquisition")?;
        self.transition(SessionState::Draining);

        let drained = self.drain();
        self.release().await;
        match drained {
            Ok(series) => {
                self.transition(SessionState::Closed);
                info!(
                    samples = self.samples_read,
                    compressed = series.first().map(|s| s.len()).unwrap_or(0),
                    cancelled = self.cancelled,
                    "acquisition finished"
                );
                Ok(AcquisitionOutcome {
                    series,
                    started_at: self.started_at.unwrap_or_else(Utc::now),
                    sample_rate: self.request.sample_rate,
                    compression_ratio: self.request.compression_ratio,
                    samples_per_channel: self.samples_read,
                    cancelled: self.cancelled,
                })
            }
            Err(err) => {
                self.transition(SessionState::Failed);
                Err(err)
            }
        }
    }

    fn drain(&mut self) -> PowerResult<Vec<CompressedChannelSeries>> {
        let ratio = self.request.compression_ratio;
        let trim = self.request.trim_percent;
        let threshold = self.request.plausibility_threshold_volts;
        let raw = std::mem::take(&mut self.raw);

        self.request
            .channels
            .iter()
            .zip(&self.negotiated)
            .zip(raw)
            .map(|((config, negotiated), samples)| -> PowerResult<CompressedChannelSeries> {
                let shunt = config.shunt_resistance()?;
                let volts = compress_with(&samples, ratio, PartialBlock::Discard)?;
                let amps = volts
                    .iter()
                    .map(|v| shunt_current(*v, shunt, config.scale_compensation))
                    .collect::<PowerResult<Vec<f64>>>()?;

                let magnitude = mean_magnitude(&samples);
                let plausible = is_plausible_shunt_drop(negotiated.mode, magnitude, threshold);
                if !plausible {
                    warn!(
                        channel = %config.id,
                        mode = %negotiated.mode,
                        mean_volts = magnitude,
                        threshold,
                        "reading too large to be a shunt drop; flagged, not corrected"
                    );
                }

                Ok(CompressedChannelSeries {
                    channel: config.id.clone(),
                    label: config.display_name().to_string(),
                    voltage_stats: statistics(&volts, trim, &config.id)?,
                    current_stats: statistics(&amps, trim, &config.id)?,
                    volts,
                    amps,
                    terminal_mode: negotiated.mode,
                    is_plausible_shunt_drop: plausible,
                    raw_len: samples.len(),
                })
            })
            .collect()
    }

    /// Release the device and mark the session failed, unless already terminal.
    pub async fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(state = %self.state, samples = self.samples_read, "acquisition aborted");
        self.release().await;
        self.transition(SessionState::Failed);
    }

    async fn fail(&mut self, err: PowerError) -> PowerError {
        self.release().await;
        self.transition(SessionState::Failed);
        err
    }

    async fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if self.started.is_some() {
                if let Err(err) = handle.stop().await {
                    warn!(error = %err, "DAQ stop failed");
                }
            }
            if let Err(err) = handle.close().await {
                warn!(error = %err, "DAQ close failed");
            }
        }
        self.pass = None;
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        warn!(state = %self.state, "acquisition session dropped with an open DAQ handle");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = handle.close().await {
                        warn!(error = %err, "deferred DAQ close failed");
                    }
                });
            }
            Err(_) => error!("no runtime to close the DAQ handle; it is leaked"),
        }
    }
}

fn statistics(samples: &[f64], trim: f64, channel: &str) -> PowerResult<Option<SampleStatistics>> {
    match SampleStatistics::compute(samples, trim) {
        Ok(stats) => Ok(Some(stats)),
        Err(PowerError::InsufficientSamples { available, required }) => {
            debug!(channel, available, required, "too few samples for statistics");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AcquisitionSettings;
    use power_core::channel::ChannelConfig;
    use power_driver_mock::MockDaq;
    use std::time::Duration;

    fn request(duration_ms: u64) -> AcquisitionRequest {
        AcquisitionRequest::builder(&AcquisitionSettings::default())
            .channels(vec![ChannelConfig::new("ai0", "VBAT", 0.01)])
            .sample_rate(1000.0)
            .compression_ratio(10)
            .chunk_size(100)
            .duration(Duration::from_millis(duration_ms))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let daq = MockDaq::new();
        let mut session = AcquisitionSession::new(request(250), AcquisitionGate::new()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.open(&daq).await.unwrap();
        assert_eq!(session.state(), SessionState::Configuring);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        let mut reports = Vec::new();
        session
            .stream(&CancellationFlag::new(), |p| reports.push(p.samples_per_channel))
            .await
            .unwrap();
        assert_eq!(reports, vec![100, 200, 250]);

        let outcome = session.finish().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(outcome.series[0].len(), 25);
        assert!(daq.all_handles_closed());
    }

    #[tokio::test]
    async fn test_start_before_open_rejected() {
        let mut session = AcquisitionSession::new(request(100), AcquisitionGate::new()).unwrap();
        assert!(matches!(
            session.start().await,
            Err(PowerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_session_busy() {
        let daq = MockDaq::new();
        let gate = AcquisitionGate::new();
        let mut first = AcquisitionSession::new(request(100), gate.clone()).unwrap();
        let mut second = AcquisitionSession::new(request(100), gate.clone()).unwrap();
        first.open(&daq).await.unwrap();
        assert!(matches!(second.open(&daq).await, Err(PowerError::SessionBusy)));
        assert_eq!(second.state(), SessionState::Idle);
        first.abort().await;
        assert!(!gate.is_busy());
        assert!(second.open(&daq).await.is_ok());
        second.abort().await;
    }
}
