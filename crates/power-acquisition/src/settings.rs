//! Acquisition settings and per-capture requests.
//!
//! [`AcquisitionSettings`] is the long-lived configuration section (device,
//! rate, compression, tuning thresholds). An [`AcquisitionRequest`] is built
//! from it for every capture, with the channel list and duration of that
//! capture and any per-step overrides.

use std::collections::HashSet;
use std::time::Duration;

use power_core::channel::{ChannelConfig, TerminalMode, VoltageRange};
use power_core::error::{PowerError, PowerResult};
use power_core::processing::validate_trim_percent;
use serde::{Deserialize, Serialize};

/// Acquisition configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// DAQ device name
    pub device_id: String,
    /// Samples per second per channel
    pub sample_rate: f64,
    /// Samples per channel per read
    pub chunk_size: usize,
    /// Raw samples averaged into one compressed sample
    pub compression_ratio: usize,
    /// Input range
    pub voltage_range: VoltageRange,
    /// Percentage trimmed from each tail for statistics
    pub trim_percent: f64,
    /// Mean magnitude above which a ground-referenced reading is not a shunt drop
    pub plausibility_threshold_volts: f64,
    /// Deadline for one chunk read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Extra attempts after a failed chunk read
    pub max_chunk_retries: u32,
    /// Terminal modes tried per channel, in order
    pub terminal_order: Vec<TerminalMode>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            device_id: "Dev1".to_string(),
            sample_rate: 30_000.0,
            chunk_size: 1000,
            compression_ratio: 30,
            voltage_range: VoltageRange::default(),
            trim_percent: 5.0,
            plausibility_threshold_volts: 0.5,
            read_timeout: Duration::from_secs(2),
            max_chunk_retries: 3,
            terminal_order: TerminalMode::NEGOTIATION_ORDER.to_vec(),
        }
    }
}

impl AcquisitionSettings {
    /// Validate the section.
    pub fn validate(&self) -> PowerResult<()> {
        if self.device_id.trim().is_empty() {
            return Err(PowerError::config("acquisition.device_id must not be empty"));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(PowerError::config(format!(
                "acquisition.sample_rate must be > 0 (got {})",
                self.sample_rate
            )));
        }
        if self.chunk_size == 0 {
            return Err(PowerError::config("acquisition.chunk_size must be > 0"));
        }
        if self.compression_ratio == 0 {
            return Err(PowerError::config(
                "acquisition.compression_ratio must be >= 1",
            ));
        }
        validate_trim_percent(self.trim_percent)?;
        if !self.plausibility_threshold_volts.is_finite() || self.plausibility_threshold_volts <= 0.0 {
            return Err(PowerError::config(
                "acquisition.plausibility_threshold_volts must be > 0",
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(PowerError::config("acquisition.read_timeout must be > 0"));
        }
        if self.terminal_order.is_empty() {
            return Err(PowerError::config(
                "acquisition.terminal_order must list at least one mode",
            ));
        }
        self.voltage_range.validate()
    }
}

/// Everything one capture needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// DAQ device name
    pub device_id: String,
    /// Enabled channels, in acquisition order
    pub channels: Vec<ChannelConfig>,
    /// Samples per second per channel
    pub sample_rate: f64,
    /// Fixed capture length; `None` captures until the session is finished
    pub duration: Option<Duration>,
    /// Samples per channel per read
    pub chunk_size: usize,
    /// Input range
    pub voltage_range: VoltageRange,
    /// Raw samples per compressed sample
    pub compression_ratio: usize,
    /// Statistics trim percentage
    pub trim_percent: f64,
    /// Plausibility threshold in volts
    pub plausibility_threshold_volts: f64,
    /// Chunk read deadline
    pub read_timeout: Duration,
    /// Extra attempts per chunk
    pub max_chunk_retries: u32,
    /// Terminal negotiation order
    pub terminal_order: Vec<TerminalMode>,
}

impl AcquisitionRequest {
    /// Start a request from the configured settings.
    pub fn builder(settings: &AcquisitionSettings) -> AcquisitionRequestBuilder {
        AcquisitionRequestBuilder {
            request: AcquisitionRequest {
                device_id: settings.device_id.clone(),
                channels: Vec::new(),
                sample_rate: settings.sample_rate,
                duration: None,
                chunk_size: settings.chunk_size,
                voltage_range: settings.voltage_range,
                compression_ratio: settings.compression_ratio,
                trim_percent: settings.trim_percent,
                plausibility_threshold_volts: settings.plausibility_threshold_volts,
                read_timeout: settings.read_timeout,
                max_chunk_retries: settings.max_chunk_retries,
                terminal_order: settings.terminal_order.clone(),
            },
        }
    }

    /// Samples per channel for a fixed-duration capture.
    pub fn total_samples(&self) -> Option<usize> {
        self.duration
            .map(|d| (d.as_secs_f64() * self.sample_rate).round() as usize)
    }

    /// Validate the request, including every channel's calibration.
    pub fn validate(&self) -> PowerResult<()> {
        if self.channels.is_empty() {
            return Err(PowerError::config("acquisition needs at least one enabled channel"));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !seen.insert(channel.id.as_str()) {
                return Err(PowerError::config(format!(
                    "channel '{}' requested twice",
                    channel.id
                )));
            }
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(PowerError::config(format!(
                "sample rate must be > 0 (got {})",
                self.sample_rate
            )));
        }
        if let Some(duration) = self.duration {
            if duration.is_zero() {
                return Err(PowerError::config("capture duration must be > 0"));
            }
        }
        if self.chunk_size == 0 {
            return Err(PowerError::config("chunk size must be > 0"));
        }
        if self.compression_ratio == 0 {
            return Err(PowerError::config("compression ratio must be >= 1"));
        }
        validate_trim_percent(self.trim_percent)?;
        if self.terminal_order.is_empty() {
            return Err(PowerError::config("no terminal modes to negotiate"));
        }
        self.voltage_range.validate()
    }
}

/// Builder for [`AcquisitionRequest`].
#[derive(Debug, Clone)]
pub struct AcquisitionRequestBuilder {
    request: AcquisitionRequest,
}

impl AcquisitionRequestBuilder {
    /// Set the channels. Disabled channels are skipped.
    pub fn channels(mut self, channels: impl IntoIterator<Item = ChannelConfig>) -> Self {
        self.request.channels = channels
            .into_iter()
            .filter(|c| {
                if !c.enabled {
                    tracing::debug!(channel = %c.id, "skipping disabled channel");
                }
                c.enabled
            })
            .collect();
        self
    }

    /// Capture for a fixed duration.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.request.duration = Some(duration);
        self
    }

    /// Override the sample rate.
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.request.sample_rate = rate;
        self
    }

    /// Override the compression ratio.
    pub fn compression_ratio(mut self, ratio: usize) -> Self {
        self.request.compression_ratio = ratio;
        self
    }

    /// Override the chunk size.
    pub fn chunk_size(mut self, samples: usize) -> Self {
        self.request.chunk_size = samples;
        self
    }

    /// Override the voltage range.
    pub fn voltage_range(mut self, range: VoltageRange) -> Self {
        self.request.voltage_range = range;
        self
    }

    /// Validate and build.
    pub fn build(self) -> PowerResult<AcquisitionRequest> {
        self.request.validate()?;
        Ok(self.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<ChannelConfig> {
        vec![
            ChannelConfig::new("ai0", "VBAT", 0.01),
            ChannelConfig::new("ai1", "3V3_MAIN", 0.01),
        ]
    }

    #[test]
    fn test_default_settings_valid() {
        assert!(AcquisitionSettings::default().validate().is_ok());
    }

    #[test]
    fn test_total_samples() {
        let request = AcquisitionRequest::builder(&AcquisitionSettings::default())
            .channels(channels())
            .sample_rate(1000.0)
            .duration(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(request.total_samples(), Some(5000));
    }

    #[test]
    fn test_open_ended_request() {
        let request = AcquisitionRequest::builder(&AcquisitionSettings::default())
            .channels(channels())
            .build()
            .unwrap();
        assert_eq!(request.total_samples(), None);
    }

    #[test]
    fn test_disabled_channels_skipped() {
        let mut disabled = ChannelConfig::new("ai2", "VDD_GPU", 0.0);
        disabled.enabled = false;
        let mut list = channels();
        list.push(disabled);
        let request = AcquisitionRequest::builder(&AcquisitionSettings::default())
            .channels(list)
            .build()
            .unwrap();
        assert_eq!(request.channels.len(), 2);
    }

    #[test]
    fn test_zero_shunt_rejected_before_hardware() {
        let result = AcquisitionRequest::builder(&AcquisitionSettings::default())
            .channels(vec![ChannelConfig::new("ai0", "VBAT", 0.0)])
            .build();
        assert!(matches!(result, Err(PowerError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let result = AcquisitionRequest::builder(&AcquisitionSettings::default())
            .channels(vec![
                ChannelConfig::new("ai0", "A", 0.01),
                ChannelConfig::new("ai0", "B", 0.01),
            ])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: AcquisitionSettings = serde_json::from_str(
            r#"{"sample_rate": 1000.0, "read_timeout": "500ms", "terminal_order": ["differential", "referenced_single_ended"]}"#,
        )
        .unwrap();
        assert_eq!(settings.sample_rate, 1000.0);
        assert_eq!(settings.read_timeout, Duration::from_millis(500));
        assert_eq!(settings.terminal_order.len(), 2);
        assert_eq!(settings.compression_ratio, 30);
    }
}
