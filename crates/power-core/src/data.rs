//! Acquisition results: compressed series, result rows and channel summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::TerminalMode;
use crate::processing::SampleStatistics;

/// Per-channel output of one acquisition.
///
/// `volts` and `amps` have the same length, one entry per compression block.
/// The plausibility flag is advisory; the samples are never corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedChannelSeries {
    /// DAQ channel id
    pub channel: String,
    /// Rail label
    pub label: String,
    /// Block-averaged shunt voltage
    pub volts: Vec<f64>,
    /// Current derived from `volts`
    pub amps: Vec<f64>,
    /// Terminal mode the DAQ accepted
    pub terminal_mode: TerminalMode,
    /// False when a ground-referenced reading is too large to be a shunt drop
    pub is_plausible_shunt_drop: bool,
    /// Raw samples captured before compression
    pub raw_len: usize,
    /// Trimmed statistics of the compressed voltage, when computable
    pub voltage_stats: Option<SampleStatistics>,
    /// Trimmed statistics of the derived current, when computable
    pub current_stats: Option<SampleStatistics>,
}

impl CompressedChannelSeries {
    /// Number of compressed samples.
    pub fn len(&self) -> usize {
        self.amps.len()
    }

    /// True if no complete compression block was captured.
    pub fn is_empty(&self) -> bool {
        self.amps.is_empty()
    }
}

/// One channel's value in a [`ResultRow`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// Current in amps
    pub current_amps: f64,
    /// Copied from the series so a suspect value is visible on every row
    pub plausible_shunt_drop: bool,
}

/// A timestamped sample across all channels of one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Wall-clock time of the block start
    pub timestamp: DateTime<Utc>,
    /// Seconds since the acquisition started
    pub time_elapsed: f64,
    /// Scenario step that produced the row
    pub step_index: usize,
    /// Readings keyed by channel id
    pub readings: BTreeMap<String, ChannelReading>,
}

impl ResultRow {
    /// Expand compressed series into rows in sample order.
    ///
    /// Row `k` sits at `k * compression_ratio / sample_rate` seconds. When
    /// series lengths differ, only the common prefix is expanded.
    pub fn expand(
        series: &[CompressedChannelSeries],
        started_at: DateTime<Utc>,
        sample_rate: f64,
        compression_ratio: usize,
        step_index: usize,
    ) -> Vec<ResultRow> {
        let rows = series.iter().map(|s| s.len()).min().unwrap_or(0);
        let block_seconds = compression_ratio as f64 / sample_rate;

        (0..rows)
            .map(|k| {
                let time_elapsed = k as f64 * block_seconds;
                let readings = series
                    .iter()
                    .map(|s| {
                        (
                            s.channel.clone(),
                            ChannelReading {
                                current_amps: s.amps[k],
                                plausible_shunt_drop: s.is_plausible_shunt_drop,
                            },
                        )
                    })
                    .collect();
                ResultRow {
                    timestamp: started_at
                        + chrono::Duration::microseconds((time_elapsed * 1e6).round() as i64),
                    time_elapsed,
                    step_index,
                    readings,
                }
            })
            .collect()
    }
}

/// Summary of one channel in one acquisition, for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    /// Scenario step that ran the acquisition
    pub step_index: usize,
    /// DAQ channel id
    pub channel: String,
    /// Rail label
    pub label: String,
    /// Resolved terminal mode
    pub terminal_mode: TerminalMode,
    /// Plausibility flag
    pub is_plausible_shunt_drop: bool,
    /// Raw sample count
    pub raw_samples: usize,
    /// Compressed sample count
    pub compressed_samples: usize,
    /// Trimmed mean shunt voltage
    pub trimmed_mean_volts: Option<f64>,
    /// Trimmed mean current
    pub trimmed_mean_amps: Option<f64>,
    /// Minimum current
    pub min_amps: Option<f64>,
    /// Maximum current
    pub max_amps: Option<f64>,
}

impl ChannelSummary {
    /// Summarize a series.
    pub fn from_series(series: &CompressedChannelSeries, step_index: usize) -> Self {
        Self {
            step_index,
            channel: series.channel.clone(),
            label: series.label.clone(),
            terminal_mode: series.terminal_mode,
            is_plausible_shunt_drop: series.is_plausible_shunt_drop,
            raw_samples: series.raw_len,
            compressed_samples: series.len(),
            trimmed_mean_volts: series.voltage_stats.map(|s| s.trimmed_mean),
            trimmed_mean_amps: series.current_stats.map(|s| s.trimmed_mean),
            min_amps: series.current_stats.map(|s| s.min),
            max_amps: series.current_stats.map(|s| s.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(channel: &str, amps: Vec<f64>, plausible: bool) -> CompressedChannelSeries {
        CompressedChannelSeries {
            channel: channel.into(),
            label: channel.to_uppercase(),
            volts: amps.iter().map(|a| a * 0.01).collect(),
            amps,
            terminal_mode: TerminalMode::Differential,
            is_plausible_shunt_drop: plausible,
            raw_len: 0,
            voltage_stats: None,
            current_stats: None,
        }
    }

    #[test]
    fn test_expand_rows() {
        let start = Utc::now();
        let rows = ResultRow::expand(
            &[series("a", vec![1.0, 2.0, 3.0], true), series("b", vec![4.0, 5.0, 6.0], false)],
            start,
            1000.0,
            50,
            2,
        );
        assert_eq!(rows.len(), 3);
        assert!((rows[2].time_elapsed - 0.1).abs() < 1e-12);
        assert_eq!(rows[1].step_index, 2);
        assert_eq!(rows[1].readings["a"].current_amps, 2.0);
        assert!(!rows[0].readings["b"].plausible_shunt_drop);
        assert!(rows[1].timestamp > rows[0].timestamp);
    }

    #[test]
    fn test_expand_uses_common_prefix() {
        let rows = ResultRow::expand(
            &[series("a", vec![1.0, 2.0], true), series("b", vec![4.0], true)],
            Utc::now(),
            100.0,
            10,
            0,
        );
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_summary_without_stats() {
        let summary = ChannelSummary::from_series(&series("a", vec![], true), 1);
        assert_eq!(summary.compressed_samples, 0);
        assert!(summary.trimmed_mean_amps.is_none());
    }
}
