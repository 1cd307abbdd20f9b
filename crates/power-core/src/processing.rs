//! Sample processing: shunt current model, block compression and trimmed mean.
//!
//! All functions here are pure. They are applied by the acquisition session
//! once per capture, after streaming has finished.

use serde::{Deserialize, Serialize};

use crate::error::{PowerError, PowerResult};

/// Convert a shunt voltage drop to current.
///
/// `current = (volts / shunt_ohms) * scale_compensation`. A zero, negative or
/// non-finite resistance is a configuration error; it is never replaced by a
/// default.
pub fn shunt_current(volts: f64, shunt_ohms: f64, scale_compensation: Option<f64>) -> PowerResult<f64> {
    if !shunt_ohms.is_finite() || shunt_ohms <= 0.0 {
        return Err(PowerError::config(format!(
            "shunt resistance must be > 0 ohm (got {shunt_ohms})"
        )));
    }
    Ok(volts / shunt_ohms * scale_compensation.unwrap_or(1.0))
}

/// What to do with a trailing group shorter than the compression ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialBlock {
    /// Average whatever the trailing group holds
    #[default]
    Average,
    /// Drop it, so every output spans exactly `ratio` inputs
    Discard,
}

/// Block-average `samples` in groups of `ratio`, averaging a trailing partial group.
pub fn compress(samples: &[f64], ratio: usize) -> PowerResult<Vec<f64>> {
    compress_with(samples, ratio, PartialBlock::Average)
}

/// Block-average `samples` in groups of `ratio`.
pub fn compress_with(samples: &[f64], ratio: usize, partial: PartialBlock) -> PowerResult<Vec<f64>> {
    if ratio == 0 {
        return Err(PowerError::config("compression ratio must be >= 1"));
    }
    if ratio == 1 {
        return Ok(samples.to_vec());
    }

    let compressed = samples
        .chunks(ratio)
        .filter(|block| partial == PartialBlock::Average || block.len() == ratio)
        .map(|block| block.iter().sum::<f64>() / block.len() as f64)
        .collect();
    Ok(compressed)
}

/// Mean after discarding `floor(trim_percent / 100 * n)` values from each tail.
///
/// Fails with [`PowerError::InsufficientSamples`] when the set is empty or
/// holds fewer than `2 * ceil(trim_percent / 100 * n)` values.
pub fn trimmed_mean(samples: &[f64], trim_percent: f64) -> PowerResult<f64> {
    validate_trim_percent(trim_percent)?;

    let n = samples.len();
    let fraction = trim_percent / 100.0 * n as f64;
    let required = (2.0 * fraction.ceil()) as usize;
    if n == 0 || n < required {
        return Err(PowerError::InsufficientSamples {
            available: n,
            required: required.max(1),
        });
    }

    let drop = fraction.floor() as usize;
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let kept = &sorted[drop..n - drop];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Reject trim percentages outside `[0, 50)`.
pub fn validate_trim_percent(trim_percent: f64) -> PowerResult<()> {
    if !(0.0..50.0).contains(&trim_percent) {
        return Err(PowerError::config(format!(
            "trim percent must be in [0, 50) (got {trim_percent})"
        )));
    }
    Ok(())
}

/// Summary statistics for one sample set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStatistics {
    /// Number of samples
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Trimmed mean
    pub trimmed_mean: f64,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
}

impl SampleStatistics {
    /// Compute statistics with the given trim percentage.
    pub fn compute(samples: &[f64], trim_percent: f64) -> PowerResult<Self> {
        let trimmed_mean = trimmed_mean(samples, trim_percent)?;
        let count = samples.len();
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Ok(Self {
            count,
            mean: samples.iter().sum::<f64>() / count as f64,
            trimmed_mean,
            min,
            max,
        })
    }
}
