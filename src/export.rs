//! Result export.
//!
//! Writes a [`RunReport`] to the configured output directory:
//! - CSV (feature `storage_csv`): one row per compressed sample with an
//!   elapsed-time column, then a current and a plausibility column per channel
//! - JSON: the full report including summaries, failure record and log
//!
//! File names carry the scenario name and run start time. Reports of runs
//! that failed or were stopped get an `_INCOMPLETE` suffix; a snapshot
//! published by an `export` step of a healthy run does not.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use power_scenario::RunReport;
use thiserror::Error;
use tracing::info;

use crate::config::ExportConfig;

/// Export failures.
#[derive(Error, Debug)]
pub enum ExportError {
    /// File system failure
    #[error("export I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV encoding failure
    #[cfg(feature = "storage_csv")]
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    /// Requested a format this build does not include
    #[error("Feature '{0}' is not enabled in this build")]
    FeatureNotEnabled(String),
}

/// File stem for a report: `<scenario>_<YYYYmmdd_HHMMSS>[_INCOMPLETE]`.
pub fn file_stem(report: &RunReport) -> String {
    let mut stem = format!(
        "{}_{}",
        report.scenario,
        report.started_at.format("%Y%m%d_%H%M%S")
    );
    if !report.is_complete() {
        stem.push_str("_INCOMPLETE");
    }
    stem
}

/// Write every configured format. Returns the files written.
pub fn export_report(report: &RunReport, config: &ExportConfig) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(&config.output_dir)?;
    let stem = file_stem(report);
    let mut written = Vec::new();

    if config.format.csv() {
        let path = config.output_dir.join(format!("{stem}.csv"));
        write_csv(report, &path)?;
        written.push(path);
    }
    if config.format.json() {
        let path = config.output_dir.join(format!("{stem}.json"));
        write_json(report, &path)?;
        written.push(path);
    }

    info!(
        scenario = %report.scenario,
        rows = report.rows.len(),
        files = written.len(),
        complete = report.is_complete(),
        "report exported"
    );
    Ok(written)
}

/// Write the full report as pretty JSON.
pub fn write_json(report: &RunReport, path: &Path) -> Result<(), ExportError> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

/// Write the rows as CSV.
#[cfg(feature = "storage_csv")]
pub fn write_csv(report: &RunReport, path: &Path) -> Result<(), ExportError> {
    let channels = report.channels();
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![
        "timestamp".to_string(),
        "time_elapsed_s".to_string(),
        "step_index".to_string(),
    ];
    for channel in &channels {
        header.push(format!("{channel}_current_a"));
        header.push(format!("{channel}_plausible"));
    }
    writer.write_record(&header)?;

    for row in &report.rows {
        let mut record = vec![
            row.timestamp.to_rfc3339(),
            format!("{:.6}", row.time_elapsed),
            row.step_index.to_string(),
        ];
        for channel in &channels {
            match row.readings.get(channel) {
                Some(reading) => {
                    record.push(reading.current_amps.to_string());
                    record.push(reading.plausible_shunt_drop.to_string());
                }
                None => {
                    record.push(String::new());
                    record.push(String::new());
                }
            }
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// CSV output is not compiled in.
#[cfg(not(feature = "storage_csv"))]
pub fn write_csv(_report: &RunReport, _path: &Path) -> Result<(), ExportError> {
    Err(ExportError::FeatureNotEnabled("storage_csv".to_string()))
}
