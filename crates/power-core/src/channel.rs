//! Channel calibration data and DAQ terminal configuration types.

use serde::{Deserialize, Serialize};

use crate::error::{PowerError, PowerResult};

/// Electrical terminal/reference configuration of an analog input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalMode {
    /// Measures the difference between a pin pair
    Differential,
    /// Whatever the hardware jumpers select; not queryable from software
    DeviceDefault,
    /// Single-ended against the AI SENSE line (NRSE)
    NonReferencedSingleEnded,
    /// Single-ended against ground (RSE)
    ReferencedSingleEnded,
}

impl TerminalMode {
    /// Negotiation priority, most electrically correct first.
    pub const NEGOTIATION_ORDER: [TerminalMode; 4] = [
        TerminalMode::Differential,
        TerminalMode::DeviceDefault,
        TerminalMode::NonReferencedSingleEnded,
        TerminalMode::ReferencedSingleEnded,
    ];

    /// The assumption a measurement in this mode makes about the wiring.
    pub fn assumption(self) -> &'static str {
        match self {
            TerminalMode::Differential => "shunt is wired across the AI+/AI- pair",
            TerminalMode::DeviceDefault => {
                "hardware jumpers select a reference suited to the shunt wiring"
            }
            TerminalMode::NonReferencedSingleEnded => {
                "shunt low side is tied to AI SENSE"
            }
            TerminalMode::ReferencedSingleEnded => {
                "shunt low side is at ground; reading includes the rail voltage otherwise"
            }
        }
    }

    /// Whether this is the ground-referenced last resort.
    pub fn is_ground_referenced(self) -> bool {
        self == TerminalMode::ReferencedSingleEnded
    }

    /// Short label used in logs and exports.
    pub fn label(self) -> &'static str {
        match self {
            TerminalMode::Differential => "differential",
            TerminalMode::DeviceDefault => "device_default",
            TerminalMode::NonReferencedSingleEnded => "nrse",
            TerminalMode::ReferencedSingleEnded => "rse",
        }
    }
}

impl std::fmt::Display for TerminalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Input voltage range requested for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageRange {
    /// Minimum voltage
    pub min: f64,
    /// Maximum voltage
    pub max: f64,
}

impl Default for VoltageRange {
    fn default() -> Self {
        Self { min: -5.0, max: 5.0 }
    }
}

impl VoltageRange {
    /// Create a new range.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Symmetric bipolar range `±limit`.
    pub fn bipolar(limit: f64) -> Self {
        Self {
            min: -limit,
            max: limit,
        }
    }

    /// Get the span (max - min) of this range.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Check if `volts` is inside the range.
    pub fn contains(&self, volts: f64) -> bool {
        volts >= self.min && volts <= self.max
    }

    /// Reject empty or inverted ranges.
    pub fn validate(&self) -> PowerResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.span() <= 0.0 {
            return Err(PowerError::config(format!(
                "voltage range {:.3}..{:.3} V is empty or inverted",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} to {:.3} V", self.min, self.max)
    }
}

/// Calibration record for one monitored rail.
///
/// Supplied by configuration and read-only during a run. `shunt_ohms` is
/// optional in the file format only so that a missing value can be reported
/// as a configuration error instead of silently defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// DAQ physical channel (e.g. "ai0")
    pub id: String,
    /// Rail name shown to users (e.g. "VBAT", "3V3_MAIN")
    #[serde(default)]
    pub label: String,
    /// Nominal rail voltage
    #[serde(default)]
    pub nominal_voltage: f64,
    /// Shunt resistance in ohms
    #[serde(default)]
    pub shunt_ohms: Option<f64>,
    /// Optional current multiplier for rails referenced to another rail
    #[serde(default)]
    pub scale_compensation: Option<f64>,
    /// Whether the channel is acquired
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ChannelConfig {
    /// Create an enabled channel with a shunt resistance.
    pub fn new(id: impl Into<String>, label: impl Into<String>, shunt_ohms: f64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            nominal_voltage: 0.0,
            shunt_ohms: Some(shunt_ohms),
            scale_compensation: None,
            enabled: true,
        }
    }

    /// Set the nominal rail voltage.
    pub fn with_nominal_voltage(mut self, volts: f64) -> Self {
        self.nominal_voltage = volts;
        self
    }

    /// Set the scale compensation multiplier.
    pub fn with_scale_compensation(mut self, scale: f64) -> Self {
        self.scale_compensation = Some(scale);
        self
    }

    /// Label if set, otherwise the channel id.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    /// Shunt resistance, or a configuration error when missing or not positive.
    pub fn shunt_resistance(&self) -> PowerResult<f64> {
        match self.shunt_ohms {
            Some(ohms) if ohms.is_finite() && ohms > 0.0 => Ok(ohms),
            Some(ohms) => Err(PowerError::config(format!(
                "shunt resistance for channel '{}' must be > 0 ohm (got {ohms})",
                self.id
            ))),
            None => Err(PowerError::config(format!(
                "shunt resistance for channel '{}' is missing",
                self.id
            ))),
        }
    }

    /// Validate the calibration record.
    pub fn validate(&self) -> PowerResult<()> {
        if self.id.trim().is_empty() {
            return Err(PowerError::config("channel id must not be empty"));
        }
        self.shunt_resistance()?;
        if let Some(scale) = self.scale_compensation {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(PowerError::config(format!(
                    "scale compensation for channel '{}' must be > 0 (got {scale})",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
