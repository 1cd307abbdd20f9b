//! Bench configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/handset_power.toml` by default)
//! 2. environment variables prefixed `HANDSET_POWER_`, with `__` separating
//!    nested keys
//!
//! # Example
//! ```no_run
//! use handset_power::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! config.validate()?;
//! println!("{} channels", config.channels.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use power_acquisition::AcquisitionSettings;
use power_core::channel::ChannelConfig;
use power_core::error::{PowerError, PowerResult};
use power_scenario::{EngineSettings, RunConfig, ScenarioDefinition, ScenarioRegistry, StepLibrary};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/handset_power.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HANDSET_POWER_";

/// Top-level bench configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition defaults
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Scenario engine tuning
    #[serde(default)]
    pub engine: EngineSettings,
    /// Calibrated measurement channels
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Scenarios in addition to the built-ins
    #[serde(default)]
    pub scenarios: Vec<ScenarioDefinition>,
    /// Handset command bridge
    #[serde(default)]
    pub device_control: DeviceControlConfig,
    /// Result export
    #[serde(default)]
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Handset Power".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Device-control transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// `adb shell`
    Adb,
    /// Simulated handset
    Mock,
}

/// Device-control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceControlConfig {
    /// Transport
    pub backend: DeviceBackend,
    /// Handset serial, when more than one is attached
    pub serial: Option<String>,
    /// adb executable
    pub adb_path: PathBuf,
}

impl Default for DeviceControlConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Adb,
            serial: None,
            adb_path: PathBuf::from("adb"),
        }
    }
}

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Row table
    Csv,
    /// Full report
    Json,
    /// Both files
    Both,
}

impl ExportFormat {
    /// Whether a CSV file is written.
    pub fn csv(self) -> bool {
        matches!(self, ExportFormat::Csv | ExportFormat::Both)
    }

    /// Whether a JSON file is written.
    pub fn json(self) -> bool {
        matches!(self, ExportFormat::Json | ExportFormat::Both)
    }
}

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output directory for result files
    pub output_dir: PathBuf,
    /// Files to write
    pub format: ExportFormat,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            format: ExportFormat::Both,
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl BenchConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Example: `HANDSET_POWER_ACQUISITION__SAMPLE_RATE=20000`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PowerResult<()> {
        if !VALID_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PowerError::config(format!(
                "invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if !ids.insert(channel.id.as_str()) {
                return Err(PowerError::config(format!(
                    "duplicate channel id: {}",
                    channel.id
                )));
            }
        }

        self.run_config().validate()?;
        self.registry(&StepLibrary::standard()).map(|_| ())
    }

    /// Engine, acquisition and channel sections as a run configuration.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            engine: self.engine.clone(),
            acquisition: self.acquisition.clone(),
            channels: self.channels.clone(),
        }
    }

    /// Built-in scenarios plus the configured ones.
    ///
    /// A configured scenario with a built-in's name replaces it.
    pub fn registry(&self, library: &StepLibrary) -> PowerResult<ScenarioRegistry> {
        let mut registry = ScenarioRegistry::with_builtins(library)?;
        for scenario in &self.scenarios {
            registry.register(scenario.clone(), library)?;
        }
        Ok(registry)
    }

    /// Enabled channels.
    pub fn enabled_channels(&self) -> Vec<&ChannelConfig> {
        self.channels.iter().filter(|c| c.enabled).collect()
    }
}
