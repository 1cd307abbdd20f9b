//! # Handset Power
//!
//! Application shell for handset power characterization. The measurement
//! core lives in the workspace crates:
//!
//! - **`power-core`**: error taxonomy, collaborator traits, channel and
//!   terminal types, compression, trimmed mean and shunt current model
//! - **`power-acquisition`**: terminal-mode negotiation and the chunked,
//!   cancellable acquisition session
//! - **`power-scenario`**: step executors, scenario registry and the
//!   background scenario engine
//! - **`power-driver-mock`**: simulated DAQ, supply and handset
//!
//! This crate adds what a bench deployment needs around that core:
//!
//! - **`config`**: Figment configuration (TOML plus `HANDSET_POWER_` env vars)
//! - **`logging`**: `tracing-subscriber` setup
//! - **`export`**: CSV and JSON result files
//! - **`adb`**: `adb shell` device-control transport
//! - **`bench`**: collaborator assembly for the CLI

pub mod adb;
pub mod bench;
pub mod config;
pub mod export;
pub mod logging;

pub use power_acquisition;
pub use power_core;
pub use power_scenario;
