//! Operational modes for simulated devices.
//!
//! - **Instant**: no delays; unit tests
//! - **Realistic**: reads take as long as the hardware would (`samples / rate`)

/// Operational mode of a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic
    #[default]
    Instant,
    /// Hardware-like pacing
    Realistic,
}

impl MockMode {
    /// Whether operations should sleep for their simulated duration.
    pub fn is_paced(self) -> bool {
        self == MockMode::Realistic
    }
}
