//! Single-session exclusivity for the DAQ device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use power_core::error::{PowerError, PowerResult};

/// Shared guard allowing one open acquisition session at a time.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionGate {
    busy: Arc<AtomicBool>,
}

impl AcquisitionGate {
    /// Create an idle gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device; fails with [`PowerError::SessionBusy`] if claimed.
    pub fn try_acquire(&self) -> PowerResult<SessionPass> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PowerError::SessionBusy)?;
        Ok(SessionPass {
            busy: Arc::clone(&self.busy),
        })
    }

    /// Whether a session currently holds the device.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Claim on the device, released on drop.
#[derive(Debug)]
pub struct SessionPass {
    busy: Arc<AtomicBool>,
}

impl Drop for SessionPass {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
