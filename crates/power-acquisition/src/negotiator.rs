//! Terminal-mode negotiation.
//!
//! Which reference configuration a channel accepts depends on how the shunt
//! is wired and, for the device-default mode, on jumpers software cannot see.
//! The negotiator treats each mode as a probe: configure, and on a rejection
//! move to the next candidate. The first accepted mode wins.

use power_core::capabilities::DaqHandle;
use power_core::channel::{TerminalMode, VoltageRange};
use power_core::error::{DriverError, PowerError, PowerResult};
use tracing::{debug, info, warn};

/// Outcome of negotiating one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedChannel {
    /// Channel id
    pub channel: String,
    /// Accepted mode
    pub mode: TerminalMode,
    /// Modes tried before `mode`, with the device's reason
    pub rejected: Vec<(TerminalMode, DriverError)>,
}

/// Tries terminal modes in priority order.
#[derive(Debug, Clone)]
pub struct ChannelNegotiator {
    order: Vec<TerminalMode>,
    range: VoltageRange,
}

impl ChannelNegotiator {
    /// Negotiator trying `order` with the given input range.
    pub fn new(order: Vec<TerminalMode>, range: VoltageRange) -> Self {
        Self { order, range }
    }

    /// Negotiator with the default priority order.
    pub fn with_default_order(range: VoltageRange) -> Self {
        Self::new(TerminalMode::NEGOTIATION_ORDER.to_vec(), range)
    }

    /// Configure `channel` on `handle` with the first mode the device accepts.
    ///
    /// A rejection (`Configuration` / `InvalidParameter`) moves to the next
    /// candidate. Any other device error aborts negotiation immediately.
    pub async fn negotiate(
        &self,
        handle: &mut dyn DaqHandle,
        channel: &str,
    ) -> PowerResult<NegotiatedChannel> {
        let mut rejected = Vec::new();

        for &mode in &self.order {
            match handle.configure_channel(channel, mode, self.range).await {
                Ok(()) => {
                    if mode.is_ground_referenced() {
                        warn!(
                            channel,
                            mode = %mode,
                            assumption = mode.assumption(),
                            "falling back to ground-referenced input; shunt readings may include the rail voltage"
                        );
                    } else {
                        info!(channel, mode = %mode, tried = rejected.len() + 1, "terminal mode accepted");
                    }
                    return Ok(NegotiatedChannel {
                        channel: channel.to_string(),
                        mode,
                        rejected,
                    });
                }
                Err(err) if err.kind.is_rejection() => {
                    debug!(channel, mode = %mode, reason = %err.message, "terminal mode rejected");
                    rejected.push((mode, err));
                }
                Err(err) => return Err(PowerError::Driver(err)),
            }
        }

        Err(PowerError::ChannelConfiguration {
            channel: channel.to_string(),
            attempts: rejected
                .into_iter()
                .map(|(mode, err)| (mode.to_string(), err.message))
                .collect(),
        })
    }
}

/// Mean absolute value of `samples`; zero for an empty slice.
pub fn mean_magnitude(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|v| v.abs()).sum::<f64>() / samples.len() as f64
}

/// Whether a reading taken in `mode` can be a shunt drop.
///
/// Only the ground-referenced fallback is judged: in the other modes a large
/// value is a real (if surprising) drop.
pub fn is_plausible_shunt_drop(mode: TerminalMode, mean_magnitude_volts: f64, threshold_volts: f64) -> bool {
    !(mode.is_ground_referenced() && mean_magnitude_volts > threshold_volts)
}
