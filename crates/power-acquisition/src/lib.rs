//! Hardware-timed shunt acquisition.
//!
//! This crate turns a DAQ device handle into validated per-channel current
//! series:
//!
//! - [`ChannelNegotiator`] picks a terminal mode per channel
//! - [`AcquisitionSession`] streams chunked reads, then compresses, derives
//!   current and computes trimmed statistics
//! - [`AcquisitionGate`] keeps at most one session open per device
//!
//! # Example
//!
//! ```rust,ignore
//! let request = AcquisitionRequest::builder(&settings)
//!     .channels(config.channels.clone())
//!     .duration(Duration::from_secs(5))
//!     .build()?;
//! let mut session = AcquisitionSession::new(request, gate.clone())?;
//! session.open(daq.as_ref()).await?;
//! session.start().await?;
//! session.stream(&cancel, |p| tracing::trace!(?p)).await?;
//! let outcome = session.finish().await?;
//! ```

pub mod gate;
pub mod negotiator;
pub mod session;
pub mod settings;

pub use gate::{AcquisitionGate, SessionPass};
pub use negotiator::{is_plausible_shunt_drop, ChannelNegotiator, NegotiatedChannel};
pub use session::{AcquisitionOutcome, AcquisitionSession, SessionState, StreamProgress};
pub use settings::{AcquisitionRequest, AcquisitionRequestBuilder, AcquisitionSettings};
