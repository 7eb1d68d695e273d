//! Keeper upkeep primitives.
//!
//! An upkeep is a recurring unit of work that is checked off-chain and performed
//! on-chain. Every observation of an upkeep at a given chain height is identified by an
//! [UpkeepKey], a composite of a [BlockKey] (the height the upkeep was checked at) and an
//! [UpkeepIdentifier] (which upkeep). Keys are opaque to the rest of the node: the only
//! way to take them apart is through an [Encoder].
//!
//! This crate also defines the transmit log records ([PerformLog], [StaleReportLog])
//! observed on-chain once a report lands, or fails to.

mod encoder;
mod key;
mod log;

pub use encoder::{BasicEncoder, Encoder, EncoderError, UPKEEP_KEY_SEPARATOR};
#[cfg(any(test, feature = "testing"))]
pub use encoder::MockEncoder;
pub use key::{BlockKey, UpkeepIdentifier, UpkeepKey};
pub use log::{PerformLog, StaleReportLog, StaleReportReason};
