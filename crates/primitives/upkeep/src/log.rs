use crate::key::{BlockKey, UpkeepKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An upkeep was successfully performed on-chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformLog {
    pub key: UpkeepKey,
    /// Block the performing transaction was included in.
    pub transmit_block: BlockKey,
    pub transaction_hash: String,
    pub confirmations: u64,
}

/// Why a report transmitted on-chain did not perform its upkeep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReportReason {
    /// The report was checked against a block that has since been reorganized away.
    Reorged,
    /// A newer report for the same upkeep was performed first.
    Stale,
    InsufficientFunds,
    CancelledUpkeep,
}

impl fmt::Display for StaleReportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reorged => write!(f, "reorged"),
            Self::Stale => write!(f, "stale"),
            Self::InsufficientFunds => write!(f, "insufficient funds"),
            Self::CancelledUpkeep => write!(f, "cancelled upkeep"),
        }
    }
}

/// A report for an upkeep landed on-chain but did not perform it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleReportLog {
    pub key: UpkeepKey,
    pub transmit_block: BlockKey,
    pub transaction_hash: String,
    pub confirmations: u64,
    pub reason: StaleReportReason,
}
