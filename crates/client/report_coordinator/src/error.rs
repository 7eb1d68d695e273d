use kp_upkeep::{EncoderError, UpkeepKey};
use std::fmt;

/// The two transmit log streams reconciled by the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogType {
    Perform,
    StaleReport,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Perform => write!(f, "perform"),
            Self::StaleReport => write!(f, "stale report"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportCoordinatorError {
    #[error("Encoder failed for upkeep key {key}: {source}")]
    Encoder { key: UpkeepKey, source: EncoderError },

    #[error("Failed to fetch {log_type} logs: {source:#}")]
    LogFetch { log_type: LogType, source: anyhow::Error },

    #[error("Invalid report coordinator config: {0}")]
    InvalidConfig(String),
}

pub(crate) trait EncoderResultExt<T> {
    fn for_key(self, key: &UpkeepKey) -> Result<T, ReportCoordinatorError>;
}

impl<T> EncoderResultExt<T> for Result<T, EncoderError> {
    fn for_key(self, key: &UpkeepKey) -> Result<T, ReportCoordinatorError> {
        self.map_err(|source| ReportCoordinatorError::Encoder { key: key.clone(), source })
    }
}
