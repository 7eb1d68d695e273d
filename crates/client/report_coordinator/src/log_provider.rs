use async_trait::async_trait;
use kp_upkeep::{PerformLog, StaleReportLog};

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
/// Source of on-chain transmit logs.
///
/// Each call returns the logs which became available since the previous call, with
/// their current confirmation count. The coordinator makes no assumption on ordering,
/// within or across calls, and tolerates duplicates. Logs which do not yet have enough
/// confirmations are dropped by the coordinator: an implementation must deliver them
/// again on a later call for them to be taken into account.
///
/// Timeouts and retries of the underlying chain queries are the provider's
/// responsibility.
#[async_trait]
pub trait LogProvider: Send + Sync {
    /// Logs emitted when an upkeep was performed.
    async fn perform_logs(&self) -> anyhow::Result<Vec<PerformLog>>;

    /// Logs emitted when a transmitted report did not perform its upkeep.
    async fn stale_report_logs(&self) -> anyhow::Result<Vec<StaleReportLog>>;
}
