//! Report coordination for a keeper node.
//!
//! Several nodes of an automation network may observe the same upkeep as eligible and
//! race to report it. The [ReportCoordinator] keeps a node from reporting work it already
//! committed to, and from reporting work which another report is about to perform:
//!
//! - [ReportCoordinator::accept] claims an upkeep key once a report for it is produced.
//!   Its upkeep is then *blocked* with no known release point.
//! - [ReportCoordinator::is_pending] tells the scheduler whether a candidate key falls
//!   inside the blocking window of its upkeep.
//! - A background loop polls the [LogProvider] for perform and stale report logs and
//!   moves each blocking window to the release point its transmit log implies. Logs are
//!   only acted upon once they have enough confirmations, and re-observations of the
//!   same log after a reorg go through [IdBlocker::should_update] so that windows
//!   converge whatever the order the logs are seen in.
//! - [ReportCoordinator::is_transmission_confirmed] tells whether a claimed key made it
//!   on-chain, so that the scheduler can decide to report it again.
//!
//! State lives in two [ExpiringCache]s swept by [IntervalCacheCleaner]s: a blocking
//! window is forgotten after the lockout window passes without updates, and an accepted
//! key after the active key retention.

mod blocker;
mod cache;
mod cache_cleaner;
mod config;
mod coordinator;
mod error;
mod log_provider;
mod reconcile;

pub use blocker::IdBlocker;
pub use cache::{CacheExpiration, ExpiringCache};
pub use cache_cleaner::IntervalCacheCleaner;
pub use config::{
    ReportCoordinatorConfig, ReportCoordinatorParams, DEFAULT_ACTIVE_KEY_RETENTION, DEFAULT_CACHE_CLEAN_INTERVAL,
    DEFAULT_LOCKOUT_WINDOW, DEFAULT_POLL_CADENCE,
};
pub use coordinator::ReportCoordinator;
pub use error::{LogType, ReportCoordinatorError};
#[cfg(any(test, feature = "testing"))]
pub use log_provider::MockLogProvider;
pub use log_provider::LogProvider;
pub use reconcile::{LogStats, ReconcileSummary};
