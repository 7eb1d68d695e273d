//! Reconciliation of accepted upkeep keys against on-chain transmit logs.
//!
//! A pass drains both log streams of the [LogProvider](crate::LogProvider). A log with
//! enough confirmations marks its accepted key as confirmed and moves the blocking
//! window of its upkeep to the release point the log implies:
//!
//! - a perform log releases the upkeep after its transmit block.
//! - a stale report log releases it one block after the block it was checked at.
//!
//! A log for a key which is already confirmed is a re-observation, typically after a
//! reorg moved the transaction to another block. It only updates the window if the
//! window still refers to the same check block, and only through the usual tie-break.

use crate::blocker::IdBlocker;
use crate::cache::CacheExpiration;
use crate::coordinator::{CoordinatorState, ReportCoordinator};
use crate::error::{EncoderResultExt, LogType, ReportCoordinatorError};
use kp_upkeep::{UpkeepIdentifier, UpkeepKey};
use kp_utils::service::ServiceContext;
use kp_utils::{stopwatch_end, PerfStopwatch};
use std::sync::Arc;

/// What a pass did with the logs of one type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogStats {
    pub received: usize,
    /// Logs without enough confirmations yet.
    pub under_confirmed: usize,
    /// Logs whose key could not be decoded.
    pub undecodable: usize,
    /// Accepted keys confirmed by this pass.
    pub confirmed: usize,
    /// Blocking windows moved by a re-observed log.
    pub reorg_updates: usize,
    /// Logs for keys this node never accepted, or re-observations with nothing to update.
    pub ignored: usize,
}

/// Outcome of a single reconciliation pass, per log type.
#[derive(Debug)]
pub struct ReconcileSummary {
    pub perform: Result<LogStats, ReportCoordinatorError>,
    pub stale_report: Result<LogStats, ReportCoordinatorError>,
}

impl ReconcileSummary {
    fn is_idle(&self) -> bool {
        [&self.perform, &self.stale_report].into_iter().all(|stats| stats.as_ref().is_ok_and(|s| s.received == 0))
    }
}

impl ReportCoordinator {
    /// Runs a single reconciliation pass, independently of the background loop.
    pub async fn reconcile_once(&self) -> ReconcileSummary {
        self.state().reconcile_once().await
    }
}

impl CoordinatorState {
    pub(crate) async fn reconcile_once(&self) -> ReconcileSummary {
        let perform = self.reconcile_perform_logs().await;
        if let Err(e) = &perform {
            tracing::warn!("{e}");
        }

        let stale_report = self.reconcile_stale_report_logs().await;
        if let Err(e) = &stale_report {
            tracing::warn!("{e}");
        }

        ReconcileSummary { perform, stale_report }
    }

    async fn reconcile_perform_logs(&self) -> Result<LogStats, ReportCoordinatorError> {
        let logs = self
            .logs
            .perform_logs()
            .await
            .map_err(|source| ReportCoordinatorError::LogFetch { log_type: LogType::Perform, source })?;

        let mut stats = LogStats { received: logs.len(), ..Default::default() };
        for log in &logs {
            if log.confirmations < self.config.min_confirmations {
                stats.under_confirmed += 1;
                continue;
            }

            let (check_block, id) = match self.split(&log.key) {
                Ok(split) => split,
                Err(e) => {
                    tracing::warn!(tx = %log.transaction_hash, "Skipping perform log: {e}");
                    stats.undecodable += 1;
                    continue;
                }
            };

            tracing::trace!(key = %log.key, tx = %log.transaction_hash, "Perform log at block {}", log.transmit_block);
            let window = IdBlocker { check_block, transmit_block: log.transmit_block };
            self.apply_transmit(&log.key, &id, window, &mut stats);
        }

        Ok(stats)
    }

    async fn reconcile_stale_report_logs(&self) -> Result<LogStats, ReportCoordinatorError> {
        let logs = self
            .logs
            .stale_report_logs()
            .await
            .map_err(|source| ReportCoordinatorError::LogFetch { log_type: LogType::StaleReport, source })?;

        let mut stats = LogStats { received: logs.len(), ..Default::default() };
        for log in &logs {
            if log.confirmations < self.config.min_confirmations {
                stats.under_confirmed += 1;
                continue;
            }

            let decoded = self.split(&log.key).and_then(|(check_block, id)| {
                let next = self.encoder.increment(&check_block).for_key(&log.key)?;
                Ok((IdBlocker { check_block, transmit_block: next }, id))
            });
            let (window, id) = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(tx = %log.transaction_hash, "Skipping stale report log: {e}");
                    stats.undecodable += 1;
                    continue;
                }
            };

            tracing::trace!(key = %log.key, tx = %log.transaction_hash, reason = %log.reason, "Stale report log");
            self.apply_transmit(&log.key, &id, window, &mut stats);
        }

        Ok(stats)
    }

    fn apply_transmit(&self, key: &UpkeepKey, id: &UpkeepIdentifier, window: IdBlocker, stats: &mut LogStats) {
        match self.active_keys.get(key) {
            None => stats.ignored += 1,
            Some(false) => {
                self.active_keys.set(key.clone(), true, CacheExpiration::Default);
                self.update_id_block(id, window);
                tracing::debug!(key = %key, "Transmission confirmed, upkeep released after block {}", window.transmit_block);
                stats.confirmed += 1;
            }
            Some(true) => {
                let reobserved = self.id_blocks.get(id).is_some_and(|current| {
                    current.check_block == window.check_block && current.transmit_block != window.transmit_block
                });

                if reobserved && self.update_id_block(id, window) {
                    tracing::debug!(key = %key, "Transmission re-observed, upkeep now released after block {}", window.transmit_block);
                    stats.reorg_updates += 1;
                } else {
                    stats.ignored += 1;
                }
            }
        }
    }
}

/// Runs reconciliation passes at the configured cadence until `ctx` is cancelled.
///
/// The time a pass takes is deducted from the following sleep. A pass slower than the
/// cadence is followed immediately by the next one.
pub(crate) async fn reconcile_loop(state: Arc<CoordinatorState>, ctx: ServiceContext) {
    let cadence = state.config.poll_cadence;
    tracing::debug!("Reconciliation loop started, polling every {cadence:?}");

    while !ctx.is_cancelled() {
        let stopwatch = PerfStopwatch::new();
        let Some(summary) = ctx.run_until_cancelled(state.reconcile_once()).await else {
            break;
        };

        if !summary.is_idle() {
            tracing::debug!("Reconciled perform logs {:?}, stale report logs {:?}", summary.perform, summary.stale_report);
            stopwatch_end!(stopwatch, "Reconciliation pass took {:?}");
        }

        let elapsed = stopwatch.elapsed();
        let Some(remaining) = cadence.checked_sub(elapsed) else {
            tracing::warn!("Reconciliation pass took {elapsed:?}, exceeding the poll cadence of {cadence:?}");
            continue;
        };

        if ctx.run_until_cancelled(tokio::time::sleep(remaining)).await.is_none() {
            break;
        }
    }

    tracing::debug!("Reconciliation loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportCoordinatorConfig;
    use crate::log_provider::{LogProvider, MockLogProvider};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use kp_upkeep::{BasicEncoder, BlockKey, PerformLog, StaleReportLog, StaleReportReason};
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    const MIN_CONFIRMATIONS: u64 = 3;

    fn key(s: &str) -> UpkeepKey {
        UpkeepKey::from(s)
    }

    fn perform_log(key: &str, transmit_block: u64, confirmations: u64) -> PerformLog {
        PerformLog {
            key: key.into(),
            transmit_block: BlockKey::new(transmit_block),
            transaction_hash: format!("0x{transmit_block:x}"),
            confirmations,
        }
    }

    fn stale_log(key: &str, transmit_block: u64, confirmations: u64) -> StaleReportLog {
        StaleReportLog {
            key: key.into(),
            transmit_block: BlockKey::new(transmit_block),
            transaction_hash: format!("0x{transmit_block:x}"),
            confirmations,
            reason: StaleReportReason::Stale,
        }
    }

    fn window(check: u64, transmit: u64) -> Option<IdBlocker> {
        Some(IdBlocker { check_block: BlockKey::new(check), transmit_block: BlockKey::new(transmit) })
    }

    fn coordinator(logs: MockLogProvider) -> ReportCoordinator {
        ReportCoordinator::new(Arc::new(logs), Arc::new(BasicEncoder), ReportCoordinatorConfig::new(MIN_CONFIRMATIONS))
            .unwrap()
    }

    fn serving(perform: Vec<PerformLog>, stale: Vec<StaleReportLog>) -> ReportCoordinator {
        let mut logs = MockLogProvider::new();
        logs.expect_perform_logs().returning(move || Ok(perform.clone()));
        logs.expect_stale_report_logs().returning(move || Ok(stale.clone()));
        coordinator(logs)
    }

    #[tokio::test]
    async fn perform_log_releases_the_upkeep_after_transmit() {
        let coordinator = serving(vec![perform_log("100|A", 105, 5)], vec![]);

        coordinator.accept(&key("100|A")).unwrap();
        assert!(coordinator.is_pending(&key("100|A")).unwrap());
        assert!(!coordinator.is_pending(&key("101|B")).unwrap());

        let summary = coordinator.reconcile_once().await;
        assert_matches!(summary.perform, Ok(LogStats { received: 1, confirmed: 1, .. }));

        assert!(coordinator.is_transmission_confirmed(&key("100|A")));
        assert_eq!(coordinator.blocking_window(&"A".into()), window(100, 105));
        assert!(coordinator.is_pending(&key("103|A")).unwrap());
        assert!(coordinator.is_pending(&key("105|A")).unwrap());
        assert!(!coordinator.is_pending(&key("106|A")).unwrap());
    }

    #[tokio::test]
    async fn stale_report_log_releases_the_upkeep_after_check() {
        let coordinator = serving(vec![], vec![stale_log("50|C", 53, 4)]);
        coordinator.accept(&key("50|C")).unwrap();

        let summary = coordinator.reconcile_once().await;
        assert_matches!(summary.stale_report, Ok(LogStats { received: 1, confirmed: 1, .. }));

        assert!(coordinator.is_transmission_confirmed(&key("50|C")));
        assert_eq!(coordinator.blocking_window(&"C".into()), window(50, 51));
        // The release block itself is still within the window.
        assert!(coordinator.is_pending(&key("50|C")).unwrap());
        assert!(coordinator.is_pending(&key("51|C")).unwrap());
        assert!(!coordinator.is_pending(&key("52|C")).unwrap());
    }

    #[rstest]
    #[case::perform_log(vec![perform_log("100|A", 105, MIN_CONFIRMATIONS)], vec![], window(100, 105))]
    #[case::stale_report_log(vec![], vec![stale_log("100|A", 105, MIN_CONFIRMATIONS)], window(100, 101))]
    #[tokio::test]
    async fn logs_at_exactly_min_confirmations_are_applied(
        #[case] perform: Vec<PerformLog>,
        #[case] stale: Vec<StaleReportLog>,
        #[case] expected: Option<IdBlocker>,
    ) {
        let coordinator = serving(perform, stale);
        coordinator.accept(&key("100|A")).unwrap();

        let summary = coordinator.reconcile_once().await;
        let confirmed = [summary.perform, summary.stale_report].map(|stats| stats.unwrap().confirmed);
        assert_eq!(confirmed.iter().sum::<usize>(), 1);

        assert!(coordinator.is_transmission_confirmed(&key("100|A")));
        assert_eq!(coordinator.blocking_window(&"A".into()), expected);
    }

    #[tokio::test]
    async fn under_confirmed_logs_change_nothing() {
        let coordinator =
            serving(vec![perform_log("100|A", 105, MIN_CONFIRMATIONS - 1)], vec![stale_log("100|A", 104, 0)]);
        coordinator.accept(&key("100|A")).unwrap();
        let before = coordinator.blocking_window(&"A".into());

        let summary = coordinator.reconcile_once().await;
        assert_matches!(summary.perform, Ok(LogStats { under_confirmed: 1, confirmed: 0, .. }));
        assert_matches!(summary.stale_report, Ok(LogStats { under_confirmed: 1, confirmed: 0, .. }));

        assert!(!coordinator.is_transmission_confirmed(&key("100|A")));
        assert_eq!(coordinator.blocking_window(&"A".into()), before);
    }

    #[tokio::test]
    async fn logs_for_keys_never_accepted_are_ignored() {
        let coordinator = serving(vec![perform_log("100|A", 105, 5)], vec![stale_log("7|B", 9, 5)]);

        let summary = coordinator.reconcile_once().await;
        assert_matches!(summary.perform, Ok(LogStats { ignored: 1, .. }));
        assert_matches!(summary.stale_report, Ok(LogStats { ignored: 1, .. }));

        assert_eq!(coordinator.blocking_window(&"A".into()), None);
        assert_eq!(coordinator.blocking_window(&"B".into()), None);
        assert!(coordinator.is_transmission_confirmed(&key("100|A")));
    }

    #[rstest]
    #[case::later_block_is_kept(&[105, 107], window(100, 107))]
    #[case::earlier_block_is_rejected(&[107, 105], window(100, 107))]
    #[case::duplicates(&[105, 105, 105], window(100, 105))]
    #[case::back_and_forth(&[106, 104, 108, 103], window(100, 108))]
    #[tokio::test]
    async fn reorged_perform_logs_keep_the_latest_transmit(#[case] transmits: &[u64], #[case] expected: Option<IdBlocker>) {
        let mut logs = MockLogProvider::new();
        let mut seq = mockall::Sequence::new();
        for &transmit in transmits {
            logs.expect_perform_logs()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move || Ok(vec![perform_log("100|A", transmit, 5)]));
        }
        logs.expect_stale_report_logs().returning(|| Ok(vec![]));
        let coordinator = coordinator(logs);

        coordinator.accept(&key("100|A")).unwrap();
        for _ in transmits {
            coordinator.reconcile_once().await;
        }

        assert_eq!(coordinator.blocking_window(&"A".into()), expected);
        assert!(coordinator.is_transmission_confirmed(&key("100|A")));
    }

    #[tokio::test]
    async fn re_observation_needs_a_matching_check_block() {
        let mut logs = MockLogProvider::new();
        let mut seq = mockall::Sequence::new();
        logs.expect_perform_logs().times(1).in_sequence(&mut seq).returning(|| Ok(vec![perform_log("100|A", 105, 5)]));
        logs.expect_perform_logs().times(1).in_sequence(&mut seq).returning(|| Ok(vec![perform_log("100|A", 112, 5)]));
        logs.expect_stale_report_logs().returning(|| Ok(vec![]));
        let coordinator = coordinator(logs);

        coordinator.accept(&key("100|A")).unwrap();
        coordinator.reconcile_once().await;

        // A newer check moved the window on before the re-observation came in.
        coordinator.accept(&key("110|A")).unwrap();
        let summary = coordinator.reconcile_once().await;

        assert_matches!(summary.perform, Ok(LogStats { ignored: 1, reorg_updates: 0, .. }));
        assert_eq!(coordinator.blocking_window(&"A".into()), Some(IdBlocker::indefinite(BlockKey::new(110))));
    }

    #[tokio::test]
    async fn undecodable_logs_are_skipped() {
        let coordinator = serving(
            vec![perform_log("garbage", 105, 5), perform_log("100|A", 105, 5)],
            vec![stale_log(&format!("{}|D", u64::MAX), 5, 5)],
        );
        coordinator.accept(&key("100|A")).unwrap();
        coordinator.accept(&key(&format!("{}|D", u64::MAX))).unwrap();

        let summary = coordinator.reconcile_once().await;
        assert_matches!(summary.perform, Ok(LogStats { received: 2, undecodable: 1, confirmed: 1, .. }));
        // The check block cannot be incremented.
        assert_matches!(summary.stale_report, Ok(LogStats { undecodable: 1, confirmed: 0, .. }));

        assert!(coordinator.is_transmission_confirmed(&key("100|A")));
        assert!(!coordinator.is_transmission_confirmed(&key(&format!("{}|D", u64::MAX))));
    }

    #[tokio::test]
    #[traced_test]
    async fn fetch_errors_abandon_only_their_log_type() {
        let mut logs = MockLogProvider::new();
        logs.expect_perform_logs().returning(|| Err(anyhow::anyhow!("connection reset")));
        logs.expect_stale_report_logs().returning(|| Ok(vec![stale_log("50|C", 53, 4)]));
        let coordinator = coordinator(logs);
        coordinator.accept(&key("50|C")).unwrap();

        let summary = coordinator.reconcile_once().await;

        assert_matches!(
            summary.perform,
            Err(ReportCoordinatorError::LogFetch { log_type: LogType::Perform, .. })
        );
        assert_matches!(summary.stale_report, Ok(LogStats { confirmed: 1, .. }));
        assert!(coordinator.is_transmission_confirmed(&key("50|C")));
        assert!(logs_contain("Failed to fetch perform logs: connection reset"));
    }

    /// Counts passes, each taking `delay` to fetch perform logs.
    struct SlowLogs {
        delay: Duration,
        passes: AtomicUsize,
    }

    #[async_trait]
    impl LogProvider for SlowLogs {
        async fn perform_logs(&self) -> anyhow::Result<Vec<PerformLog>> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![])
        }

        async fn stale_report_logs(&self) -> anyhow::Result<Vec<StaleReportLog>> {
            Ok(vec![])
        }
    }

    async fn passes_within(delay: Duration, run_for: Duration) -> usize {
        let logs = Arc::new(SlowLogs { delay, passes: AtomicUsize::new(0) });
        let coordinator = ReportCoordinator::new(
            Arc::clone(&logs) as Arc<dyn LogProvider>,
            Arc::new(BasicEncoder),
            ReportCoordinatorConfig::new(MIN_CONFIRMATIONS),
        )
        .unwrap();

        let looped = tokio::time::timeout(run_for, reconcile_loop(Arc::clone(coordinator.state()), ServiceContext::new()));
        assert!(looped.await.is_err(), "the loop only stops on cancellation");
        logs.passes.load(Ordering::SeqCst)
    }

    #[rstest]
    #[case::instant_passes(Duration::ZERO, Duration::from_millis(3500), 4)]
    #[case::pass_time_is_deducted_from_sleep(Duration::from_millis(400), Duration::from_millis(3500), 4)]
    #[case::slow_passes_run_back_to_back(Duration::from_millis(1500), Duration::from_millis(4600), 4)]
    #[tokio::test(start_paused = true)]
    async fn loop_keeps_its_cadence(#[case] delay: Duration, #[case] run_for: Duration, #[case] expected: usize) {
        assert_eq!(passes_within(delay, run_for).await, expected);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn slow_passes_are_reported() {
        passes_within(Duration::from_millis(1500), Duration::from_millis(2000)).await;
        assert!(logs_contain("exceeding the poll cadence"));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_cancellation() {
        let coordinator = serving(vec![], vec![]);
        let ctx = ServiceContext::new();

        let handle = tokio::spawn(reconcile_loop(Arc::clone(coordinator.state()), ctx.child()));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        ctx.cancel_global();

        handle.await.unwrap();
        assert_eq!(Arc::strong_count(coordinator.state()), 1);
    }
}
