use crate::blocker::IdBlocker;
use crate::cache::{CacheExpiration, ExpiringCache};
use crate::cache_cleaner::IntervalCacheCleaner;
use crate::config::ReportCoordinatorConfig;
use crate::error::{EncoderResultExt, ReportCoordinatorError};
use crate::log_provider::LogProvider;
use crate::reconcile::reconcile_loop;
use anyhow::Context;
use kp_upkeep::{BlockKey, Encoder, UpkeepIdentifier, UpkeepKey};
use kp_utils::service::ServiceContext;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// State shared between the decision API and the background tasks.
pub(crate) struct CoordinatorState {
    pub(crate) logs: Arc<dyn LogProvider>,
    pub(crate) encoder: Arc<dyn Encoder>,
    pub(crate) config: ReportCoordinatorConfig,
    /// Blocking window per upkeep, expiring after the lockout window.
    pub(crate) id_blocks: Arc<ExpiringCache<UpkeepIdentifier, IdBlocker>>,
    /// Whether an accepted key was seen in a transmit log.
    pub(crate) active_keys: Arc<ExpiringCache<UpkeepKey, bool>>,
}

impl CoordinatorState {
    pub(crate) fn split(&self, key: &UpkeepKey) -> Result<(BlockKey, UpkeepIdentifier), ReportCoordinatorError> {
        self.encoder.split_upkeep_key(key).for_key(key)
    }

    /// Replaces the blocking window of `id` with `val` if [IdBlocker::should_update]
    /// allows it. Returns whether the window was written.
    pub(crate) fn update_id_block(&self, id: &UpkeepIdentifier, val: IdBlocker) -> bool {
        let encoder = self.encoder.as_ref();
        let updated = self.id_blocks.set_with(id.clone(), val, CacheExpiration::Default, |existing, val| {
            existing.should_update(val, encoder).unwrap_or_else(|e| {
                tracing::warn!(upkeep_id = %id, "Cannot compare blocking windows {existing:?} and {val:?}: {e}");
                false
            })
        });
        if !updated {
            tracing::debug!(upkeep_id = %id, "Not updating blocking window to {val:?}");
        }
        updated
    }
}

struct BackgroundTasks {
    ctx: ServiceContext,
    reconcile: JoinHandle<()>,
    active_keys_cleaner: IntervalCacheCleaner,
    id_blocks_cleaner: IntervalCacheCleaner,
}

/// Tracks which upkeeps this node has claimed and whether their reports landed.
///
/// The scheduler asks [ReportCoordinator::is_pending] before working on an upkeep,
/// claims it with [ReportCoordinator::accept] once a report is produced, and uses
/// [ReportCoordinator::is_transmission_confirmed] to decide whether a fallback report is
/// warranted. Meanwhile a background task started by [ReportCoordinator::start] polls
/// the [LogProvider] and releases upkeeps as their transmit logs are confirmed.
///
/// None of the decision methods perform I/O or wait on the background task.
pub struct ReportCoordinator {
    state: Arc<CoordinatorState>,
    running: AtomicBool,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl ReportCoordinator {
    pub fn new(
        logs: Arc<dyn LogProvider>,
        encoder: Arc<dyn Encoder>,
        config: ReportCoordinatorConfig,
    ) -> Result<Self, ReportCoordinatorError> {
        config.validate()?;

        let state = CoordinatorState {
            logs,
            encoder,
            id_blocks: Arc::new(ExpiringCache::new(config.lockout_window)),
            active_keys: Arc::new(ExpiringCache::new(config.active_key_retention)),
            config,
        };

        Ok(Self { state: Arc::new(state), running: AtomicBool::new(false), tasks: Mutex::new(None) })
    }

    pub fn config(&self) -> &ReportCoordinatorConfig {
        &self.state.config
    }

    /// Returns true if work on `key` should be held back because its upkeep is blocked
    /// at or after the block `key` was checked at.
    ///
    /// An upkeep with no blocking window is never pending. Otherwise the key is pending
    /// unless its block is strictly after the window's transmit block.
    ///
    /// Errors mean the key could not be decoded or compared. Callers which must not
    /// risk duplicate work should treat them as pending, see
    /// [ReportCoordinator::is_pending_fail_closed].
    pub fn is_pending(&self, key: &UpkeepKey) -> Result<bool, ReportCoordinatorError> {
        let (block, id) = self.state.split(key)?;

        let Some(blocker) = self.state.id_blocks.get(&id) else {
            return Ok(false);
        };

        let past_window = self.state.encoder.after(&block, &blocker.transmit_block).for_key(key)?;
        Ok(!past_window)
    }

    /// Same as [ReportCoordinator::is_pending], but any error counts as pending.
    pub fn is_pending_fail_closed(&self, key: &UpkeepKey) -> bool {
        self.is_pending(key).unwrap_or_else(|e| {
            tracing::warn!(key = %key, "Treating upkeep key as pending: {e}");
            true
        })
    }

    /// Claims `key`: its upkeep is blocked from the key's block on, until a transmit log
    /// gives a release point.
    ///
    /// Accepting a key which was already accepted is a no-op and not an error, as
    /// several observers may race to accept the same key.
    pub fn accept(&self, key: &UpkeepKey) -> Result<(), ReportCoordinatorError> {
        let (block, id) = self.state.split(key)?;

        if !self.state.active_keys.set_if_absent(key.clone(), false, CacheExpiration::Default) {
            tracing::trace!(key = %key, "Upkeep key already accepted");
            return Ok(());
        }

        tracing::debug!(key = %key, "Accepted upkeep key");
        self.state.update_id_block(&id, IdBlocker::indefinite(block));
        Ok(())
    }

    /// Returns false only if `key` was accepted and no transmit log for it has been
    /// confirmed yet. Keys which were never accepted are not this node's concern and
    /// count as confirmed.
    pub fn is_transmission_confirmed(&self, key: &UpkeepKey) -> bool {
        self.state.active_keys.get(key).unwrap_or(true)
    }

    /// Current blocking window of an upkeep, if any.
    pub fn blocking_window(&self, id: &UpkeepIdentifier) -> Option<IdBlocker> {
        self.state.id_blocks.get(id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the reconciliation loop and the cache cleaners.
    ///
    /// Starting a running coordinator does nothing. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }

        tracing::info!(
            "📝 Starting report coordinator (min confirmations: {}, lockout window: {:?})",
            self.state.config.min_confirmations,
            self.state.config.lockout_window
        );

        let ctx = ServiceContext::new();
        let clean_interval = self.state.config.cache_clean_interval;

        let mut active_keys_cleaner = IntervalCacheCleaner::new(clean_interval);
        active_keys_cleaner.start(&ctx, "active keys", Arc::clone(&self.state.active_keys));
        let mut id_blocks_cleaner = IntervalCacheCleaner::new(clean_interval);
        id_blocks_cleaner.start(&ctx, "blocking windows", Arc::clone(&self.state.id_blocks));

        let reconcile = tokio::spawn(reconcile_loop(Arc::clone(&self.state), ctx.child()));

        *tasks = Some(BackgroundTasks { ctx, reconcile, active_keys_cleaner, id_blocks_cleaner });
    }

    /// Stops the reconciliation loop and the cache cleaners, and waits for them to exit.
    ///
    /// Closing a coordinator which is not running does nothing. A closed coordinator
    /// keeps its state and can be started again.
    pub async fn close(&self) -> anyhow::Result<()> {
        let tasks = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if self.running.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                return Ok(());
            }
            tasks.take()
        };
        let Some(BackgroundTasks { ctx, reconcile, mut active_keys_cleaner, mut id_blocks_cleaner }) = tasks else {
            return Ok(());
        };

        ctx.cancel_local();
        let reconciled = reconcile.await.context("Joining reconciliation task");
        let active_keys_cleaned = active_keys_cleaner.stop().await.context("Stopping active keys cleaner");
        let id_blocks_cleaned = id_blocks_cleaner.stop().await.context("Stopping blocking windows cleaner");

        tracing::info!("📝 Report coordinator stopped");
        reconciled.and(active_keys_cleaned).and(id_blocks_cleaned)
    }

    pub(crate) fn state(&self) -> &Arc<CoordinatorState> {
        &self.state
    }
}

impl fmt::Debug for ReportCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportCoordinator")
            .field("config", &self.state.config)
            .field("running", &self.is_running())
            .field("active_keys", &self.state.active_keys.len())
            .field("id_blocks", &self.state.id_blocks.len())
            .finish()
    }
}

impl Drop for ReportCoordinator {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(tasks) = tasks.as_ref() {
            tasks.ctx.cancel_local();
        }
    }
}
