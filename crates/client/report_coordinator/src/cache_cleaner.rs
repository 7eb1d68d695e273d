use crate::cache::ExpiringCache;
use kp_utils::service::ServiceContext;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically evicts expired entries from an [ExpiringCache].
///
/// The sweep runs as its own tokio task. [IntervalCacheCleaner::stop] cancels it and
/// waits for it to exit, so no task outlives the cleaner's owner.
#[derive(Debug)]
pub struct IntervalCacheCleaner {
    interval: Duration,
    running: Option<(ServiceContext, JoinHandle<()>)>,
}

impl IntervalCacheCleaner {
    pub fn new(interval: Duration) -> Self {
        Self { interval, running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts sweeping `cache` every interval until `ctx` (or [Self::stop]) cancels it.
    ///
    /// Starting a cleaner which is already running does nothing.
    pub fn start<K, V>(&mut self, ctx: &ServiceContext, name: &'static str, cache: Arc<ExpiringCache<K, V>>)
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        if self.running.is_some() {
            return;
        }

        let ctx = ctx.child();
        let task_ctx = ctx.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            tracing::debug!("{name} cache cleaner started, sweeping every {interval:?}");
            while task_ctx.run_until_cancelled(tokio::time::sleep(interval)).await.is_some() {
                let evicted = cache.clear_expired();
                if evicted > 0 {
                    tracing::trace!("Evicted {evicted} expired entries from the {name} cache");
                }
            }
            tracing::debug!("{name} cache cleaner stopped");
        });

        self.running = Some((ctx, handle));
    }

    /// Stops the sweep and waits for the task to exit. Stopping twice is a no-op.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        let Some((ctx, handle)) = self.running.take() else {
            return Ok(());
        };
        ctx.cancel_local();
        handle.await?;
        Ok(())
    }
}
