//! Cancellation context shared by background workers.
//!
//! Every long-running task in a keeper node (log reconciliation, cache cleaners, ...)
//! receives a [ServiceContext]. The context is the only way a task learns it should
//! stop: tasks check it at logical points in their main loop, either synchronously with
//! [ServiceContext::is_cancelled] or by racing their work against
//! [ServiceContext::cancelled].
//!
//! # Scope
//!
//! Contexts form a hierarchy. [ServiceContext::child] creates a context in a new
//! _local scope_: cancelling it with [ServiceContext::cancel_local] stops that context
//! and every context derived from it, without affecting its parent. All contexts
//! derived from the same root share a _global scope_ which [ServiceContext::cancel_global]
//! stops as a whole.
//!
//! > A parent can always cancel its children, but a child cannot cancel its parent
//! > through its local scope.

use std::future::Future;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default, Debug)]
pub struct ServiceContext {
    token_global: CancellationToken,
    token_local: Option<CancellationToken>,
}

impl ServiceContext {
    /// Creates a new root [ServiceContext].
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops all services under the same global context scope.
    pub fn cancel_global(&self) {
        tracing::info!("🔌 Shutting down all services");
        self.token_global.cancel();
    }

    /// Stops all services under the same local context scope.
    pub fn cancel_local(&self) {
        self.token_local().cancel();
    }

    /// A future which completes once this context is cancelled, either locally or
    /// globally.
    pub async fn cancelled(&self) {
        let token_local = self.token_local();
        tokio::select! {
            _ = self.token_global.cancelled() => {},
            _ = token_local.cancelled() => {},
        }
    }

    /// Checks whether this context was cancelled.
    ///
    /// Only suitable alongside work which does not block the running service, such as
    /// checking for cancellation between two short units of synchronous work.
    pub fn is_cancelled(&self) -> bool {
        self.token_global.is_cancelled() || self.token_local.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Runs a [Future] until this context is cancelled.
    ///
    /// # Cancellation safety
    ///
    /// The future is dropped at its current await point on cancellation, so it must be
    /// cancel-safe.
    ///
    /// # Returns
    ///
    /// The return value of the future wrapped in [Some], or [None] if the context was
    /// cancelled first.
    pub async fn run_until_cancelled<T, F>(&self, f: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            res = f => Some(res),
            _ = self.cancelled() => None,
        }
    }

    /// Creates a new [ServiceContext] as a child of the current context.
    pub fn child(&self) -> Self {
        Self { token_global: self.token_global.clone(), token_local: Some(self.token_local().child_token()) }
    }

    fn token_local(&self) -> &CancellationToken {
        self.token_local.as_ref().unwrap_or(&self.token_global)
    }
}
