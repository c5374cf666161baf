//! Shared cancellable context for one reconciliation run.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use fluxr_core::CancelCause;

/// A cancellation token that remembers why it was cancelled.
///
/// The first `cancel` wins; later causes are ignored.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that cancels itself with `DeadlineExceeded` after `timeout`.
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> Self {
        let ctx = Self::new();
        let timer = ctx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(?timeout, "run context deadline reached");
                    timer.cancel(CancelCause::DeadlineExceeded);
                }
                _ = timer.token.cancelled() => {}
            }
        });
        ctx
    }

    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Why the context was cancelled; `Stopped` if it was not (yet).
    pub fn cause(&self) -> CancelCause {
        self.cause.get().copied().unwrap_or(CancelCause::Stopped)
    }

    /// Token cancelled with this context, but which can also be cancelled on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
