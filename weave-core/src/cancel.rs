//! Cancellation scope bound to the caller's execution lifetime.

use std::future::Future;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative cancellation handle for one request.
///
/// Cloning yields another handle to the same scope. Wire the host's interrupt
/// mechanism in with [`CancellationScope::from_token`] (typically a child of a
/// host-wide token) so an interrupt reaches every outstanding request.
#[derive(Debug, Clone, Default)]
pub struct CancellationScope {
    token: CancellationToken,
}

impl CancellationScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A scope cancelled whenever this one is, but cancellable on its own too
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drive `fut` unless the scope is cancelled first, in which case `fut`
    /// is dropped (aborting any I/O it owns) and `None` is returned.
    ///
    /// Cancellation wins ties.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }
}
