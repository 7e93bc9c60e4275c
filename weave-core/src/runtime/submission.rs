//! Handle to a spawned execution.

use crate::cancel::CancellationScope;
use crate::error::WeaveError;
use crate::progress::ProgressStream;
use crate::types::{Outcome, ProgressEvent};
use futures::StreamExt;
use tokio::task::JoinHandle;

/// A request running on its own task.
///
/// The event stream ends after the terminal event.
#[derive(Debug)]
pub struct Submission {
    request_id: String,
    events: ProgressStream,
    scope: CancellationScope,
    handle: JoinHandle<Outcome>,
}

impl Submission {
    pub(crate) fn new(
        request_id: String,
        events: ProgressStream,
        scope: CancellationScope,
        handle: JoinHandle<Outcome>,
    ) -> Self {
        Self {
            request_id,
            events,
            scope,
            handle,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Request cancellation; the outcome will be `Cancelled` unless it already finished
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    pub fn scope(&self) -> &CancellationScope {
        &self.scope
    }

    /// Ordered progress events of this request
    pub fn events(&mut self) -> &mut ProgressStream {
        &mut self.events
    }

    /// Wait for the terminal outcome, discarding unread events
    pub async fn outcome(self) -> Result<Outcome, WeaveError> {
        self.handle
            .await
            .map_err(|e| WeaveError::other(format!("execution task failed: {}", e)))
    }

    /// Wait for the outcome and return it with every event not yet read
    pub async fn wait(self) -> Result<(Vec<ProgressEvent>, Outcome), WeaveError> {
        let Submission { events, handle, .. } = self;
        let outcome = handle
            .await
            .map_err(|e| WeaveError::other(format!("execution task failed: {}", e)))?;
        let events = events.collect().await;
        Ok((events, outcome))
    }
}
