//! Progress channel.
//!
//! Each execution owns one [`ProgressChannel`] that forwards events to the
//! caller's [`ProgressSink`]. Partial output arriving faster than the
//! configured interval is merged into the next emission; the terminal event
//! is always delivered, exactly once, after any merged partial output.

use crate::types::{EventPayload, Phase, ProgressEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Default minimum spacing between two partial events
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// Receiver of progress events, supplied by the caller.
///
/// `deliver` is called from the execution task and must not block.
pub trait ProgressSink: Send + Sync + 'static {
    fn deliver(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync + 'static,
{
    fn deliver(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn deliver(&self, _event: ProgressEvent) {}
}

/// Sink feeding an ordered subscription stream
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSink for ChannelSink {
    fn deliver(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("progress subscriber dropped, event discarded");
        }
    }
}

/// Ordered stream of events for one request
pub type ProgressStream = UnboundedReceiverStream<ProgressEvent>;

/// A sink and the single subscription reading from it
pub fn progress_channel() -> (ChannelSink, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, UnboundedReceiverStream::new(rx))
}

/// Per-request, rate-limited event emitter.
pub struct ProgressChannel {
    request_id: String,
    sink: Arc<dyn ProgressSink>,
    min_interval: Duration,
    last_partial: Option<Instant>,
    pending: Option<String>,
    finished: bool,
}

impl ProgressChannel {
    pub fn new(
        request_id: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
        min_interval: Duration,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            sink,
            min_interval,
            last_partial: None,
            pending: None,
            finished: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether the terminal event has been delivered
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emit an event for this channel's request.
    pub fn emit(&mut self, event: ProgressEvent) {
        debug_assert_eq!(event.request_id, self.request_id);

        if self.finished {
            tracing::warn!(
                "[Progress] {} already terminated, dropping {:?} event",
                self.request_id,
                event.phase
            );
            return;
        }

        let ProgressEvent { phase, payload, .. } = event;
        match (phase, payload) {
            (Phase::Partial, EventPayload::Text { text }) => self.push_partial(text),
            (Phase::Cancelled, payload) => {
                // no partial output may follow a cancellation request
                self.pending = None;
                self.finished = true;
                self.sink.deliver(ProgressEvent::new(
                    self.request_id.clone(),
                    Phase::Cancelled,
                    payload,
                ));
            }
            (phase, payload) => {
                self.flush();
                self.finished = phase.is_terminal();
                self.sink
                    .deliver(ProgressEvent::new(self.request_id.clone(), phase, payload));
            }
        }
    }

    /// Emit a partial output delta
    pub fn partial(&mut self, delta: impl Into<String>) {
        let event = ProgressEvent::partial(self.request_id.clone(), delta);
        self.emit(event);
    }

    /// Emit a non-partial event
    pub fn phase(&mut self, phase: Phase, payload: EventPayload) {
        let event = ProgressEvent::new(self.request_id.clone(), phase, payload);
        self.emit(event);
    }

    /// Deliver any merged partial output now
    pub fn flush(&mut self) {
        if let Some(text) = self.pending.take() {
            self.last_partial = Some(Instant::now());
            self.sink
                .deliver(ProgressEvent::partial(self.request_id.clone(), text));
        }
    }

    fn push_partial(&mut self, delta: String) {
        match &mut self.pending {
            Some(pending) => pending.push_str(&delta),
            None => self.pending = Some(delta),
        }

        let due = self
            .last_partial
            .map_or(true, |last| last.elapsed() >= self.min_interval);
        if due {
            self.flush();
        }
    }
}

impl std::fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressChannel")
            .field("request_id", &self.request_id)
            .field("min_interval", &self.min_interval)
            .field("finished", &self.finished)
            .finish()
    }
}
