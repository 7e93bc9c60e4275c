//! Adapter trait and core abstractions.

use crate::error::WeaveError;
use crate::types::*;
use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::sync::Arc;

/// Stream type alias for adapter output chunks
pub type ChunkStream = dyn Stream<Item = Result<StreamChunk, WeaveError>> + Send + Unpin;

/// Core adapter trait for one provider family.
///
/// An adapter turns a [`RequestSpec`] into the provider's wire payload, sends
/// it to the given candidate, and parses the response envelope back into the
/// normalized shape. It is also the only place that knows how to read the
/// provider's error bodies, so every failure leaving an adapter is already
/// classified (see [`WeaveError::kind`]).
///
/// The orchestrator never looks at adapter identity, only at
/// [`Adapter::capabilities`].
#[async_trait]
pub trait Adapter: Send + Sync + Debug + 'static {
    /// Get adapter information
    fn info(&self) -> Arc<AdapterInfo>;

    /// Capability flags used by the orchestrator for dispatch
    fn capabilities(&self) -> Capabilities;

    /// One-shot call
    async fn call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError>;

    /// Streaming call
    ///
    /// Only invoked when [`Capabilities::streaming`] is set.
    async fn stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        let _ = (candidate, spec);
        Err(WeaveError::unsupported(format!(
            "{} does not support streaming",
            self.info().name
        )))
    }
}

#[async_trait]
impl<A: Adapter + ?Sized> Adapter for Arc<A> {
    fn info(&self) -> Arc<AdapterInfo> {
        (**self).info()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    async fn call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        (**self).call(candidate, spec).await
    }

    async fn stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        (**self).stream_call(candidate, spec).await
    }
}

/// Helper function to collect a chunk stream into a single response
pub async fn collect_chunk_stream(
    model: impl Into<String>,
    mut stream: Box<ChunkStream>,
) -> Result<AdapterResponse, WeaveError> {
    use futures::StreamExt;

    let mut text = String::new();
    let mut finish_reason = None;
    let mut usage = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        text.push_str(&chunk.delta);

        if let Some(reason) = chunk.finish_reason {
            finish_reason = Some(reason);
        }

        if let Some(u) = chunk.usage {
            usage = Some(u);
        }
    }

    Ok(AdapterResponse {
        text,
        model: model.into(),
        finish_reason: finish_reason.unwrap_or(FinishReason::Stop),
        usage,
    })
}
