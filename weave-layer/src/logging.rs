//! Logging layer for backend calls.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use weave_core::adapter::{Adapter, ChunkStream};
use weave_core::error::WeaveError;
use weave_core::impl_layered_adapter;
use weave_core::layer::{Layer, LayeredAdapter};
use weave_core::types::*;

/// Logging layer that logs adapter calls.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    prefix: String,
}

impl LoggingLayer {
    /// Create a new logging layer
    pub fn new() -> Self {
        Self {
            prefix: "[Weave]".to_string(),
        }
    }

    /// Create a logging layer with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> Layer<A> for LoggingLayer {
    type LayeredAdapter = LoggingAdapter<A>;

    fn layer(&self, inner: A) -> Self::LayeredAdapter {
        LoggingAdapter {
            inner,
            prefix: self.prefix.clone(),
        }
    }
}

/// Adapter wrapped with logging
#[derive(Debug)]
pub struct LoggingAdapter<A> {
    inner: A,
    prefix: String,
}

impl<A: Adapter> LoggingAdapter<A> {
    fn log_request(&self, op: &str, candidate: &ModelCandidate, spec: &RequestSpec) {
        tracing::debug!(
            "{} {} request: id={}, op={}, family={}, model={}, endpoint={}, key={}",
            self.prefix,
            op,
            spec.request_id,
            spec.operation,
            candidate.family,
            candidate.model,
            candidate.endpoint,
            candidate.credential.masked()
        );
    }

    fn log_failure(
        &self,
        op: &str,
        candidate: &ModelCandidate,
        e: &WeaveError,
        elapsed: Duration,
    ) {
        tracing::error!(
            "{} {} error: model={}, kind={}, error={}, elapsed={:?}",
            self.prefix,
            op,
            candidate.model,
            e.kind(),
            candidate.credential.redact(&e.to_string()),
            elapsed
        );
    }
}

#[async_trait]
impl<A: Adapter> LayeredAdapter for LoggingAdapter<A> {
    type Inner = A;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        self.log_request("call", candidate, spec);

        let start = Instant::now();
        let result = self.inner.call(candidate, spec).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::debug!(
                    "{} call success: model={}, chars={}, tokens={}, elapsed={:?}",
                    self.prefix,
                    response.model,
                    response.text.chars().count(),
                    response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                    elapsed
                );
            }
            Err(e) => self.log_failure("call", candidate, e, elapsed),
        }

        result
    }

    async fn layered_stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        self.log_request("stream_call", candidate, spec);

        let start = Instant::now();
        let result = self.inner.stream_call(candidate, spec).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::debug!(
                    "{} stream_call opened: model={}, elapsed={:?}",
                    self.prefix,
                    candidate.model,
                    elapsed
                );
            }
            Err(e) => self.log_failure("stream_call", candidate, e, elapsed),
        }

        result
    }
}

impl_layered_adapter!(LoggingAdapter);
