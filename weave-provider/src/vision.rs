//! Vision chat adapter: the chat completions wire format with image input.

use crate::chat::Completions;
use async_trait::async_trait;
use std::sync::Arc;
use weave_core::adapter::{Adapter, ChunkStream};
use weave_core::error::WeaveError;
use weave_core::pool::Transport;
use weave_core::types::*;

/// Image and video-frame captioning over `/chat/completions` ([`ProviderFamily::Vision`]).
#[derive(Debug, Clone)]
pub struct VisionAdapter {
    completions: Completions,
    info: Arc<AdapterInfo>,
}

impl VisionAdapter {
    pub fn new(transport: Transport) -> Self {
        Self {
            completions: Completions::new(transport),
            info: Arc::new(AdapterInfo {
                family: ProviderFamily::Vision,
                name: "vision".to_string(),
            }),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info = Arc::new(AdapterInfo {
            family: ProviderFamily::Vision,
            name: name.into(),
        });
        self
    }
}

fn ensure_images(spec: &RequestSpec) -> Result<(), WeaveError> {
    if spec.operation.needs_vision() && spec.payload.images().is_empty() {
        return Err(WeaveError::invalid_request(format!(
            "{} request carries no image",
            spec.operation
        )));
    }
    Ok(())
}

#[async_trait]
impl Adapter for VisionAdapter {
    fn info(&self) -> Arc<AdapterInfo> {
        self.info.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::chat().with_streaming().with_vision()
    }

    async fn call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        ensure_images(spec)?;
        self.completions
            .complete(&self.info.name, candidate, spec)
            .await
    }

    async fn stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        ensure_images(spec)?;
        self.completions.stream(&self.info.name, candidate, spec).await
    }
}
