//! Layer trait and abstractions.
//!
//! Layers wrap an adapter with cross-cutting concerns (logging, metrics)
//! without touching the orchestration logic.

use crate::adapter::{Adapter, ChunkStream};
use crate::error::WeaveError;
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Layer trait for wrapping adapters.
pub trait Layer<A: Adapter> {
    /// The type of the layered adapter
    type LayeredAdapter: Adapter;

    /// Wrap the inner adapter with this layer
    fn layer(&self, inner: A) -> Self::LayeredAdapter;
}

/// Helper trait for layered adapters.
///
/// Default implementations forward to the inner adapter. Implementers only
/// override the methods they want to intercept, then use
/// [`impl_layered_adapter!`](crate::impl_layered_adapter) for the
/// [`Adapter`] impl.
#[async_trait]
pub trait LayeredAdapter: Sized + Send + Sync + 'static {
    /// The inner adapter type
    type Inner: Adapter;

    /// Get a reference to the inner adapter
    fn inner(&self) -> &Self::Inner;

    fn layered_info(&self) -> Arc<AdapterInfo> {
        self.inner().info()
    }

    fn layered_capabilities(&self) -> Capabilities {
        self.inner().capabilities()
    }

    async fn layered_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<AdapterResponse, WeaveError> {
        self.inner().call(candidate, spec).await
    }

    async fn layered_stream_call(
        &self,
        candidate: &ModelCandidate,
        spec: &RequestSpec,
    ) -> Result<Box<ChunkStream>, WeaveError> {
        self.inner().stream_call(candidate, spec).await
    }
}

/// Implement [`Adapter`] by forwarding to [`LayeredAdapter`] methods.
#[macro_export]
macro_rules! impl_layered_adapter {
    ($type:ident) => {
        #[async_trait::async_trait]
        impl<A: $crate::adapter::Adapter> $crate::adapter::Adapter for $type<A> {
            fn info(&self) -> std::sync::Arc<$crate::types::AdapterInfo> {
                $crate::layer::LayeredAdapter::layered_info(self)
            }

            fn capabilities(&self) -> $crate::types::Capabilities {
                $crate::layer::LayeredAdapter::layered_capabilities(self)
            }

            async fn call(
                &self,
                candidate: &$crate::types::ModelCandidate,
                spec: &$crate::types::RequestSpec,
            ) -> Result<$crate::types::AdapterResponse, $crate::error::WeaveError> {
                $crate::layer::LayeredAdapter::layered_call(self, candidate, spec).await
            }

            async fn stream_call(
                &self,
                candidate: &$crate::types::ModelCandidate,
                spec: &$crate::types::RequestSpec,
            ) -> Result<Box<$crate::adapter::ChunkStream>, $crate::error::WeaveError> {
                $crate::layer::LayeredAdapter::layered_stream_call(self, candidate, spec).await
            }
        }
    };
}
