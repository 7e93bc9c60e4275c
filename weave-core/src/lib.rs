//! # Weave Core
//!
//! Core abstractions and orchestration runtime for resilient AI backend requests.
//!
//! This crate provides the adapter and layer traits, the error taxonomy, and
//! the pieces the [`Orchestrator`] is assembled from: a keyed connection pool,
//! a content-addressed result cache, a rate-limited progress channel and a
//! cooperative cancellation scope.

pub mod adapter;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod layer;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod runtime;
pub mod types;

// Re-exports
pub use adapter::{collect_chunk_stream, Adapter, ChunkStream};
pub use cache::{CacheStats, Fingerprint, ResultCache};
pub use cancel::CancellationScope;
pub use config::{CandidateSource, DuplicatePolicy, ProxySettings, WeaveConfig};
pub use error::{FailureKind, WeaveError};
pub use layer::{Layer, LayeredAdapter};
pub use pool::{ClientPool, PoolSettings, ProxySpec, Transport};
pub use progress::{
    progress_channel, ChannelSink, NullSink, ProgressChannel, ProgressSink, ProgressStream,
};
pub use retry::RetryPolicy;
pub use runtime::{Orchestrator, OrchestratorBuilder, Submission};
pub use types::*;

/// Result type alias for Weave operations
pub type Result<T> = std::result::Result<T, WeaveError>;
