//! # Weave
//!
//! Resilient, cancellable orchestration of AI backend calls for interactive
//! authoring tools.
//!
//! Weave sits between a host application and heterogeneous AI backends
//! (chat models, vision models, a machine-translation API, local model
//! servers). Every request carries an ordered list of candidate backends;
//! Weave retries transient failures, falls back down the list, memoizes
//! deterministic results, streams progress events to the caller and stops
//! promptly when the request is cancelled.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! weave = { version = "0.1", features = ["providers", "layers"] }
//! ```
//!
//! ```ignore
//! use std::sync::Arc;
//! use weave::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WeaveConfig::default().with_env_proxy();
//! let pool = Arc::new(ClientPool::new());
//! let transport = Transport::from_source(pool, &config);
//!
//! let orchestrator = Arc::new(
//!     weave::provider::install(Orchestrator::builder(), &transport)
//!         .retry(RetryPolicy::default())
//!         .finish(),
//! );
//!
//! let spec = RequestSpec::translate("你好", "English")
//!     .push_candidate(weave::provider::deepseek("your-api-key"));
//!
//! let mut submission = orchestrator.submit(spec)?;
//! while let Some(event) = submission.events().next().await {
//!     println!("{:?}", event.phase);
//! }
//! println!("{:?}", submission.outcome().await?.text());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: `providers`, `layers` and `socks`
//! - `providers`: chat, vision, Baidu and Ollama adapters
//! - `layers`: built-in adapter layers (logging)
//! - `socks`: SOCKS proxy support in the connection pool
//! - `full`: all features enabled

// Re-export core types and traits
pub use weave_core::*;

// Re-export providers under `provider` module
#[cfg(feature = "weave-provider")]
pub mod provider {
    //! Backend adapter implementations.
    pub use weave_provider::*;
}

// Re-export layers under `layer` module
#[cfg(feature = "weave-layer")]
pub mod layer {
    //! Built-in adapter layers.
    pub use weave_layer::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude module containing the most commonly used types and traits.
    //!
    //! ```
    //! use weave::prelude::*;
    //! ```

    pub use crate::{
        Adapter, CancellationScope, ClientPool, Layer, ModelCandidate, Orchestrator, Outcome,
        Phase, ProgressEvent, ProviderFamily, ProxySettings, RequestSpec, Result, RetryPolicy,
        Submission, Transport, WeaveConfig, WeaveError,
    };

    #[cfg(feature = "weave-provider")]
    pub use crate::provider::{BaiduAdapter, ChatAdapter, OllamaAdapter, VisionAdapter};

    #[cfg(feature = "weave-layer")]
    pub use crate::layer::LoggingLayer;

    pub use futures::StreamExt;
}
