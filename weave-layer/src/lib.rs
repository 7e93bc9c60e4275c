//! # Weave Layers
//!
//! Built-in adapter layers.
//!
//! Currently implemented layers:
//! - `LoggingLayer`: logs every backend call with model, masked credential and timing
//!
//! ## Usage
//!
//! ```ignore
//! use weave_core::{Layer, Orchestrator};
//! use weave_layer::LoggingLayer;
//! use weave_provider::ChatAdapter;
//!
//! let orchestrator = Orchestrator::builder()
//!     .adapter(LoggingLayer::new().layer(ChatAdapter::new(transport)))
//!     .finish();
//! ```

pub mod logging;

// Re-exports
pub use logging::{LoggingAdapter, LoggingLayer};
