//! Runtime layer for Weave.
//!
//! The runtime sits between the host tool and the adapters. It is
//! responsible for:
//! - Serving cacheable operations from the result cache
//! - Dispatching each candidate to the adapter registered for its family
//! - Retrying transient failures in place and falling back in priority order
//! - Emitting progress and honoring cancellation at every suspension point

pub mod orchestrator;
pub mod submission;

#[cfg(test)]
mod tests;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use submission::Submission;
