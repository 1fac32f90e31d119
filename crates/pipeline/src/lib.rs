//! Pipeline router for the sodam advisory service
//!
//! Owns the request lifecycle: classification, decomposition, retrieval,
//! generation, evaluation with one bounded retry, timing, token accounting,
//! and response caching. Collaborators are injected at construction; tests
//! wire the router with fake backends.

pub mod router;
pub mod state;

pub use router::PipelineRouter;
pub use state::{RequestState, StageTimings};
