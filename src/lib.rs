// src/lib.rs
// Public library surface for integration tests and the binary.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod scheduler;

// Curation stages, leaf-first
pub mod ingest;
pub mod dedup;
pub mod llm;
pub mod classify;
pub mod editorial;
pub mod slug;
pub mod store;
pub mod pipeline;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::error::PipelineError;
pub use crate::pipeline::{Pipeline, RunReport};
