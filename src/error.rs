// src/error.rs
//! Run-level failures. Anything that reaches the orchestrator as a
//! `PipelineError` aborts the remaining stages and fails the batch run.
//! Source- and item-level problems are absorbed by their stage instead.

use crate::llm::LlmError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("language model error: {0}")]
    Llm(LlmError),

    #[error("pipeline already running")]
    AlreadyRunning,
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MissingApiKey(var) => PipelineError::MissingConfig(format!("Missing {var}")),
            other => PipelineError::Llm(other),
        }
    }
}
