//! Differential diagnosis over a dataset case with MedGemma.

use std::path::PathBuf;

use thiserror::Error;

use crate::llm_client::LlmError;

pub mod chat;
pub mod graph;
pub mod parse;
pub mod prompts;
pub mod report;
pub mod state;

pub use chat::{CaseChat, DiagnosisSummary};
pub use graph::DiagnosisGraph;
pub use state::DiagnosisState;

#[derive(Debug, Error)]
pub enum DiagnosisError {
    #[error("Dataset not found at {}", .0.display())]
    DatasetMissing(PathBuf),

    #[error("Case ID '{0}' not found in dataset")]
    NotFound(String),

    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dataset JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),
}
