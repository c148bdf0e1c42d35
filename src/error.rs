// src/error.rs
// Error type for the I/O-facing parts of the crate.

use crate::nn::OptimizerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrainAgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read NIfTI volume: {0}")]
    Nifti(#[from] nifti::NiftiError),
    #[error("failed to read metadata: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("tensor error: {0}")]
    Tensor(String),
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
    #[error("training diverged at epoch {epoch}: loss is {loss}")]
    UnstableTraining { epoch: usize, loss: f64 },
}

impl From<String> for BrainAgeError {
    fn from(message: String) -> Self {
        BrainAgeError::Tensor(message)
    }
}

pub type Result<T> = std::result::Result<T, BrainAgeError>;
