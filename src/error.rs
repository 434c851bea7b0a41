use thiserror::Error;

use crate::model::ModelId;

/// Errors raised by the model bridge (store, predictor and registry).
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model parameters not initialized; load a model source first")]
    NotInitialized,

    #[error("parameter `{name}` not found for model {model}")]
    NotFound { name: String, model: ModelId },

    #[error("parameter `{name}` for model {model} could not be parsed: {reason}")]
    Malformed {
        name: String,
        model: ModelId,
        reason: String,
    },

    #[error("dimension mismatch in model {model}: {detail}")]
    DimensionMismatch { model: ModelId, detail: String },

    #[error("invalid parameter `{name}` for model {model}: {reason}")]
    InvalidParameter {
        name: String,
        model: ModelId,
        reason: String,
    },

    #[error("failed to read model source {path}: {reason}")]
    Io { path: String, reason: String },
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
