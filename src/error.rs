use thiserror::Error;

/// Error taxonomy for the composition engine. The HTTP layer maps these to
/// status codes; nothing here is retried internally and no operation leaves
/// partial state behind on failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        /// Offending field or variable names, when known.
        fields: Vec<String>,
    },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("precondition failed: {message}")]
    PreconditionFailed {
        message: String,
        /// Names of required clauses missing at publish, when applicable.
        missing: Vec<String>,
    },

    /// Backend fault surfaced by a store. Not a caller error.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>, fields: Vec<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>, missing: Vec<String>) -> Self {
        EngineError::PreconditionFailed {
            message: message.into(),
            missing,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
