use thiserror::Error;

/// Errors surfaced by the breeding engine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("bird not found: {id}")]
    NotFound { id: String },

    #[error("invalid bird record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl EngineError {
    pub fn not_found(id: impl Into<String>) -> Self {
        EngineError::NotFound { id: id.into() }
    }
}

/// Failures of the bird lookup collaborator. Always downgraded to guest parents.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("lookup for {id} timed out after {millis} ms")]
    Timeout { id: String, millis: u64 },

    #[error("lookup for {id} failed: {reason}")]
    Unavailable { id: String, reason: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
