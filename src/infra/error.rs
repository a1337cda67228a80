//! Engine error taxonomy
//!
//! Every request-level failure is one of these variants. None of them is fatal
//! to the process; the HTTP layer maps each to a status code and a JSON body.

use crate::domain::incident::IncidentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, unknown subject, unknown incident type. Never partially applied.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Idempotent outcome of a second resolve, reported but not escalated
    #[error("incident {0} is already resolved")]
    AlreadyResolved(IncidentId),

    /// Transient failure talking to a collaborator; retried on the next tick
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Wire name used in `{"error": ...}` response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "ValidationError",
            EngineError::NotFound(_) => "NotFound",
            EngineError::AlreadyResolved(_) => "AlreadyResolved",
            EngineError::Unavailable(_) => "Unavailable",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
