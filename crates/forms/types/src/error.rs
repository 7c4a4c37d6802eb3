use thiserror::Error;

/// Result type for all forms operations.
pub type FormsResult<T> = Result<T, FormsError>;

/// Error taxonomy shared by every forms component.
///
/// Messages are written for end users; anything a caller should not see
/// (backend detail, internal ids beyond the offending one) belongs in the
/// tracing output of the component that raised the error, not here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormsError {
    /// Missing or invalid input, including incomplete required responses.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate identifier or a delete blocked by dependent records.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown form, field, assignment, or submission id.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// The identifier that missed.
        id: String,
    },

    /// Capability check failed or the grant has expired.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Illegal lifecycle transition attempted.
    #[error("illegal transition: {current} submission cannot be {attempted}")]
    State {
        /// Status the submission is currently in.
        current: String,
        /// What the caller tried to do to it.
        attempted: String,
    },

    /// The storage layer itself failed. Raised only after rollback; the
    /// only category callers may treat as non-recoverable.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl FormsError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn state(current: impl std::fmt::Display, attempted: impl Into<String>) -> Self {
        Self::State {
            current: current.to_string(),
            attempted: attempted.into(),
        }
    }
}
