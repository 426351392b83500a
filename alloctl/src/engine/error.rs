use thiserror::Error;

use crate::types::{AllocationId, ResourceType};

/// Result type for allocation engine operations.
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Errors that can occur in the allocation engine.
///
/// Losing a reservation race is not an error: `try_reserve` and `try_claim` report it as `false`
/// and the matcher moves on to the next candidate.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Bad or missing request field
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The requested resource type has no registered resources
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(ResourceType),

    /// An entity with this id already exists
    #[error("{kind} {id} already exists")]
    DuplicateId { kind: &'static str, id: String },

    /// No entity with this id
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The allocation has already been released
    #[error("Allocation {0} is already closed")]
    AlreadyClosed(AllocationId),

    /// The entity is not in a state that permits the operation
    #[error("{kind} {id} is {actual}, expected {expected}")]
    InvalidState {
        kind: &'static str,
        id: String,
        expected: &'static str,
        actual: String,
    },

    /// Internal consistency failure. Structurally unreachable while the reserve/claim discipline
    /// holds; treated as a fatal bug, never retried.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl AllocationError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_state(kind: &'static str, id: impl ToString, expected: &'static str, actual: impl ToString) -> Self {
        Self::InvalidState {
            kind,
            id: id.to_string(),
            expected,
            actual: actual.to_string(),
        }
    }

    /// Errors caused by the caller, as opposed to engine faults.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::InvariantViolation(_))
    }
}
