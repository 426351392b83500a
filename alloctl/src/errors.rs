use crate::engine::error::AllocationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

/// Handler error. Every handler failure originates in the allocation engine; this type owns the
/// mapping from engine errors to HTTP responses.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Error reported by the allocation engine
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Allocation(err) => match err {
                AllocationError::Validation(_) | AllocationError::UnknownResourceType(_) => StatusCode::BAD_REQUEST,
                AllocationError::NotFound { .. } => StatusCode::NOT_FOUND,
                AllocationError::AlreadyClosed(_) | AllocationError::InvalidState { .. } | AllocationError::DuplicateId { .. } => {
                    StatusCode::CONFLICT
                }
                AllocationError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Allocation(AllocationError::InvariantViolation(_)) => "Internal server error".to_string(),
            Error::Allocation(err) => err.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Internal service error: {:#}", self);
        } else if status == StatusCode::CONFLICT {
            tracing::warn!("Conflict error: {}", self);
        } else {
            tracing::debug!("Client error: {}", self);
        }

        match &self {
            Error::Allocation(AllocationError::AlreadyClosed(_) | AllocationError::InvalidState { .. }) => {
                let body = json!({ "message": self.user_message() });
                (status, axum::response::Json(body)).into_response()
            }
            _ => (status, self.user_message()).into_response(),
        }
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;
