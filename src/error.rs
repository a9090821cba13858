use axum::{
    Json,
    extract::ws::close_code,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{auth::AuthError, dao::storage::StorageError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

/// Why a WebSocket handshake was refused; surfaced to the client as a close frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeRejection {
    #[error("Missing token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Game not found")]
    GameNotFound,
    #[error("Not a participant")]
    NotParticipant,
    #[error("Game already finished")]
    GameClosed,
    #[error("Invalid matchmaking parameters")]
    InvalidParameters,
    #[error("Service unavailable")]
    Unavailable,
}

impl HandshakeRejection {
    /// Close code sent with the rejection.
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeRejection::Unavailable => close_code::ERROR,
            _ => close_code::INVALID,
        }
    }

    /// Client-visible close reason.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<AuthError> for HandshakeRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => HandshakeRejection::MissingToken,
            AuthError::InvalidToken | AuthError::Expired => HandshakeRejection::InvalidToken,
        }
    }
}

impl From<ServiceError> for HandshakeRejection {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => HandshakeRejection::GameNotFound,
            ServiceError::InvalidInput(_) => HandshakeRejection::InvalidParameters,
            ServiceError::InvalidState(_) => HandshakeRejection::GameClosed,
            ServiceError::Unavailable(_) | ServiceError::Degraded => {
                HandshakeRejection::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reasons_are_client_readable() {
        assert_eq!(HandshakeRejection::MissingToken.reason(), "Missing token");
        assert_eq!(
            HandshakeRejection::NotParticipant.reason(),
            "Not a participant"
        );
        assert_eq!(
            HandshakeRejection::GameNotFound.close_code(),
            close_code::INVALID
        );
        assert_eq!(
            HandshakeRejection::Unavailable.close_code(),
            close_code::ERROR
        );
    }

    #[test]
    fn expired_credentials_read_as_invalid() {
        assert_eq!(
            HandshakeRejection::from(AuthError::Expired),
            HandshakeRejection::InvalidToken
        );
        assert_eq!(
            HandshakeRejection::from(ServiceError::Degraded),
            HandshakeRejection::Unavailable
        );
    }
}
