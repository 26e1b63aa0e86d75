use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    questions::SupplyError,
    state::{AbortError, ApplyError, PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The round cannot start yet.
    #[error("need at least 2 players, all ready, host included (players: {players}, ready: {ready})")]
    InsufficientPlayers {
        /// Players currently in the session.
        players: usize,
        /// Players flagged ready.
        ready: usize,
    },
    /// The player is not part of the session.
    #[error("unknown player {0}")]
    UnknownPlayer(Uuid),
    /// The event is not allowed in the current phase.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// Fetching a question from the supply failed.
    #[error(transparent)]
    QuestionFetchFailed(#[from] SupplyError),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The game was torn down while the request was in flight.
    #[error("game {0} is closed")]
    GameClosed(String),
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::Unprocessable(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("{details}")]
    NotFound {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable description.
        details: String,
    },
    /// Conflict with current state.
    #[error("{details}")]
    Conflict {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable description.
        details: String,
    },
    /// Request body failed validation.
    #[error("{0}")]
    Unprocessable(String),
    /// The question generator failed or produced unusable output.
    #[error("{details}")]
    BadGateway {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable description.
        details: String,
    },
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "InvalidInput",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Unprocessable(_) => "ValidationFailed",
            AppError::NotFound { kind, .. }
            | AppError::Conflict { kind, .. }
            | AppError::BadGateway { kind, .. } => *kind,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let details = err.to_string();
        match err {
            ServiceError::InsufficientPlayers { .. } => AppError::Conflict {
                kind: "InsufficientPlayers",
                details,
            },
            ServiceError::UnknownPlayer(_) => AppError::NotFound {
                kind: "UnknownPlayer",
                details,
            },
            ServiceError::InvalidTransition(_) => AppError::Conflict {
                kind: "InvalidTransition",
                details,
            },
            ServiceError::QuestionFetchFailed(source) => AppError::BadGateway {
                kind: source.kind(),
                details,
            },
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(_) => AppError::NotFound {
                kind: "NotFound",
                details,
            },
            ServiceError::GameClosed(_) => AppError::NotFound {
                kind: "GameClosed",
                details,
            },
        }
    }
}

/// JSON body of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable error kind, e.g. `InsufficientPlayers`.
    pub error: &'static str,
    /// Human-readable description.
    pub details: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        };

        let payload = Json(ErrorBody {
            error: self.kind(),
            details: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidTransition("a round is already starting".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidTransition(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => {
                ServiceError::InvalidTransition("no round is starting".into())
            }
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidTransition("pending start does not match".into())
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidTransition("no pending start".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidTransition("pending start does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use super::*;
    use crate::questions::GeneratorError;

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn generation_failure_maps_to_bad_gateway() {
        let err =
            ServiceError::from(SupplyError::GenerationFailed(GeneratorError::EmptyCompletion));
        let (status, body) = render(err.into()).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "GenerationFailed");
        assert!(body["details"].as_str().unwrap().contains("empty completion"));
    }

    #[tokio::test]
    async fn usage_errors_keep_their_kind() {
        let (status, body) = render(
            ServiceError::InsufficientPlayers {
                players: 1,
                ready: 1,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "InsufficientPlayers");

        let (status, body) = render(ServiceError::UnknownPlayer(Uuid::nil()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "UnknownPlayer");
    }
}
