use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::Collection;

/// Bad input caught at the boundary. Never reaches the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("grade must be a valid number (e.g. 95.5), got {0:?}")]
    InvalidGrade(String),

    #[error("grade must be between 0 and 110, got {0}")]
    GradeOutOfRange(f64),

    #[error("credits must be between 0 and 10 in steps of 0.5, got {0}")]
    InvalidCredits(f64),

    #[error("grade level must be one of 9, 10, 11, 12, got {0}")]
    InvalidGradeLevel(u8),

    #[error("end time cannot be before start time")]
    EndBeforeStart,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Remote write to {collection} failed: {message}")]
    RemoteWrite {
        collection: Collection,
        message: String,
    },

    #[error("Subscription to {collection} failed: {message}")]
    Subscription {
        collection: Collection,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error")]
    InternalServerError,
}

impl AppError {
    pub fn remote_write(collection: Collection, err: impl std::fmt::Display) -> Self {
        AppError::RemoteWrite {
            collection,
            message: err.to_string(),
        }
    }

    pub fn subscription(collection: Collection, err: impl std::fmt::Display) -> Self {
        AppError::Subscription {
            collection,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Serialization(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            e @ (AppError::RemoteWrite { .. }
            | AppError::Subscription { .. }
            | AppError::Upstream(_)
            | AppError::Http(_)) => {
                error!("upstream error: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Database(e) => {
                error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::Config(msg) => {
                error!("configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: error_message,
        });

        (status, body).into_response()
    }
}
