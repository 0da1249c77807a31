use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// Request-terminal failures surfaced to HTTP clients as 4xx/5xx.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No active account found with the given credentials.")]
    InvalidCredentials,
    #[error("Authentication credentials were not provided.")]
    NotAuthenticated,
    #[error("No refresh token provided.")]
    MissingRefreshToken,
    #[error("Invalid or expired refresh token.")]
    InvalidOrExpiredRefreshToken,
    #[error("Token invalid.")]
    TokenInvalid,
    #[error("You have already joined this league.")]
    AlreadyJoined,
    #[error("Free plan users cannot create leagues. Upgrade your plan.")]
    PlanRestricted,
    #[error("{0}")]
    LimitExceeded(String),
    #[error("{0} not found.")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingRefreshToken
            | ApiError::AlreadyJoined
            | ApiError::LimitExceeded(_)
            | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::NotAuthenticated
            | ApiError::InvalidOrExpiredRefreshToken
            | ApiError::TokenInvalid => StatusCode::UNAUTHORIZED,
            ApiError::PlanRestricted => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Internal(err) => {
                error!(error = %err, "internal error while handling request");
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}
