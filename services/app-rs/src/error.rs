//! The closed error taxonomy for the API surface.
//!
//! Every failure an endpoint can surface maps to exactly one code and one
//! HTTP status, rendered as `{"error": {"code", "message"}}`. Messages stay
//! short and stable; UIs branch on them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[allow(dead_code)] // token/email variants belong to the auth collaborator's surface
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Access denied")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests")]
    RateLimited,
    #[error("Something went wrong")]
    Internal(#[source] anyhow::Error),
    #[error("This link has expired")]
    TokenExpired,
    #[error("This link is invalid")]
    TokenInvalid,
    #[error("This link has already been used")]
    TokenConsumed,
    #[error("Could not send email")]
    EmailSendFailed,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenConsumed => "TOKEN_CONSUMED",
            Self::EmailSendFailed => "EMAIL_SEND_FAILED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid | Self::TokenConsumed => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) | Self::EmailSendFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref err) = self {
            tracing::error!("internal error: {err:#}");
        }
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mirrors_code_class() {
        assert_eq!(
            ApiError::Validation("bad range".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::NotFound("Short link not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_error_message_is_generic() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.5"));
        assert_eq!(err.to_string(), "Something went wrong");
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
