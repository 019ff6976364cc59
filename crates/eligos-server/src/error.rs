use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error, warn};

use eligos_hub::HubError;
use eligos_store::StoreError;

use crate::auth::AuthError;
use crate::config::ConfigError;

/// Error returned by HTTP handlers, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(_) => error!(error_code = code, message = %message, "API error"),
            ApiError::Unavailable(_) => warn!(error_code = code, message = %message, "service unavailable"),
            _ => debug!(error_code = code, message = %message, "client error"),
        }

        let body = json!({ "error": { "code": code, "message": message } });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingAuthHeader | AuthError::InvalidAuthHeader => {
                ApiError::Unauthorized("missing or invalid authorization".into())
            }
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(format!("invalid token: {msg}")),
            AuthError::TokenExpired => ApiError::Unauthorized("token has expired".into()),
            AuthError::InvalidCredentials => ApiError::Unauthorized("invalid credentials".into()),
            AuthError::Internal(msg) => ApiError::Internal(format!("auth: {msg}")),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_status() {
        assert_eq!(
            ApiError::from(StoreError::NotFound("space S1".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StoreError::Conflict("dup".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StoreError::Database("locked".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_errors_are_unauthorized() {
        for e in [AuthError::MissingAuthHeader, AuthError::TokenExpired, AuthError::InvalidCredentials] {
            assert_eq!(ApiError::from(e).error_code(), "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn response_body_shape() {
        let resp = ApiError::forbidden("not a member").into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert_eq!(body["error"]["message"], "forbidden: not a member");
    }
}
