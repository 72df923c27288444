use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug)]
pub enum AppError {
    // setup / registration errors, raised before any request is served
    Config(String),
    MissingArgument(String),

    // trust layer errors; the launch middleware turns these into redirects
    UnregisteredPlatform(String),
    IssuerMismatch(String),
    MalformedToken(String),
    BadSignature,
    UnknownKeyId(String),
    InvalidClaims(String),
    MissingSession(String),

    // explicit api errors
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),

    Store(StoreError),

    // catch-all
    Internal(anyhow::Error),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_argument(msg: impl Into<String>) -> Self {
        Self::MissingArgument(msg.into())
    }

    pub fn unregistered_platform(iss: impl Into<String>) -> Self {
        Self::UnregisteredPlatform(iss.into())
    }

    pub fn malformed_token(msg: impl Into<String>) -> Self {
        Self::MalformedToken(msg.into())
    }

    pub fn invalid_claims(msg: impl Into<String>) -> Self {
        Self::InvalidClaims(msg.into())
    }

    pub fn missing_session(msg: impl Into<String>) -> Self {
        Self::MissingSession(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Errors the launch middleware routes to `session_timeout_route`;
    /// every other trust failure goes to `invalid_token_route`.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::MissingSession(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Config(msg) => {
                tracing::error!("configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::MissingArgument(msg) | AppError::BadRequest(msg) => {
                tracing::debug!("400 Bad Request: {}", msg);
                (StatusCode::BAD_REQUEST, msg)
            }
            AppError::UnregisteredPlatform(iss) => {
                tracing::debug!("401 unregistered platform: {}", iss);
                (StatusCode::UNAUTHORIZED, format!("Unregistered platform: {iss}"))
            }
            AppError::IssuerMismatch(msg) => {
                tracing::debug!("401 issuer mismatch: {}", msg);
                (StatusCode::UNAUTHORIZED, msg)
            }
            AppError::MalformedToken(msg) => {
                tracing::debug!("401 malformed token: {}", msg);
                (StatusCode::UNAUTHORIZED, msg)
            }
            AppError::BadSignature => {
                tracing::debug!("401 bad token signature");
                (StatusCode::UNAUTHORIZED, "Invalid token signature".to_string())
            }
            AppError::UnknownKeyId(kid) => {
                tracing::debug!("401 unknown key id: {}", kid);
                (StatusCode::UNAUTHORIZED, format!("Unknown key id: {kid}"))
            }
            AppError::InvalidClaims(msg) => {
                tracing::debug!("401 invalid claims: {}", msg);
                (StatusCode::UNAUTHORIZED, msg)
            }
            AppError::MissingSession(msg) | AppError::Unauthorized(msg) => {
                tracing::debug!("401 Unauthorized: {}", msg);
                (StatusCode::UNAUTHORIZED, msg)
            }
            AppError::NotFound(msg) => {
                tracing::debug!("404 Not Found: {}", msg);
                (StatusCode::NOT_FOUND, msg)
            }
            AppError::Store(err) => {
                tracing::debug!("store error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::Internal(err) => {
                tracing::error!(
                    error = %err,
                    error_chain = ?err.chain().collect::<Vec<_>>(),
                    "Internal server error occurred"
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

pub trait OptionExt<T> {
    fn or_bad_request(self, msg: impl Into<String>) -> Result<T, AppError>;
    fn or_missing_argument(self, msg: impl Into<String>) -> Result<T, AppError>;
    fn or_missing_session(self, msg: impl Into<String>) -> Result<T, AppError>;
    fn or_unauthorized(self, msg: impl Into<String>) -> Result<T, AppError>;
    fn or_not_found(self, msg: impl Into<String>) -> Result<T, AppError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_bad_request(self, msg: impl Into<String>) -> Result<T, AppError> {
        self.ok_or_else(|| AppError::bad_request(msg))
    }

    fn or_missing_argument(self, msg: impl Into<String>) -> Result<T, AppError> {
        self.ok_or_else(|| AppError::missing_argument(msg))
    }

    fn or_missing_session(self, msg: impl Into<String>) -> Result<T, AppError> {
        self.ok_or_else(|| AppError::missing_session(msg))
    }

    fn or_unauthorized(self, msg: impl Into<String>) -> Result<T, AppError> {
        self.ok_or_else(|| AppError::unauthorized(msg))
    }

    fn or_not_found(self, msg: impl Into<String>) -> Result<T, AppError> {
        self.ok_or_else(|| AppError::not_found(msg))
    }
}
