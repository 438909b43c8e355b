//! Unified API error handling for SoftZen.
//!
//! Every handler returns `Result<_, ApiError>`. The wire format is a flat JSON
//! object with a human-readable `error`, a `type` discriminator and, depending
//! on the type, `field`, `code` or `retryable`:
//!
//! ```text
//! validation_error  400      {error, field, code, type}
//! network_error     status   {error, type, retryable}
//! auth_error        401/403  {error, type}
//! not_found         404      {error, type}
//! conflict          409      {error, code, type}
//! business_rule     400/404  {error, code, type}
//! timeout           408      {error, type}
//! server_error      500      {error, type}
//! ```

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::validation::{ValidationCode, ValidationError};
use crate::retry::NetworkError;

/// Discriminator sent as the `type` field of an error body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ValidationError,
    NetworkError,
    AuthError,
    NotFound,
    Conflict,
    BusinessRule,
    Timeout,
    ServerError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ValidationError => "validation_error",
            ErrorType::NetworkError => "network_error",
            ErrorType::AuthError => "auth_error",
            ErrorType::NotFound => "not_found",
            ErrorType::Conflict => "conflict",
            ErrorType::BusinessRule => "business_rule",
            ErrorType::Timeout => "timeout",
            ErrorType::ServerError => "server_error",
        }
    }
}

/// Business-rule failures with a stable machine code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCode {
    SeriesCompleted,
    SeriesInUse,
    EmailExists,
    SeriesNameExists,
    NoSeriesAssigned,
    InvalidCredentials,
    AccountDisabled,
}

impl RuleCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCode::SeriesCompleted => "SERIES_COMPLETED",
            RuleCode::SeriesInUse => "SERIES_IN_USE",
            RuleCode::EmailExists => "EMAIL_EXISTS",
            RuleCode::SeriesNameExists => "SERIES_NAME_EXISTS",
            RuleCode::NoSeriesAssigned => "NO_SERIES_ASSIGNED",
            RuleCode::InvalidCredentials => "INVALID_CREDENTIALS",
            RuleCode::AccountDisabled => "ACCOUNT_DISABLED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RuleCode::SeriesCompleted => StatusCode::BAD_REQUEST,
            RuleCode::SeriesInUse | RuleCode::EmailExists | RuleCode::SeriesNameExists => StatusCode::CONFLICT,
            RuleCode::NoSeriesAssigned => StatusCode::NOT_FOUND,
            RuleCode::InvalidCredentials => StatusCode::UNAUTHORIZED,
            RuleCode::AccountDisabled => StatusCode::FORBIDDEN,
        }
    }

    fn error_type(&self) -> ErrorType {
        match self.status_code() {
            StatusCode::CONFLICT => ErrorType::Conflict,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorType::AuthError,
            _ => ErrorType::BusinessRule,
        }
    }
}

/// Unified API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Missing credentials (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Bad credentials or wrong role (403)
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Rule { code: RuleCode, message: String },

    #[error("Request timed out")]
    Timeout,

    /// Detail is logged, never sent to the client
    #[error("{0}")]
    Internal(String),
}

/// Wire representation of an error
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorBody {
    pub fn new(error_type: ErrorType, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type,
            field: None,
            code: None,
            retryable: None,
        }
    }

    /// Generic 500 body, also used for caught panics
    pub fn server_error() -> Self {
        Self::new(ErrorType::ServerError, "Internal server error")
    }
}

impl ApiError {
    // -------------------------------------------------------------------------
    // Convenience constructors
    // -------------------------------------------------------------------------

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn rule(code: RuleCode, message: impl Into<String>) -> Self {
        Self::Rule {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Network(e) => {
                StatusCode::from_u16(e.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Rule { code, .. } => code.status_code(),
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Validation(e) => ErrorBody {
                field: Some(e.field.clone()),
                code: Some(e.code.as_str().to_string()),
                ..ErrorBody::new(ErrorType::ValidationError, e.message.clone())
            },
            ApiError::Network(e) => ErrorBody {
                retryable: Some(e.retryable),
                ..ErrorBody::new(ErrorType::NetworkError, e.message.clone())
            },
            ApiError::Unauthorized(msg) | ApiError::Forbidden(msg) => {
                ErrorBody::new(ErrorType::AuthError, msg.clone())
            }
            ApiError::NotFound(msg) => ErrorBody::new(ErrorType::NotFound, msg.clone()),
            ApiError::Rule { code, message } => ErrorBody {
                code: Some(code.as_str().to_string()),
                ..ErrorBody::new(code.error_type(), message.clone())
            },
            ApiError::Timeout => ErrorBody::new(ErrorType::Timeout, "Request timed out"),
            ApiError::Internal(_) => ErrorBody::server_error(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(detail) => tracing::error!(error = %detail, "Internal error"),
            ApiError::Network(e) => tracing::warn!(
                status = e.status_code,
                retryable = e.retryable,
                attempts = e.attempts,
                "Data access failed: {}",
                e.message
            ),
            _ => {}
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

// -------------------------------------------------------------------------
// Conversion implementations for common error types
// -------------------------------------------------------------------------

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("Resource not found"),
            _ => ApiError::internal(format!("Database error: {}", err)),
        }
    }
}

/// Prefix axum puts in front of the serde error of a mistyped body
const JSON_DATA_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

/// Split a body-deserialization error into the offending field path and the
/// serde message. Errors on the document root carry no path.
fn split_json_path(detail: &str) -> Option<(&str, &str)> {
    let (path, message) = detail.split_once(": ")?;
    let is_path = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '?'));
    is_path.then_some((path, message))
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let text = err.body_text();
                let detail = text.strip_prefix(JSON_DATA_PREFIX).unwrap_or(&text);
                let err = match split_json_path(detail) {
                    Some((field, message)) => {
                        ValidationError::new(field, ValidationCode::Format, format!("Invalid value for {}: {}", field, message))
                    }
                    None => ValidationError::new("body", ValidationCode::Format, format!("Invalid request body: {}", detail)),
                };
                ApiError::Validation(err)
            }
            JsonRejection::JsonSyntaxError(_) => {
                ValidationError::new("body", ValidationCode::Format, "Request body is not valid JSON").into()
            }
            JsonRejection::MissingJsonContentType(_) => ValidationError::new(
                "body",
                ValidationCode::Format,
                "Expected request with `Content-Type: application/json`",
            )
            .into(),
            other => ApiError::internal(format!("Failed to read request body: {}", other.body_text())),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_error_body() {
        let err: ApiError = ValidationError::new("age", ValidationCode::OutOfRange, "Age must be between 1 and 120").into();
        let (status, body) = render(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "validation_error");
        assert_eq!(body["field"], "age");
        assert_eq!(body["code"], "OUT_OF_RANGE");
        assert_eq!(body["error"], "Age must be between 1 and 120");
    }

    #[tokio::test]
    async fn test_network_error_uses_its_status() {
        let err: ApiError = NetworkError {
            message: "database is locked (after 4 attempts)".into(),
            retryable: true,
            status_code: 503,
            attempts: 4,
        }
        .into();
        let (status, body) = render(err).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["type"], "network_error");
        assert_eq!(body["retryable"], true);
        assert!(body.get("field").is_none());
    }

    #[tokio::test]
    async fn test_rule_errors() {
        let (status, body) = render(ApiError::rule(RuleCode::SeriesInUse, "Series is assigned")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "SERIES_IN_USE");
        assert_eq!(body["type"], "conflict");

        let (status, body) = render(ApiError::rule(RuleCode::SeriesCompleted, "Done")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "business_rule");

        let (status, body) = render(ApiError::rule(RuleCode::InvalidCredentials, "Bad login")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "auth_error");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let (status, body) = render(ApiError::internal("no such table: patients")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["type"], "server_error");
    }

    #[tokio::test]
    async fn test_auth_and_timeout() {
        let (status, body) = render(ApiError::unauthorized("Access token required")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "auth_error");

        let (status, _) = render(ApiError::forbidden("Invalid token")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = render(ApiError::Timeout).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["type"], "timeout");
    }

    #[test]
    fn test_split_json_path() {
        assert_eq!(
            split_json_path("name: invalid type: integer `12345`, expected a string"),
            Some(("name", "invalid type: integer `12345`, expected a string"))
        );
        assert_eq!(
            split_json_path("postures[0].name: invalid type: null"),
            Some(("postures[0].name", "invalid type: null"))
        );
        assert_eq!(split_json_path("invalid type: sequence, expected struct RegisterRequest"), None);
        assert_eq!(split_json_path("EOF while parsing"), None);
    }

    #[test]
    fn test_sqlx_conversion() {
        assert!(matches!(ApiError::from(sqlx::Error::RowNotFound), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from(sqlx::Error::PoolTimedOut), ApiError::Internal(_)));
    }
}
