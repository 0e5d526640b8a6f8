use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Method not allowed")]
    MethodNotAllowed { allowed: &'static [&'static str] },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON body returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

// HTTP status code mapping
impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::MalformedRequest(_) => "MALFORMED_REQUEST",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            AppError::Processing(_) => "PROCESSING_ERROR",
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Short, caller-facing summary placed in the `error` field.
    pub fn summary(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "Server configuration error",
            AppError::MalformedRequest(_) => "Invalid webhook event",
            AppError::Authentication(_) => "Invalid signature",
            AppError::MethodNotAllowed { .. } => "Method not allowed",
            _ => "Internal server error",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            AppError::Configuration(msg)
            | AppError::MalformedRequest(msg)
            | AppError::Authentication(msg)
            | AppError::Processing(msg)
            | AppError::Internal(msg) => Some(msg.clone()),
            AppError::Redis(err) => Some(err.to_string()),
            AppError::MethodNotAllowed { .. } => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let allowed = match self {
            AppError::MethodNotAllowed { allowed } => {
                Some(allowed.iter().map(|m| m.to_string()).collect())
            }
            _ => None,
        };

        ErrorBody {
            error: self.summary().to_string(),
            message: self.detail(),
            allowed,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        } else {
            tracing::warn!(code = self.error_code(), error = %self, "request rejected");
        }

        let mut response = (status, Json(self.to_body())).into_response();
        if let AppError::MethodNotAllowed { allowed } = &self {
            if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Configuration("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::MalformedRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Authentication("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::MethodNotAllowed { allowed: &["POST"] }.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(AppError::Processing("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_backend_failures_surface_as_internal_error() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        for err in [
            AppError::Redis(redis_err),
            AppError::Processing("handler failed".into()),
            AppError::Internal("x".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(err.summary(), "Internal server error");
        }
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(AppError::Authentication("Webhook signature verification failed".into()).to_body()).unwrap();
        assert_eq!(body["error"], "Invalid signature");
        assert_eq!(body["message"], "Webhook signature verification failed");
        assert!(body.get("allowed").is_none());

        let body = serde_json::to_value(AppError::MethodNotAllowed { allowed: &["POST"] }.to_body()).unwrap();
        assert_eq!(body["error"], "Method not allowed");
        assert_eq!(body["allowed"], serde_json::json!(["POST"]));
        assert!(body.get("message").is_none());
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let response = AppError::MethodNotAllowed { allowed: &["POST"] }.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "POST");
    }
}
