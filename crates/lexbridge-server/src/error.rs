use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use lexbridge_cases::CaseError;
use lexbridge_shared::error::AuthError;
use lexbridge_store::StoreError;

/// Failures of a gateway handler. None of these closes the connection; the
/// session gets an `error` event with [`GatewayError::code`] and carries on.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("Not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::AccessDenied => "access_denied",
            GatewayError::NotFound => "not_found",
            GatewayError::Validation(_) => "validation",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::StoreUnavailable(_) => "store_unavailable",
            GatewayError::Internal(_) => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::StoreUnavailable(_))
    }

    /// Text sent to the client. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => GatewayError::NotFound,
            StoreError::Unavailable(reason) => GatewayError::StoreUnavailable(reason),
            StoreError::Poisoned => GatewayError::StoreUnavailable(e.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        GatewayError::Unauthenticated(e.to_string())
    }
}

/// Error body of the HTTP API: `{"error": "...", "code": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("Concurrent update, try again")]
    Conflict,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Store unavailable")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code: "invalid_input",
            message: message.into(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::BadRequest { code, .. } => *code,
            ApiError::Conflict => "conflict",
            ApiError::RateLimited => "rate_limited",
            ApiError::Unavailable => "store_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<CaseError> for ApiError {
    fn from(e: CaseError) -> Self {
        match e {
            CaseError::NotFound => ApiError::NotFound,
            CaseError::Forbidden(reason) => ApiError::Forbidden(reason.to_string()),
            CaseError::Conflict => ApiError::Conflict,
            CaseError::StoreUnavailable(_) => ApiError::Unavailable,
            CaseError::Store(inner) => ApiError::Internal(inner.to_string()),
            other @ (CaseError::AlreadyOffered
            | CaseError::AlreadyResolved
            | CaseError::NotAvailable
            | CaseError::Blocked
            | CaseError::InvalidInput(_)) => ApiError::BadRequest {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unauthenticated(reason) => ApiError::Unauthenticated(reason),
            GatewayError::AccessDenied => ApiError::Forbidden("access denied".into()),
            GatewayError::NotFound => ApiError::NotFound,
            GatewayError::Validation(message) => ApiError::bad_request(message),
            GatewayError::RateLimited => ApiError::RateLimited,
            GatewayError::StoreUnavailable(_) => ApiError::Unavailable,
            GatewayError::Internal(reason) => ApiError::Internal(reason),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        GatewayError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: impl Into<ApiError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn case_errors_map_to_http_status() {
        assert_eq!(status_of(CaseError::AlreadyResolved), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(CaseError::AlreadyOffered), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(CaseError::NotAvailable), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(CaseError::Forbidden("no")), StatusCode::FORBIDDEN);
        assert_eq!(status_of(CaseError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(CaseError::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_of(CaseError::StoreUnavailable("timed out".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn gateway_errors_map_to_http_status() {
        assert_eq!(
            status_of(GatewayError::Unauthenticated("expired".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(GatewayError::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_of(GatewayError::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn store_errors_become_gateway_codes() {
        assert_eq!(GatewayError::from(StoreError::NotFound).code(), "not_found");
        let unavailable = GatewayError::from(StoreError::Unavailable("timed out".into()));
        assert_eq!(unavailable.code(), "store_unavailable");
        assert!(unavailable.is_transient());
        assert_eq!(GatewayError::Internal("disk".into()).client_message(), "Internal error");
    }
}
