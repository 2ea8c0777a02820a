//! API error type and its mapping to HTTP responses.
//!
//! Every failure leaves the service as `{"error": {"code", "message", "details"?}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::extractor::ExtractionError;
use crate::fetch::FetchError;
use crate::openrouter::{GatewayError, GatewayErrorKind};
use crate::schema::ExtractionValidationResult;
use crate::sites::UrlRejection;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn daily_limit_exceeded(limit: u32) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "DAILY_LIMIT_EXCEEDED",
            format!("Daily extraction limit of {} reached. Try again tomorrow.", limit),
        )
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        error!("Storage failure: {:?}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORAGE_ERROR",
            "Could not access extraction records.",
        )
    }

    /// The model answered, but not with a usable recipe.
    pub fn extraction_failed(result: &ExtractionValidationResult) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "AI_EXTRACTION_ERROR",
            "Could not extract the recipe. Fill in the form manually.",
        )
        .with_details(json!({
            "warnings": result.warnings,
            "extracted_data": result.data,
        }))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<UrlRejection> for ApiError {
    fn from(err: UrlRejection) -> Self {
        let code = match err {
            UrlRejection::Invalid(_) => "INVALID_URL",
            UrlRejection::UnsupportedDomain(_) => "UNSUPPORTED_DOMAIN",
        };
        Self::new(StatusCode::BAD_REQUEST, code, err.to_string())
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let message = err.to_string();
        match err {
            FetchError::Timeout(_) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "SCRAPING_TIMEOUT", message)
            }
            ref e if e.is_access_denied() => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "SCRAPING_ACCESS_DENIED",
                format!("{}. Paste the recipe text instead.", message),
            ),
            _ => Self::new(StatusCode::BAD_GATEWAY, "SCRAPING_ERROR", message),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match err.kind {
            GatewayErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayErrorKind::ServiceUnavailable | GatewayErrorKind::Connection => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayErrorKind::Validation
            | GatewayErrorKind::Auth
            | GatewayErrorKind::InvalidRequest
            | GatewayErrorKind::NotFound
            | GatewayErrorKind::Api => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.kind.code(), err.message)
            .with_details(json!({ "provider_status": err.status }))
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Url(e) => e.into(),
            ExtractionError::Fetch(e) => e.into(),
            ExtractionError::Gateway(e) => e.into(),
            ExtractionError::Reduce(e) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_CONTENT",
                e.to_string(),
            ),
            ExtractionError::Parse(e) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "AI_EXTRACTION_ERROR",
                format!("The AI returned an unreadable response: {}", e),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{} ({})", self, self.status);
        } else {
            warn!("{} ({})", self, self.status);
        }

        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }

        (self.status, Json(json!({ "error": error }))).into_response()
    }
}
