use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Uniform error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "error": "Not Found",
    "message": "Not found: order 550e8400-e29b-41d4-a716-446655440000",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// Always `false`; lets the storefront branch on one field for every endpoint
    pub success: bool,
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional diagnostics (provider payloads, validation details)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
    /// Set when the caller may safely repeat the request later
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Checkout step that failed, reported with [`ServiceError::CheckoutFailed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStage {
    CreateLocalOrder,
    Authenticate,
    CreateRemoteOrder,
    LinkRemoteOrder,
    CreatePaymentKey,
    BuildPaymentUrl,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment provider authentication failed: {0}")]
    AuthError(String),

    #[error("Payment provider error: {message}")]
    ProviderError {
        message: String,
        status: Option<u16>,
        payload: Option<Value>,
    },

    #[error("Reconciliation pending: {0}")]
    ReconciliationError(String),

    #[error("Checkout failed at {stage}: {source}")]
    CheckoutFailed {
        stage: CheckoutStage,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Provider failure that carries the raw response body for diagnostics.
    pub fn provider(message: impl Into<String>, status: Option<u16>, payload: Option<Value>) -> Self {
        ServiceError::ProviderError {
            message: message.into(),
            status,
            payload,
        }
    }

    /// Wraps a step failure into the single error surfaced by checkout.
    pub fn checkout_failed(stage: CheckoutStage, source: ServiceError) -> Self {
        ServiceError::CheckoutFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::CheckoutFailed { .. }
            | Self::ConfigError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::AuthError(_) | Self::ProviderError { .. } => StatusCode::BAD_GATEWAY,
            Self::ReconciliationError(_) => StatusCode::CONFLICT,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CheckoutFailed { .. } => "Payment processing failed".to_string(),
            Self::ConfigError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::AuthError(_) => "Failed to authenticate with payment provider".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the caller may repeat the same request and expect progress.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ReconciliationError(_))
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::ProviderError {
                status, payload, ..
            } => Some(serde_json::json!({
                "provider_status": status,
                "provider_response": payload,
            })),
            Self::CheckoutFailed { stage, .. } => Some(serde_json::json!({ "stage": stage })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            Self::ValidationError(_) | Self::NotFound(_) => {}
            Self::ReconciliationError(msg) => warn!(error = %msg, "reconciliation not yet possible"),
            Self::ProviderError {
                message,
                status,
                payload,
            } => error!(%message, ?status, ?payload, "payment provider error"),
            other => error!(error = %other, "request failed"),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();

        // Build standardized error response
        let err = ErrorResponse {
            success: false,
            error: match &self {
                // storefront shows this field verbatim after a failed checkout
                Self::CheckoutFailed { .. } => self.response_message(),
                _ => status.canonical_reason().unwrap_or("Error").to_string(),
            },
            message: self.response_message(),
            details: self.details(),
            retryable: self.is_retryable().then_some(true),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
