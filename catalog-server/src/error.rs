//! API error types and their HTTP mapping.
//!
//! Every handler returns `Result<_, ApiError>`; the [`IntoResponse`] impl
//! maps each kind to its status code with a structured JSON body. Approval
//! gating is an explicit first-class outcome (202 with the request id and a
//! `Location` header), not an error from the client's point of view, but it
//! rides the same channel so handlers can short-circuit with `?`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalog_core::error::CoreError;
use catalog_core::validation::LayerResult;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad input; carries the per-layer breakdown when validation produced one.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        layers: Vec<LayerResult>,
    },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Identity missing entirely.
    #[error("unauthorised: {message}")]
    Unauthorised { message: String },

    /// Identity present but role insufficient.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// A gated action created an approval request instead of executing.
    #[error("approval required: {approval_id}")]
    ApprovalRequired { approval_id: String },

    /// The requested capability facet is not implemented by the plugin.
    #[error("not implemented: {message}")]
    NotImplemented { message: String },

    /// A dependency is unreachable; retried in the background for refresh,
    /// surfaced as 503 for user-triggered calls.
    #[error("service unavailable: {message}")]
    Transient { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { what } => ApiError::NotFound { message: what },
            CoreError::Conflict { message } => ApiError::Conflict { message },
            CoreError::Invalid { message } => ApiError::BadRequest { message },
            CoreError::SecretMissing { name, key } => ApiError::BadRequest {
                message: format!("secret {name}/{key} could not be resolved"),
            },
            CoreError::Unsupported { message } => ApiError::NotImplemented { message },
            CoreError::Source { message } => ApiError::Transient { message },
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation { message, layers } => {
                let body = Json(json!({
                    "error": "validation_failed",
                    "message": message,
                    "layers": layers,
                }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            ApiError::ApprovalRequired { approval_id } => {
                let body = Json(json!({
                    "status": "approval-pending",
                    "approvalId": approval_id,
                }));
                let location = format!("/api/governance/v1alpha1/approvals/{approval_id}");
                (
                    StatusCode::ACCEPTED,
                    [(header::LOCATION, location)],
                    body,
                )
                    .into_response()
            }
            ApiError::Internal { message } => {
                // Details stay in the server log; the client gets a
                // correlation id.
                let correlation_id = uuid::Uuid::new_v4().to_string();
                tracing::error!(correlation_id = %correlation_id, "internal error: {message}");
                let body = Json(json!({
                    "error": "internal",
                    "message": "internal server error",
                    "correlationId": correlation_id,
                }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
            other => {
                let (status, error) = match &other {
                    ApiError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
                    ApiError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                    ApiError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
                    ApiError::Unauthorised { .. } => (StatusCode::UNAUTHORIZED, "unauthorised"),
                    ApiError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
                    ApiError::NotImplemented { .. } => {
                        (StatusCode::NOT_IMPLEMENTED, "not_implemented")
                    }
                    ApiError::Transient { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
                    }
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                };
                let message = match &other {
                    ApiError::BadRequest { message }
                    | ApiError::NotFound { message }
                    | ApiError::Conflict { message }
                    | ApiError::Unauthorised { message }
                    | ApiError::Forbidden { message }
                    | ApiError::NotImplemented { message }
                    | ApiError::Transient { message } => message.clone(),
                    _ => other.to_string(),
                };
                let body = Json(json!({"error": error, "message": message}));
                (status, body).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_api_kinds() {
        assert!(matches!(
            ApiError::from(CoreError::not_found("x")),
            ApiError::NotFound { .. }
        ));
        assert!(matches!(
            ApiError::from(CoreError::conflict("x")),
            ApiError::Conflict { .. }
        ));
        assert!(matches!(
            ApiError::from(CoreError::invalid("x")),
            ApiError::BadRequest { .. }
        ));
        assert!(matches!(
            ApiError::from(CoreError::source("x")),
            ApiError::Transient { .. }
        ));
    }
}
