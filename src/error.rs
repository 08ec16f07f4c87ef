//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::ResponsibilityUnit;

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or incomplete input; fix and resubmit
    #[error("Validation error: {0}")]
    Validation(String),

    /// The exclusivity invariant would be violated; pick other units
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        units: Vec<ResponsibilityUnit>,
    },

    /// Lifecycle change not reachable from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(units: Vec<ResponsibilityUnit>) -> Self {
        let listed = units
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        AppError::Conflict {
            message: format!("Already assigned: {}", listed),
            units,
        }
    }

    /// Short machine-readable kind for clients
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Conflict { .. } => "conflict",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::Database(_) => "database",
            AppError::Schema(_) => "schema",
            AppError::Notification(_) => "notification",
            AppError::NotFound(_) => "not_found",
            AppError::Gone(_) => "gone",
            AppError::Internal(_) => "internal",
        }
    }

    /// Units the operator has to pick again, if any
    pub fn conflicting_units(&self) -> &[ResponsibilityUnit] {
        match self {
            AppError::Conflict { units, .. } => units,
            _ => &[],
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Schema(e) => {
                tracing::error!("Schema error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("Schema error: {}", e))
            }
            AppError::Notification(e) => {
                tracing::warn!("Notification error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("Notification error: {}", e))
            }
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::Conflict { message, .. } => (StatusCode::CONFLICT, message.clone()),
            AppError::InvalidTransition(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.clone()),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            AppError::Gone(e) => (StatusCode::GONE, e.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
        };

        let mut body = serde_json::json!({
            "error": message,
            "kind": self.kind(),
        });
        if let AppError::Conflict { units, .. } = &self {
            body["units"] = serde_json::to_value(units).unwrap_or_default();
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
