use std::fmt;

use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Which side of the dual-store pair an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    CourseStore,
    Projection,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::CourseStore => "course_store",
            StoreKind::Projection => "projection",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "course_store" => Some(StoreKind::CourseStore),
            "projection" => Some(StoreKind::Projection),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            StoreKind::CourseStore => StoreKind::Projection,
            StoreKind::Projection => StoreKind::CourseStore,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The multi-store operation a caller has to retry after a partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Upsert,
    Delete,
    MergeAssignment,
    AssignClass,
    ClassMembership,
    Reconcile,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Upsert => "upsert",
            SyncOperation::Delete => "delete",
            SyncOperation::MergeAssignment => "merge_assignment",
            SyncOperation::AssignClass => "assign_class",
            SyncOperation::ClassMembership => "class_membership",
            SyncOperation::Reconcile => "reconcile",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upsert" => Some(SyncOperation::Upsert),
            "delete" => Some(SyncOperation::Delete),
            "merge_assignment" => Some(SyncOperation::MergeAssignment),
            "assign_class" => Some(SyncOperation::AssignClass),
            "class_membership" => Some(SyncOperation::ClassMembership),
            "reconcile" => Some(SyncOperation::Reconcile),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Optimistic version mismatch. Retried by `RetryPolicy` and surfaced as
    /// `Conflict` once the budget is spent.
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// The course row was refused because another course already uses the
    /// slug. The writer allocates a fresh one instead of retrying as is.
    #[error("Slug taken: {0}")]
    SlugTaken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Partial failure: {operation} did not reach {failed}")]
    PartialFailure {
        failed: StoreKind,
        operation: SyncOperation,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(StoreKind),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error")]
    InternalServerError,
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_) | AppError::VersionConflict(_))
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    /// Unique violation on one specific column, e.g. `courses.slug`.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db_err)) => {
                db_err.is_unique_violation() && db_err.message().contains(column)
            }
            _ => false,
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db_err)) => db_err.is_foreign_key_violation(),
            _ => false,
        }
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        AppError::NotFound(format!("{} {}", kind, id))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::StoreUnavailable(StoreKind::CourseStore)
            }
            other => AppError::Database(other),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("Not found: {}", msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) | AppError::VersionConflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::SlugTaken(slug) => (StatusCode::CONFLICT, format!("slug {} is already in use", slug)),
            AppError::Unauthorized(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "Missing or invalid credentials".to_string(),
            ),
            AppError::InvalidState(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::PartialFailure { failed, operation } => {
                error!("partial failure: {} did not reach {}", operation, failed);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Temporarily unavailable, try again".to_string(),
                )
            }
            AppError::StoreUnavailable(store) => {
                error!("store unavailable: {}", store);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Temporarily unavailable, try again".to_string(),
                )
            }
            AppError::Database(e) => {
                error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::Projection(msg) => {
                error!("projection error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Config(msg) => {
                error!("configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: error_message,
        });

        (status, body).into_response()
    }
}
