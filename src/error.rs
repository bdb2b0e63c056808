use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job type: {0}")]
    InvalidJobType(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} has no failed items to retry")]
    NothingToRetry(String),

    #[error("Job {0} has exhausted its retry budget")]
    RetryExhausted(String),

    #[error("Node processing error: {0}")]
    Node(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::InvalidJobType(_) => StatusCode::BAD_REQUEST,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NothingToRetry(_) | AppError::RetryExhausted(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
