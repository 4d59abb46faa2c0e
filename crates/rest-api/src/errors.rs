use axum::http::StatusCode;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum EngineAPIError {
    #[error("engine {0} not found")]
    NotFound(String),

    #[error("engine {0} is already stopped")]
    AlreadyStopped(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

pub fn engine_error(err: EngineAPIError) -> (StatusCode, String) {
    let status = match err {
        EngineAPIError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineAPIError::AlreadyStopped(_) => StatusCode::CONFLICT,
        EngineAPIError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = ?err, "engine control operation failed");
    } else {
        warn!(error = %err, "engine control request rejected");
    }
    (status, err.to_string())
}
