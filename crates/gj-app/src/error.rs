use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gj_core::{FailureKind, JobResult};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Generation(#[from] gj_core::Error),

    #[error("Error from backend: {0}")]
    BackendError(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Generation(err) => match err.kind() {
                FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
                FailureKind::JobTimeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Generation(err) => (status, Json(JobResult::failure(&err))).into_response(),
            Self::BackendError(message) | Self::NotFound(message) => {
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}
