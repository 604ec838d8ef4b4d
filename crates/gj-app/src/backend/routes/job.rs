use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use gj_core::{Error, GenerateOptions};
use tracing::info;

use crate::backend::schemas::GenerateResponse;
use crate::backend::state::GenState;
use crate::error::AppError;

/// Body is the raw image file. An empty body means no image was sent.
/// Artifacts are fetched afterwards through the returned `/artifacts` urls.
pub async fn generate(
    State(state): State<Arc<GenState>>,
    Query(options): Query<GenerateOptions>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, AppError> {
    info!(bytes = body.len(), ?options, "generation requested");

    let image = if body.is_empty() {
        None
    } else {
        let decoded = image::load_from_memory(&body)
            .map_err(|e| Error::InvalidInput(format!("cannot decode input image: {}", e)))?;
        Some(decoded)
    };

    let result = state.dispatcher.submit(image.as_ref(), &options).await?;
    Ok(Json(GenerateResponse::new(result)))
}
