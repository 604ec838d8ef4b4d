use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::backend::schemas::{ExamplesResponse, HealthResponse};
use crate::backend::state::GenState;
use crate::error::AppError;

const EXAMPLE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

pub async fn health(State(state): State<Arc<GenState>>) -> Json<HealthResponse> {
    let gate = state.dispatcher.gate();
    Json(HealthResponse {
        status: "ok".to_string(),
        concurrency_id: gate.id().to_string(),
        slots: gate.slots(),
        available_slots: gate.available(),
    })
}

pub async fn list_examples(
    State(state): State<Arc<GenState>>,
) -> Result<Json<ExamplesResponse>, AppError> {
    let examples = match &state.examples_dir {
        Some(dir) => example_images(dir).await?,
        None => Vec::new(),
    };
    Ok(Json(ExamplesResponse { examples }))
}

async fn example_images(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        AppError::BackendError(format!("cannot read examples in {}: {}", dir.display(), e))
    })?;

    let mut images = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::BackendError(e.to_string()))?
    {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXAMPLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}
