use std::io::ErrorKind;
use std::path::Component;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use gj_core::Error;
use gj_core::job::{MESH_EXTENSION, VIDEO_EXTENSION};

use crate::backend::state::GenState;
use crate::error::AppError;

const CONTENT_TYPES: [(&str, &str); 2] = [
    (MESH_EXTENSION, "model/gltf-binary"),
    (VIDEO_EXTENSION, "video/mp4"),
];

/// Serves a finished `.glb` or `.mp4` from the output directory.
pub async fn download_artifact(
    State(state): State<Arc<GenState>>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let content_type = content_type(&file)
        .ok_or_else(|| Error::InvalidInput(format!("'{}' is not an artifact name", file)))?;

    let path = state.dispatcher.output_dir().join(&file);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(AppError::NotFound(file)),
        Err(e) => {
            return Err(AppError::BackendError(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )));
        }
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// Only a bare file name with an artifact extension is accepted.
fn content_type(file: &str) -> Option<&'static str> {
    let path = std::path::Path::new(file);
    let mut components = path.components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return None;
    }

    let extension = path.extension()?.to_str()?;
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == extension)
        .map(|(_, content_type)| *content_type)
}
