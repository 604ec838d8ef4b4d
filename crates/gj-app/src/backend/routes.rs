use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use crate::backend::routes::artifact::download_artifact;
use crate::backend::routes::job::generate;
use crate::backend::routes::system::{health, list_examples};
use crate::backend::state::GenState;

mod artifact;
mod job;
mod system;

/// Uploaded photos routinely exceed axum's 2 MiB default.
const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

pub fn api_routes() -> Router<Arc<GenState>> {
    Router::new()
        .route(
            "/generate3dv2",
            post(generate).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route("/artifacts/{file}", get(download_artifact))
        .route("/health", get(health))
        .route("/examples", get(list_examples))
}
