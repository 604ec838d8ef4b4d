mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::backend::routes::api_routes;
pub use crate::backend::state::GenState;

pub fn router(state: Arc<GenState>) -> Router {
    Router::new().merge(api_routes()).with_state(state)
}

/// Serve the HTTP surface until the process is stopped.
pub async fn serve(port: u16, state: GenState) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("Starting backend server on port {}", port);
    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Cursor;
    use std::path::Path;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gj_core::{FailureKind, JobResult};
    use image::{DynamicImage, ImageFormat};
    use tower::ServiceExt;

    use super::*;
    use crate::backend::schemas::{ExamplesResponse, GenerateResponse, HealthResponse};
    use crate::dispatcher::{Dispatcher, WorkerCommand};
    use crate::gate::ConcurrencyGate;

    const WORKER: &str = r##"
for arg in "$@"; do
  case "$arg" in
    --output-prefix=*) prefix="${arg#--output-prefix=}" ;;
  esac
done
printf glb > "$prefix.glb"
"##;

    fn app(dir: &Path, examples_dir: Option<std::path::PathBuf>) -> Router {
        let worker = WorkerCommand::new("/bin/sh").with_args(["-c", WORKER, "gj-worker"]);
        let dispatcher = Dispatcher::new(
            worker,
            dir.join("out"),
            Duration::from_secs(10),
            ConcurrencyGate::new("wkl", 1),
        )
        .with_scratch_dir(dir.to_path_buf());
        router(Arc::new(GenState::new(dispatcher, examples_dir)))
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::new_rgba8(4, 4)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[tokio::test]
    async fn test_generated_mesh_can_be_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), None);
        let request = Request::post("/generate3dv2?seed=7&render_video=true&init_type=thin")
            .body(Body::from(png_bytes()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let generated: GenerateResponse = json_body(response).await;
        assert!(generated.result.is_success());
        assert!(generated.result.mesh_artifact_path.unwrap().is_file());
        assert_eq!(generated.result.video_artifact_path, None);
        assert_eq!(generated.video_url, None);

        let mesh_url = generated.mesh_url.unwrap();
        assert!(mesh_url.starts_with("/artifacts/gj-"));
        let response = app
            .oneshot(Request::get(mesh_url.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "model/gltf-binary");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"glb");
    }

    #[tokio::test]
    async fn test_artifact_download_stays_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.glb"), b"private").unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        let app = app(dir.path(), None);

        for uri in ["/artifacts/..%2Fsecret.glb", "/artifacts/notes.txt"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }

        let response = app
            .oneshot(Request::get("/artifacts/gj-missing.glb").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_body_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/generate3dv2").body(Body::empty()).unwrap();

        let response = app(dir.path(), None).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let result: JobResult = json_body(response).await;
        assert_eq!(result.failure_kind, Some(FailureKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/generate3dv2")
            .body(Body::from("definitely not a png"))
            .unwrap();

        let response = app(dir.path(), None).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_free_slots() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let response = app(dir.path(), None).oneshot(request).await.unwrap();

        let health: HealthResponse = json_body(response).await;
        assert_eq!(health.concurrency_id, "wkl");
        assert_eq!(health.available_slots, 1);
    }

    #[tokio::test]
    async fn test_examples_are_sorted_images() {
        let dir = tempfile::tempdir().unwrap();
        let examples = dir.path().join("examples");
        std::fs::create_dir(&examples).unwrap();
        for name in ["owl.png", "cat.JPG", "notes.txt"] {
            std::fs::write(examples.join(name), b"x").unwrap();
        }
        let request = Request::get("/examples").body(Body::empty()).unwrap();

        let response = app(dir.path(), Some(examples.clone()))
            .oneshot(request)
            .await
            .unwrap();

        let listed: ExamplesResponse = json_body(response).await;
        assert_eq!(
            listed.examples,
            vec![examples.join("cat.JPG"), examples.join("owl.png")]
        );
    }
}
