//! Collaborators backed by the inference service.
//!
//! Images are exchanged as PNG files inside the worker's scratch directory and
//! requests only carry paths. Every reply uses the same envelope:
//! `{"status": "success" | "error", "error": ..., "result": ...}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use gj_core::{CanonicalView, InitType, Mesh};
use image::{ImageFormat, RgbaImage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::contracts::{
    ExportSettings, Exporter, MultiviewOutput, MultiviewPredictor, NormalPredictor,
    ReconstructParams, Reconstructor, Upscaler,
};
use crate::zoo::ModelZoo;

#[derive(Deserialize)]
struct Envelope {
    status: String,
    error: Option<String>,
    result: Option<Value>,
}

#[derive(Serialize)]
struct DeviceRequest<'a> {
    device: &'a str,
}

#[derive(Deserialize)]
struct DeviceInfo {
    device: String,
    name: Option<String>,
}

#[derive(Serialize)]
struct UpscaleRequest<'a> {
    images: Vec<PathBuf>,
    output_dir: &'a Path,
}

#[derive(Deserialize)]
struct UpscaleResult {
    images: Vec<PathBuf>,
}

#[derive(Serialize)]
struct MultiviewRequest<'a> {
    image: PathBuf,
    remove_background: bool,
    seed: i64,
    output_dir: &'a Path,
}

#[derive(Deserialize)]
struct MultiviewResult {
    views: Vec<PathBuf>,
    front: PathBuf,
}

#[derive(Serialize)]
struct NormalsRequest<'a> {
    views: Vec<PathBuf>,
    output_dir: &'a Path,
}

#[derive(Deserialize)]
struct NormalsResult {
    normals: Vec<PathBuf>,
}

#[derive(Serialize)]
struct ReconstructRequest<'a> {
    views: Vec<PathBuf>,
    normals: Option<Vec<PathBuf>>,
    front: PathBuf,
    refine: bool,
    predict_normal: bool,
    expansion_weight: f32,
    init_type: InitType,
    output_dir: &'a Path,
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    output_prefix: &'a Path,
    mesh: &'a Mesh,
    distance: f32,
    fov_in_degrees: f32,
    cam_type: &'a str,
    export_video: bool,
}

/// Blocking client for one inference service, scoped to one job's scratch
/// directory.
pub struct InferenceService {
    base_url: String,
    http: reqwest::blocking::Client,
    scratch: PathBuf,
    counter: AtomicUsize,
}

impl InferenceService {
    pub fn new(config: &WorkerConfig, scratch: &Path) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: config.inference_url.trim_end_matches('/').to_string(),
            http,
            scratch: scratch.to_path_buf(),
            counter: AtomicUsize::new(0),
        })
    }

    fn call<Req, Resp>(&self, endpoint: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, "calling inference service");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("failed to reach inference service at {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("service returned HTTP {}: {}", status, body);
        }

        let envelope: Envelope = response
            .json()
            .with_context(|| format!("malformed reply from {}", endpoint))?;

        match envelope.status.as_str() {
            "success" => serde_json::from_value(envelope.result.unwrap_or(Value::Null))
                .with_context(|| format!("unexpected result shape from {}", endpoint)),
            "error" => Err(anyhow!(
                "service error: {}",
                envelope.error.unwrap_or_else(|| "Unknown error".to_string())
            )),
            other => Err(anyhow!("unexpected status: {}", other)),
        }
    }

    /// Bind the service's models to `device`. Returns the device it reports.
    pub fn bind_device(&self, device: &str) -> Result<String> {
        let info: DeviceInfo = self.call("device", &DeviceRequest { device })?;
        info!(
            device = %info.device,
            name = info.name.as_deref().unwrap_or("-"),
            "inference service bound to device"
        );
        Ok(info.device)
    }

    fn write_image(&self, label: &str, image: &RgbaImage) -> Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.scratch.join(format!("{:03}-{}.png", n, label));
        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    fn write_views(&self, label: &str, views: &[RgbaImage]) -> Result<Vec<PathBuf>> {
        views
            .iter()
            .zip(CanonicalView::all())
            .map(|(image, view)| self.write_image(&format!("{}-{}", label, view.name()), image))
            .collect()
    }

    fn output_dir(&self) -> &Path {
        &self.scratch
    }
}

fn read_image(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .to_rgba8())
}

fn read_images(paths: &[PathBuf]) -> Result<Vec<RgbaImage>> {
    paths.iter().map(|p| read_image(p)).collect()
}

impl Upscaler for InferenceService {
    fn upscale(&self, images: Vec<RgbaImage>) -> Result<Vec<RgbaImage>> {
        let paths = images
            .iter()
            .map(|img| self.write_image("upscale-in", img))
            .collect::<Result<Vec<_>>>()?;
        let result: UpscaleResult = self.call(
            "upscale",
            &UpscaleRequest {
                images: paths,
                output_dir: self.output_dir(),
            },
        )?;
        read_images(&result.images)
    }
}

impl MultiviewPredictor for InferenceService {
    fn predict_multiview(
        &self,
        image: &RgbaImage,
        remove_background: bool,
        seed: i64,
    ) -> Result<MultiviewOutput> {
        let input = self.write_image("multiview-in", image)?;
        let result: MultiviewResult = self.call(
            "multiview",
            &MultiviewRequest {
                image: input,
                remove_background,
                seed,
                output_dir: self.output_dir(),
            },
        )?;
        Ok(MultiviewOutput {
            views: read_images(&result.views)?,
            front: read_image(&result.front)?,
        })
    }
}

impl NormalPredictor for InferenceService {
    fn predict_normals(&self, views: &[RgbaImage]) -> Result<Vec<RgbaImage>> {
        let result: NormalsResult = self.call(
            "normals",
            &NormalsRequest {
                views: self.write_views("normals-in", views)?,
                output_dir: self.output_dir(),
            },
        )?;
        read_images(&result.normals)
    }
}

impl Reconstructor for InferenceService {
    fn reconstruct(
        &self,
        views: &[RgbaImage],
        normals: Option<&[RgbaImage]>,
        front: &RgbaImage,
        params: &ReconstructParams,
    ) -> Result<Mesh> {
        let normals = match normals {
            Some(maps) => Some(self.write_views("normal", maps)?),
            None => None,
        };
        self.call(
            "reconstruct",
            &ReconstructRequest {
                views: self.write_views("view", views)?,
                normals,
                front: self.write_image("front", front)?,
                refine: params.refine,
                predict_normal: params.predict_normal,
                expansion_weight: params.expansion_weight,
                init_type: params.init_type,
                output_dir: self.output_dir(),
            },
        )
    }
}

impl Exporter for InferenceService {
    fn export(&self, output_prefix: &Path, mesh: &Mesh, settings: &ExportSettings) -> Result<()> {
        let _: Value = self.call(
            "export",
            &ExportRequest {
                output_prefix,
                mesh,
                distance: settings.distance,
                fov_in_degrees: settings.fov_degrees,
                cam_type: settings.camera.as_str(),
                export_video: settings.export_video,
            },
        )?;
        Ok(())
    }
}

/// Connect to the inference service and bind its models to the configured
/// device. Fails when the service is unreachable or refuses the device.
pub fn connect(config: &WorkerConfig, scratch: &Path) -> Result<ModelZoo> {
    let service = Arc::new(InferenceService::new(config, scratch)?);
    let device = service
        .bind_device(&config.device)
        .with_context(|| format!("failed to bind models to device '{}'", config.device))?;

    Ok(ModelZoo {
        device,
        upscaler: Box::new(Arc::clone(&service)),
        multiview: Box::new(Arc::clone(&service)),
        normals: Box::new(Arc::clone(&service)),
        reconstructor: Box::new(Arc::clone(&service)),
        exporter: Box::new(service),
    })
}
