//! Narrow interfaces to the inference stages. The runner only relies on the
//! success/failure contract of each call; retries and iteration inside a stage
//! are the collaborator's business.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use gj_core::{InitType, Mesh};
use image::RgbaImage;

/// Camera distance used for the turntable export.
pub const EXPORT_DISTANCE: f32 = 3.5;
/// Field of view used for the turntable export, in degrees.
pub const EXPORT_FOV_DEGREES: f32 = 2.0 / 1.35;

pub struct MultiviewOutput {
    pub views: Vec<RgbaImage>,
    pub front: RgbaImage,
}

pub trait Upscaler {
    fn upscale(&self, images: Vec<RgbaImage>) -> Result<Vec<RgbaImage>>;
}

pub trait MultiviewPredictor {
    fn predict_multiview(
        &self,
        image: &RgbaImage,
        remove_background: bool,
        seed: i64,
    ) -> Result<MultiviewOutput>;
}

pub trait NormalPredictor {
    fn predict_normals(&self, views: &[RgbaImage]) -> Result<Vec<RgbaImage>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructParams {
    pub refine: bool,
    /// Ask the reconstructor to predict normals itself.
    pub predict_normal: bool,
    pub expansion_weight: f32,
    pub init_type: InitType,
}

pub trait Reconstructor {
    fn reconstruct(
        &self,
        views: &[RgbaImage],
        normals: Option<&[RgbaImage]>,
        front: &RgbaImage,
        params: &ReconstructParams,
    ) -> Result<Mesh>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    Orthographic,
}

impl CameraType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orthographic => "ortho",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSettings {
    pub distance: f32,
    pub fov_degrees: f32,
    pub camera: CameraType,
    pub export_video: bool,
}

impl ExportSettings {
    /// Orthographic turntable framing for normalized meshes.
    pub fn turntable(export_video: bool) -> Self {
        Self {
            distance: EXPORT_DISTANCE,
            fov_degrees: EXPORT_FOV_DEGREES,
            camera: CameraType::Orthographic,
            export_video,
        }
    }
}

/// Writes `{prefix}.glb` and, when asked, `{prefix}.mp4`.
pub trait Exporter {
    fn export(&self, output_prefix: &Path, mesh: &Mesh, settings: &ExportSettings) -> Result<()>;
}

impl<T: Upscaler + ?Sized> Upscaler for Arc<T> {
    fn upscale(&self, images: Vec<RgbaImage>) -> Result<Vec<RgbaImage>> {
        (**self).upscale(images)
    }
}

impl<T: MultiviewPredictor + ?Sized> MultiviewPredictor for Arc<T> {
    fn predict_multiview(
        &self,
        image: &RgbaImage,
        remove_background: bool,
        seed: i64,
    ) -> Result<MultiviewOutput> {
        (**self).predict_multiview(image, remove_background, seed)
    }
}

impl<T: NormalPredictor + ?Sized> NormalPredictor for Arc<T> {
    fn predict_normals(&self, views: &[RgbaImage]) -> Result<Vec<RgbaImage>> {
        (**self).predict_normals(views)
    }
}

impl<T: Reconstructor + ?Sized> Reconstructor for Arc<T> {
    fn reconstruct(
        &self,
        views: &[RgbaImage],
        normals: Option<&[RgbaImage]>,
        front: &RgbaImage,
        params: &ReconstructParams,
    ) -> Result<Mesh> {
        (**self).reconstruct(views, normals, front, params)
    }
}

impl<T: Exporter + ?Sized> Exporter for Arc<T> {
    fn export(&self, output_prefix: &Path, mesh: &Mesh, settings: &ExportSettings) -> Result<()> {
        (**self).export(output_prefix, mesh, settings)
    }
}
