use std::path::{Path, PathBuf};

use gj_core::JobResult;
use serde::{Deserialize, Serialize};

/// A job result plus download links for its artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub result: JobResult,
    pub mesh_url: Option<String>,
    pub video_url: Option<String>,
}

impl GenerateResponse {
    pub fn new(result: JobResult) -> Self {
        let mesh_url = result.mesh_artifact_path.as_deref().and_then(artifact_url);
        let video_url = result.video_artifact_path.as_deref().and_then(artifact_url);
        Self {
            result,
            mesh_url,
            video_url,
        }
    }
}

fn artifact_url(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(format!("/artifacts/{}", name))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub concurrency_id: String,
    pub slots: usize,
    pub available_slots: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamplesResponse {
    pub examples: Vec<PathBuf>,
}
