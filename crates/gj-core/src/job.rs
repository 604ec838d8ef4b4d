use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, FailureKind, Result};
use crate::stage::StageEvent;

pub const MESH_EXTENSION: &str = "glb";
pub const VIDEO_EXTENSION: &str = "mp4";
pub const DEFAULT_SEED: i64 = -1;
pub const DEFAULT_EXPANSION_WEIGHT: f32 = 0.1;

/// How the reconstruction stage seeds its initial mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitType {
    #[default]
    Std,
    Thin,
}

impl InitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Thin => "thin",
        }
    }
}

impl fmt::Display for InitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "std" => Ok(Self::Std),
            "thin" => Ok(Self::Thin),
            other => Err(Error::InvalidInput(format!(
                "unknown init type '{}', expected std or thin",
                other
            ))),
        }
    }
}

/// Options a caller picks when asking for a mesh. Defaults match the
/// generation form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    pub remove_background: bool,
    pub seed: i64,
    pub render_video: bool,
    pub refine: bool,
    pub expansion_weight: f32,
    pub init_type: InitType,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            remove_background: true,
            seed: DEFAULT_SEED,
            render_video: false,
            refine: true,
            expansion_weight: DEFAULT_EXPANSION_WEIGHT,
            init_type: InitType::Std,
        }
    }
}

/// Everything a worker needs to run one job. Built once by the dispatcher and
/// never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input_image_path: PathBuf,
    pub output_prefix: PathBuf,
    pub seed: i64,
    pub remove_background: bool,
    pub render_video: bool,
    pub refine: bool,
    pub expansion_weight: f32,
    pub init_type: InitType,
}

impl JobRequest {
    pub fn new(input_image_path: PathBuf, output_prefix: PathBuf, options: &GenerateOptions) -> Self {
        Self {
            input_image_path,
            output_prefix,
            seed: options.seed,
            remove_background: options.remove_background,
            render_video: options.render_video,
            refine: options.refine,
            expansion_weight: options.expansion_weight,
            init_type: options.init_type,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_expansion_weight(self.expansion_weight)?;

        if self.output_prefix.file_name().is_none() {
            return Err(Error::InvalidInput(format!(
                "output prefix '{}' has no file name",
                self.output_prefix.display()
            )));
        }
        if !self.input_image_path.is_file() {
            return Err(Error::InvalidInput(format!(
                "input image '{}' does not exist",
                self.input_image_path.display()
            )));
        }
        Ok(())
    }

    /// Command-line encoding understood by the worker binary. Values use the
    /// `--flag=value` form so negative seeds and weights parse as values.
    pub fn worker_args(&self) -> Vec<OsString> {
        let mut args = vec![
            flag_value("--input", self.input_image_path.as_os_str()),
            flag_value("--output-prefix", self.output_prefix.as_os_str()),
            OsString::from(format!("--seed={}", self.seed)),
            OsString::from(format!("--expansion-weight={}", self.expansion_weight)),
            OsString::from(format!("--init-type={}", self.init_type)),
        ];
        if self.remove_background {
            args.push("--remove-bg".into());
        }
        if self.render_video {
            args.push("--render-video".into());
        }
        if self.refine {
            args.push("--refine".into());
        }
        args
    }

    pub fn mesh_path(&self) -> PathBuf {
        artifact_path(&self.output_prefix, MESH_EXTENSION)
    }

    pub fn video_path(&self) -> PathBuf {
        artifact_path(&self.output_prefix, VIDEO_EXTENSION)
    }

    /// Prefix the exporter writes to before artifacts are moved into place.
    pub fn staging_prefix(&self) -> PathBuf {
        staging_prefix(&self.output_prefix)
    }
}

pub fn validate_expansion_weight(weight: f32) -> Result<()> {
    if !(-1.0..=1.0).contains(&weight) {
        return Err(Error::InvalidInput(format!(
            "expansion weight {} outside [-1.0, 1.0]",
            weight
        )));
    }
    Ok(())
}

/// `{prefix}.{extension}`. The prefix may itself contain dots, so this appends
/// rather than replacing an extension.
pub fn artifact_path(prefix: &Path, extension: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

pub fn staging_prefix(prefix: &Path) -> PathBuf {
    artifact_path(prefix, "staging")
}

fn flag_value(flag: &str, value: &std::ffi::OsStr) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push("=");
    arg.push(value);
    arg
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failure,
}

/// Files a successful job left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub mesh_path: PathBuf,
    pub video_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub mesh_artifact_path: Option<PathBuf>,
    pub video_artifact_path: Option<PathBuf>,
    pub failure_kind: Option<FailureKind>,
    pub failure_detail: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageEvent>,
}

impl JobResult {
    pub fn success(artifacts: JobArtifacts, stages: Vec<StageEvent>) -> Self {
        Self {
            status: JobStatus::Success,
            mesh_artifact_path: Some(artifacts.mesh_path),
            video_artifact_path: artifacts.video_path,
            failure_kind: None,
            failure_detail: None,
            stages,
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            status: JobStatus::Failure,
            mesh_artifact_path: None,
            video_artifact_path: None,
            failure_kind: Some(error.kind()),
            failure_detail: Some(error.to_string()),
            stages: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
