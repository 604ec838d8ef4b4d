use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::Stage;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end a generation job.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request. Caller's fault, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Device or model set unavailable. No stage can run.
    #[error("model initialisation failed: {0}")]
    ModelInit(String),

    #[error("stage {stage} failed: {message}")]
    StagePrediction { stage: Stage, message: String },

    #[error("geometric reconstruction failed: {0}")]
    Reconstruction(String),

    #[error("job exceeded its {secs}s time budget and was terminated")]
    JobTimeout { secs: u64 },

    /// Worker exited non-zero without reporting a more precise kind.
    #[error("generation failed (exit code {code:?}): {diagnostics}")]
    GenerationFailed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("malformed mesh: {0}")]
    MalformedMesh(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Machine-readable failure kind, shared by the worker event stream and the
/// dispatcher's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    ModelInit,
    StagePrediction,
    Reconstruction,
    JobTimeout,
    GenerationFailed,
}

impl FailureKind {
    /// Exit code the worker process uses for this kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidInput => 2,
            Self::ModelInit => 3,
            Self::StagePrediction => 4,
            Self::Reconstruction => 5,
            Self::JobTimeout | Self::GenerationFailed => 1,
        }
    }

    /// Inverse of [`FailureKind::exit_code`]. Unknown codes are generic failures.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            2 => Self::InvalidInput,
            3 => Self::ModelInit,
            4 => Self::StagePrediction,
            5 => Self::Reconstruction,
            _ => Self::GenerationFailed,
        }
    }
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) | Self::Image(_) => FailureKind::InvalidInput,
            Self::ModelInit(_) => FailureKind::ModelInit,
            Self::StagePrediction { .. } => FailureKind::StagePrediction,
            Self::Reconstruction(_) | Self::MalformedMesh(_) => FailureKind::Reconstruction,
            Self::JobTimeout { .. } => FailureKind::JobTimeout,
            Self::GenerationFailed { .. } | Self::Io(_) => FailureKind::GenerationFailed,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self::StagePrediction {
            stage,
            message: message.into(),
        }
    }

    /// Rebuild an error on the caller side from what the worker reported.
    pub fn from_report(kind: FailureKind, stage: Option<Stage>, message: String) -> Self {
        match kind {
            FailureKind::InvalidInput => Self::InvalidInput(message),
            FailureKind::ModelInit => Self::ModelInit(message),
            FailureKind::StagePrediction => Self::StagePrediction {
                stage: stage.unwrap_or(Stage::Init),
                message,
            },
            FailureKind::Reconstruction => Self::Reconstruction(message),
            FailureKind::JobTimeout | FailureKind::GenerationFailed => Self::GenerationFailed {
                code: None,
                diagnostics: message,
            },
        }
    }
}
