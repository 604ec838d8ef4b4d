//! Best-effort removal of the files a job touches. Failures are logged, never
//! surfaced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use gj_core::job::{MESH_EXTENSION, VIDEO_EXTENSION, artifact_path, staging_prefix};
use tempfile::TempPath;
use tracing::{debug, warn};

pub fn remove_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
    }
}

/// Final and staged artifact paths a job may leave under `prefix`.
pub fn artifact_paths(prefix: &Path) -> [PathBuf; 4] {
    let staging = staging_prefix(prefix);
    [
        artifact_path(prefix, MESH_EXTENSION),
        artifact_path(prefix, VIDEO_EXTENSION),
        artifact_path(&staging, MESH_EXTENSION),
        artifact_path(&staging, VIDEO_EXTENSION),
    ]
}

/// The temporary input image of one job and its output prefix.
///
/// Dropping this removes the input, and every artifact under the prefix
/// unless [`JobFiles::keep_artifacts`] was called. Dropping the submit future
/// mid-job therefore cleans up as well.
#[derive(Debug)]
pub struct JobFiles {
    input: TempPath,
    prefix: PathBuf,
    keep_artifacts: bool,
}

impl JobFiles {
    pub fn new(input: TempPath, prefix: PathBuf) -> Self {
        Self {
            input,
            prefix,
            keep_artifacts: false,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// The job succeeded; its artifacts belong to the caller now.
    pub fn keep_artifacts(&mut self) {
        self.keep_artifacts = true;
    }
}

impl Drop for JobFiles {
    fn drop(&mut self) {
        remove_file(&self.input);
        if !self.keep_artifacts {
            for path in artifact_paths(&self.prefix) {
                remove_file(&path);
            }
        }
    }
}
