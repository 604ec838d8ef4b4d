use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gj_core::job::{MESH_EXTENSION, VIDEO_EXTENSION, artifact_path};
use gj_core::{Error, JobArtifacts, JobRequest, Result, Stage};
use tracing::{debug, warn};

/// Keeps exporter output away from the canonical artifact paths until the
/// whole job has succeeded. Files still staged when this is dropped are
/// removed.
#[derive(Debug)]
pub struct ArtifactStaging {
    prefix: PathBuf,
    staged_mesh: PathBuf,
    staged_video: PathBuf,
    mesh: PathBuf,
    video: PathBuf,
}

impl ArtifactStaging {
    pub fn new(request: &JobRequest) -> Self {
        let prefix = request.staging_prefix();
        let staging = Self {
            staged_mesh: artifact_path(&prefix, MESH_EXTENSION),
            staged_video: artifact_path(&prefix, VIDEO_EXTENSION),
            mesh: request.mesh_path(),
            video: request.video_path(),
            prefix,
        };
        staging.discard();
        staging
    }

    /// Prefix handed to the exporter.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Move staged files onto the canonical paths. The mesh must have been
    /// written; the video is kept only when `keep_video` is set and the
    /// exporter produced one.
    pub fn commit(self, keep_video: bool) -> Result<JobArtifacts> {
        if !self.staged_mesh.is_file() {
            return Err(Error::stage(
                Stage::Exported,
                format!("exporter wrote no mesh at {}", self.staged_mesh.display()),
            ));
        }

        fs::rename(&self.staged_mesh, &self.mesh)?;
        debug!(path = %self.mesh.display(), "mesh artifact committed");

        let video_path = if keep_video && self.staged_video.is_file() {
            if let Err(e) = fs::rename(&self.staged_video, &self.video) {
                remove_if_exists(&self.mesh);
                return Err(e.into());
            }
            debug!(path = %self.video.display(), "video artifact committed");
            Some(self.video.clone())
        } else {
            if keep_video {
                warn!("video was requested but the exporter produced none");
            }
            None
        };

        Ok(JobArtifacts {
            mesh_path: self.mesh.clone(),
            video_path,
        })
    }

    fn discard(&self) {
        remove_if_exists(&self.staged_mesh);
        remove_if_exists(&self.staged_video);
    }
}

impl Drop for ArtifactStaging {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Remove a file, treating "already gone" as success. Other failures are
/// logged and swallowed.
pub fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
