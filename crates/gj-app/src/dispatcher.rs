//! Runs each generation job in its own worker process, one device slot at a
//! time, and turns whatever the worker left behind into a [`JobResult`].

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use gj_core::job::validate_expansion_weight;
use gj_core::{
    Error, FailureKind, GenerateOptions, JobArtifacts, JobRequest, JobResult, Result, Stage,
    StageEvent, WorkerEvent,
};
use image::{DynamicImage, ImageFormat};
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cleanup::JobFiles;
use crate::gate::ConcurrencyGate;

/// Trailing stderr lines kept as failure diagnostics.
const DIAGNOSTIC_LINES: usize = 40;

/// How to launch the worker. Job arguments are appended after `args`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    worker: WorkerCommand,
    output_dir: PathBuf,
    scratch_dir: PathBuf,
    job_timeout: Duration,
    gate: ConcurrencyGate,
}

#[derive(Debug)]
struct ReportedFailure {
    kind: FailureKind,
    stage: Option<Stage>,
    message: String,
}

/// What the worker said on stdout.
#[derive(Debug, Default)]
struct WorkerReport {
    stages: Vec<StageEvent>,
    failure: Option<ReportedFailure>,
}

impl Dispatcher {
    pub fn new(
        worker: WorkerCommand,
        output_dir: PathBuf,
        job_timeout: Duration,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            worker,
            output_dir,
            scratch_dir: std::env::temp_dir(),
            job_timeout,
            gate,
        }
    }

    /// Directory for the temporary input images handed to workers.
    pub fn with_scratch_dir(mut self, scratch_dir: PathBuf) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Generate a mesh (and optionally a turntable video) from one image.
    ///
    /// Waits for a device slot, so at most as many jobs as the gate has slots
    /// run at once. A failed or timed-out job leaves no artifacts behind.
    pub async fn submit(
        &self,
        input_image: Option<&DynamicImage>,
        options: &GenerateOptions,
    ) -> Result<JobResult> {
        let image = input_image
            .ok_or_else(|| Error::InvalidInput("no input image was provided".to_string()))?;
        validate_expansion_weight(options.expansion_weight)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let input = self.write_input(image).await?;
        let output_prefix = self
            .output_dir
            .join(format!("gj-{}", Uuid::new_v4().simple()));
        let mut files = JobFiles::new(input, output_prefix);
        let request = JobRequest::new(
            files.input().to_path_buf(),
            files.prefix().to_path_buf(),
            options,
        );

        let outcome = self.run_gated(&request).await;

        match &outcome {
            Ok(result) => {
                files.keep_artifacts();
                info!(
                    mesh = ?result.mesh_artifact_path,
                    video = ?result.video_artifact_path,
                    "job succeeded"
                );
            }
            Err(err) => {
                warn!(prefix = %request.output_prefix.display(), error = %err, "job failed");
            }
        }

        outcome
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn run_gated(&self, request: &JobRequest) -> Result<JobResult> {
        let _permit = self.gate.acquire().await?;
        self.run_worker(request).await
    }

    /// Removed again when the returned path is dropped.
    async fn write_input(&self, image: &DynamicImage) -> Result<TempPath> {
        let path = tempfile::Builder::new()
            .prefix("gj-input-")
            .suffix(".png")
            .tempfile_in(&self.scratch_dir)?
            .into_temp_path();

        let image = image.clone();
        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || image.save_with_format(&target, ImageFormat::Png))
            .await
            .map_err(|e| Error::GenerationFailed {
                code: None,
                diagnostics: format!("writing the input image panicked: {}", e),
            })??;
        Ok(path)
    }

    async fn run_worker(&self, request: &JobRequest) -> Result<JobResult> {
        let mut child = Command::new(&self.worker.program)
            .args(&self.worker.args)
            .args(request.worker_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::GenerationFailed {
                code: None,
                diagnostics: format!(
                    "cannot start worker '{}': {}",
                    self.worker.program.display(),
                    e
                ),
            })?;
        let pid = child.id();
        info!(pid, prefix = %request.output_prefix.display(), "worker started");

        let events = child.stdout.take().map(|out| tokio::spawn(read_events(out)));
        let diagnostics = child.stderr.take().map(|err| tokio::spawn(read_diagnostics(err)));

        let status = match tokio::time::timeout(self.job_timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    pid,
                    secs = self.job_timeout.as_secs(),
                    "worker exceeded its time budget, killing it"
                );
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "failed to kill worker");
                }
                // Orphaned descendants may still hold the pipes open
                if let Some(task) = &events {
                    task.abort();
                }
                if let Some(task) = &diagnostics {
                    task.abort();
                }
                return Err(Error::JobTimeout {
                    secs: self.job_timeout.as_secs(),
                });
            }
        };

        let report = match events {
            Some(task) => task.await.unwrap_or_default(),
            None => WorkerReport::default(),
        };
        let diagnostics = match diagnostics {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        debug!(pid, %status, stages = report.stages.len(), "worker exited");

        if !status.success() {
            let diagnostics = if diagnostics.is_empty() {
                format!("worker exited with {}", status)
            } else {
                diagnostics
            };
            return Err(failure_from(status.code(), report.failure, diagnostics));
        }

        let mesh_path = request.mesh_path();
        if !mesh_path.is_file() {
            return Err(Error::GenerationFailed {
                code: status.code(),
                diagnostics: format!(
                    "worker finished without writing '{}'",
                    mesh_path.display()
                ),
            });
        }
        let video_path = Some(request.video_path()).filter(|path| path.is_file());

        Ok(JobResult::success(
            JobArtifacts {
                mesh_path,
                video_path,
            },
            report.stages,
        ))
    }
}

/// Prefer the kind the worker reported, then its exit code, then a generic
/// failure carrying stderr.
fn failure_from(code: Option<i32>, reported: Option<ReportedFailure>, diagnostics: String) -> Error {
    let (kind, stage, message) = match reported {
        Some(failure) => (failure.kind, failure.stage, failure.message),
        None => (
            code.map(FailureKind::from_exit_code)
                .unwrap_or(FailureKind::GenerationFailed),
            None,
            diagnostics.clone(),
        ),
    };

    match kind {
        FailureKind::StagePrediction if stage.is_none() => Error::GenerationFailed { code, diagnostics },
        FailureKind::JobTimeout | FailureKind::GenerationFailed => Error::GenerationFailed {
            code,
            diagnostics: if message == diagnostics {
                diagnostics
            } else {
                format!("{}\n{}", message, diagnostics)
            },
        },
        _ => Error::from_report(kind, stage, message),
    }
}

async fn read_events<R: AsyncRead + Unpin>(stream: R) -> WorkerReport {
    let mut lines = BufReader::new(stream).lines();
    let mut report = WorkerReport::default();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match WorkerEvent::parse_line(&line) {
                Some(WorkerEvent::Stage(event)) => {
                    info!(stage = %event.stage, outcome = ?event.outcome, "worker progress");
                    report.stages.push(event);
                }
                Some(WorkerEvent::Failed {
                    kind,
                    stage,
                    message,
                }) => {
                    report.failure = Some(ReportedFailure {
                        kind,
                        stage,
                        message,
                    });
                }
                None => debug!(target: "gj_worker", "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "cannot read worker stdout");
                break;
            }
        }
    }
    report
}

async fn read_diagnostics<R: AsyncRead + Unpin>(stream: R) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "gj_worker", "{}", line);
        if tail.len() == DIAGNOSTIC_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
