//! Subordinate generation process: runs exactly one job and exits.
//!
//! Stage events go to stdout as JSON lines, logs and diagnostics go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gj_core::{GenerateOptions, InitType, JobRequest, WorkerEvent};
use gj_pipeline::{JobRunner, StageObserver, WorkerConfig, remote};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gj-worker")]
#[command(about = "Generate a textured mesh from one front-view image")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Input image (any format convertible to RGBA)
    #[arg(long)]
    input: PathBuf,
    /// Artifacts are written to {prefix}.glb and {prefix}.mp4
    #[arg(long)]
    output_prefix: PathBuf,
    /// -1 lets the multiview stage pick a seed
    #[arg(long, default_value_t = -1)]
    seed: i64,
    #[arg(long = "remove-bg")]
    remove_bg: bool,
    #[arg(long)]
    refine: bool,
    #[arg(long)]
    render_video: bool,
    #[arg(long, default_value_t = 0.1)]
    expansion_weight: f32,
    /// std or thin
    #[arg(long, default_value_t = InitType::Std)]
    init_type: InitType,
}

impl Args {
    fn into_request(self) -> JobRequest {
        let options = GenerateOptions {
            remove_background: self.remove_bg,
            seed: self.seed,
            render_video: self.render_video,
            refine: self.refine,
            expansion_weight: self.expansion_weight,
            init_type: self.init_type,
        };
        JobRequest::new(self.input, self.output_prefix, &options)
    }
}

/// Writes each event as one JSON line on stdout.
struct StdoutEvents;

impl StageObserver for StdoutEvents {
    fn on_event(&mut self, event: &WorkerEvent) {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode stage event");
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
            warn!(error = %e, "failed to write stage event");
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Unparseable arguments exit with clap's usage code 2, the invalid input code
    let request = Args::parse().into_request();
    let mut events = StdoutEvents;

    // Intermediate images live here and vanish with the process
    let scratch = match tempfile::Builder::new().prefix("gj-worker-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "cannot create scratch directory");
            return ExitCode::FAILURE;
        }
    };

    info!(
        input = %request.input_image_path.display(),
        prefix = %request.output_prefix.display(),
        "starting generation job"
    );

    let result = JobRunner::new(&request, &mut events).run(|| {
        let config = WorkerConfig::load()?;
        remote::connect(&config, scratch.path())
    });

    match result {
        Ok(artifacts) => {
            info!(
                mesh = %artifacts.mesh_path.display(),
                video = ?artifacts.video_path,
                "generation job finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("generation failed: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
