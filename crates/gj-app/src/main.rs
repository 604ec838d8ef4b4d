mod backend;
mod cleanup;
mod config;
mod dispatcher;
mod error;
mod gate;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gj_core::job::{DEFAULT_EXPANSION_WEIGHT, DEFAULT_SEED};
use gj_core::{GenerateOptions, InitType, JobResult};
use tracing_subscriber::EnvFilter;

use crate::backend::GenState;
use crate::config::AppConfig;
use crate::dispatcher::{Dispatcher, WorkerCommand};
use crate::gate::GateRegistry;

#[derive(Parser, Debug)]
#[command(name = "gj-app")]
#[command(about = "Turn a single image into a textured 3D mesh")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Overrides GJ_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one job and print its result as JSON
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
#[command(allow_negative_numbers = true)]
struct GenerateArgs {
    #[arg(long)]
    input: PathBuf,
    /// -1 picks a random seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: i64,
    /// Skip background removal
    #[arg(long)]
    keep_background: bool,
    #[arg(long)]
    render_video: bool,
    /// Skip normal prediction and mesh refinement
    #[arg(long)]
    no_refine: bool,
    #[arg(long, default_value_t = DEFAULT_EXPANSION_WEIGHT)]
    expansion_weight: f32,
    /// std or thin
    #[arg(long, default_value_t = InitType::Std)]
    init_type: InitType,
}

impl GenerateArgs {
    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            remove_background: !self.keep_background,
            seed: self.seed,
            render_video: self.render_video,
            refine: !self.no_refine,
            expansion_weight: self.expansion_weight,
            init_type: self.init_type,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    // Every job this process runs waits on the gate named by GJ_CONCURRENCY_ID.
    // Slots are not shared with other gj-app processes.
    let gates = GateRegistry::new();
    let gate = gates.gate(&config.concurrency_id, config.gpu_slots);
    let dispatcher = Dispatcher::new(
        WorkerCommand::new(config.worker_bin.clone()),
        config.output_dir.clone(),
        config.job_timeout,
        gate,
    );

    match cli.command {
        Command::Serve { port } => {
            let state = GenState::new(dispatcher, config.examples_dir.clone());
            backend::serve(port.unwrap_or(config.port), state).await
        }
        Command::Generate(args) => {
            let image = image::open(&args.input)
                .with_context(|| format!("cannot open input image {}", args.input.display()))?;

            let result = match dispatcher.submit(Some(&image), &args.options()).await {
                Ok(result) => result,
                Err(err) => JobResult::failure(&err),
            };
            println!("{}", serde_json::to_string_pretty(&result)?);

            if !result.is_success() {
                anyhow::bail!("generation failed");
            }
            Ok(())
        }
    }
}
