pub mod config;
pub mod contracts;
pub mod remote;
pub mod runner;
pub mod staging;
pub mod state;
pub mod zoo;

pub use config::WorkerConfig;
pub use runner::{JobRunner, StageObserver, UPSCALE_THRESHOLD};
pub use zoo::ModelZoo;
