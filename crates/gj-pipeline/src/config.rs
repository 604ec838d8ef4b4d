use std::env;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub inference_url: String,
    pub device: String,
    pub request_timeout: Duration,
}

impl WorkerConfig {
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env is fine, the environment may already be set up
        dotenvy::dotenv().ok();

        let inference_url =
            env::var("GJ_INFERENCE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
        let device = env::var("GJ_DEVICE").unwrap_or_else(|_| "cuda".to_string());
        let timeout_secs: u64 = env::var("GJ_INFERENCE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .context("GJ_INFERENCE_TIMEOUT_SECS must be a number of seconds")?;

        Ok(Self {
            inference_url,
            device,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
