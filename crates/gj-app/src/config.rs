use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub output_dir: PathBuf,
    pub worker_bin: PathBuf,
    pub job_timeout: Duration,
    pub gpu_slots: usize,
    pub concurrency_id: String,
    pub examples_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port: u16 = parse_var("GJ_PORT", "5000")?;
        let output_dir =
            PathBuf::from(env::var("GJ_OUTPUT_DIR").unwrap_or_else(|_| "outputs".to_string()));
        let worker_bin = match env::var_os("GJ_WORKER_BIN") {
            Some(path) => PathBuf::from(path),
            None => default_worker_bin()?,
        };
        let timeout_secs: u64 = parse_var("GJ_JOB_TIMEOUT_SECS", "3600")?;
        let gpu_slots: usize = parse_var("GJ_GPU_SLOTS", "1")?;
        let concurrency_id = env::var("GJ_CONCURRENCY_ID").unwrap_or_else(|_| "wkl".to_string());
        let examples_dir = env::var_os("GJ_EXAMPLES_DIR").map(PathBuf::from);

        Ok(Self {
            port,
            output_dir,
            worker_bin,
            job_timeout: Duration::from_secs(timeout_secs),
            gpu_slots,
            concurrency_id,
            examples_dir,
        })
    }
}

fn parse_var<T>(name: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("{} has an invalid value", name))
}

/// The worker binary is built next to this one.
fn default_worker_bin() -> anyhow::Result<PathBuf> {
    let exe = env::current_exe().context("cannot locate the running executable")?;
    let dir = exe
        .parent()
        .context("running executable has no parent directory")?;
    Ok(dir.join(format!("gj-worker{}", env::consts::EXE_SUFFIX)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_bin_is_sibling() {
        let exe = env::current_exe().unwrap();
        let bin = default_worker_bin().unwrap();
        assert_eq!(bin.parent(), exe.parent());
        assert!(bin.file_name().unwrap().to_string_lossy().starts_with("gj-worker"));
    }

    #[test]
    fn test_parse_var_falls_back_to_default() {
        let slots: usize = parse_var("GJ_TEST_UNSET_VARIABLE", "3").unwrap();
        assert_eq!(slots, 3);
    }
}
