//! Command implementations

pub mod run;
pub mod show;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Load configuration from an explicit file or the default locations.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .context("Failed to load configuration")
}

/// State directory from a `--state-dir` flag or the configuration.
pub fn resolve_state_dir(flag: Option<PathBuf>, config: &Config) -> PathBuf {
    flag.unwrap_or_else(|| PathBuf::from(&config.state_dir))
}

/// Fail with a readable message when there is no run directory to inspect.
pub fn require_run_dir(state_dir: &Path) -> Result<()> {
    if state_dir.is_dir() {
        Ok(())
    } else {
        anyhow::bail!("No run found in {}", state_dir.display())
    }
}
