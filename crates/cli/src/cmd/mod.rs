//! CLI command implementations

pub mod config;
pub mod inspect;
pub mod list;
pub mod resume;
pub mod run;

use anyhow::{Context, Result};
use cli_lib::config::Config;
use journal::Journal;
use std::sync::Arc;
use tracing::debug;

/// Open the checkpoint repository named by the config
pub fn open_repository(config: &Config) -> Result<Arc<Journal>> {
    let path = config.repository_path()?;
    std::fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create repository directory {}", path.display()))?;
    debug!(path = %path.display(), "opening checkpoint repository");
    let journal = Journal::open(&path)
        .with_context(|| format!("Failed to open checkpoint repository at {}", path.display()))?;
    Ok(Arc::new(journal))
}
