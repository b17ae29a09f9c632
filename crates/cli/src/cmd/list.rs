//! List recorded runs

use anyhow::{Context, Result};
use cli_lib::config::Config;
use cli_lib::render;
use journal::CheckpointRepository;
use owo_colors::OwoColorize;

pub async fn run(config: &Config, limit: Option<usize>) -> Result<i32> {
    let repo = super::open_repository(config)?;
    let runs = repo.list_runs().context("Failed to list runs")?;

    if runs.is_empty() {
        println!("{}", "No runs recorded yet".dimmed());
        return Ok(0);
    }

    // Newest first
    for run in runs.iter().rev().take(limit.unwrap_or(20)) {
        render::print_run_line(run);
    }
    Ok(0)
}
