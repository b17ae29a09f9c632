//! Resume a cancelled, interrupted or failed run

use anyhow::{Context, Result};
use cli_lib::config::Config;
use cli_lib::{lake, util};
use collector::Orchestrator;
use journal::{CheckpointRepository, RunPhase};
use owo_colors::OwoColorize;
use std::path::Path;
use tracing::info;

pub async fn run(config: &Config, reference: &str, catalog: &Path, json: bool) -> Result<i32> {
    // 1. Find the run
    let repo = super::open_repository(config)?;
    let id = util::resolve_run_ref(reference, repo.as_ref())?;
    let mut run = repo
        .load_run(id)
        .context("Failed to read run")?
        .with_context(|| format!("Run not found: {}", id))?;
    if run.phase == RunPhase::Completed {
        anyhow::bail!("Run {} already completed; start a new run instead", id);
    }

    // 2. Reopen it where it stopped
    run.reopen()?;
    info!(run_id = %id, phase = %run.phase, "run reopened");
    if !json {
        println!("Resuming run {} at {}", id.to_string().yellow(), run.phase.to_string().cyan());
    }
    let strict = run.settings.strict;
    let orchestrator = Orchestrator::new(repo, lake::collaborators(catalog)?, config.gc_config()?);
    let report = super::run::drive(&orchestrator, run, json).await?;

    // 3. Report
    super::run::finish(&report, strict, json)
}
