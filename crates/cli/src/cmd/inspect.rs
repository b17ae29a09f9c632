//! Show the state of a run

use anyhow::{Context, Result};
use cli_lib::config::Config;
use cli_lib::{render, util};
use collector::RunReport;
use journal::CheckpointRepository;

pub async fn run(config: &Config, reference: &str, json: bool, failures: bool) -> Result<i32> {
    let repo = super::open_repository(config)?;
    let id = util::resolve_run_ref(reference, repo.as_ref())?;
    let run = repo
        .load_run(id)
        .context("Failed to read run")?
        .with_context(|| format!("Run not found: {}", id))?;
    let report = RunReport::collect(repo.as_ref(), &run).context("Failed to summarise run")?;

    if json {
        render::print_json(&report)?;
    } else {
        render::print_report(&report);
        if failures {
            println!();
            render::print_failures(&report);
        }
    }
    Ok(0)
}
