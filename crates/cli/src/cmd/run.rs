//! Start a GC run

use anyhow::{Context, Result};
use cli_lib::config::Config;
use cli_lib::{lake, render, util};
use collector::{Orchestrator, RunReport};
use journal::{GcRun, RunSettings};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Options of `lakesweep run`
pub struct RunOptions {
    pub catalog: PathBuf,
    pub cutoff: Option<String>,
    pub retain: Option<String>,
    pub grace: Option<String>,
    pub head_age_ceiling: Option<String>,
    pub dry_run: bool,
    pub strict: bool,
    pub strict_references: bool,
    pub timeout: Option<String>,
    pub extra_locations: Vec<String>,
    pub json: bool,
}

pub async fn run(config: &Config, options: RunOptions) -> Result<i32> {
    // 1. Resolve run settings from flags and config
    let cutoff = util::resolve_cutoff(
        options.cutoff.as_deref(),
        options.retain.as_deref(),
        &config.gc.retain,
    )?;
    let mut settings = RunSettings::new(cutoff);
    settings.grace = util::parse_duration(options.grace.as_deref().unwrap_or(&config.gc.grace))
        .context("Invalid grace window")?;
    let ceiling = options
        .head_age_ceiling
        .as_ref()
        .or(config.gc.head_age_ceiling.as_ref());
    settings.head_ceiling = match ceiling {
        Some(ceiling) => {
            let age = chrono::Duration::from_std(util::parse_duration(ceiling)?)
                .context("Head age ceiling too large")?;
            Some(chrono::Utc::now() - age)
        }
        None => None,
    };
    settings.dry_run = options.dry_run;
    settings.strict = options.strict || config.gc.strict;
    settings.strict_references = options.strict_references || config.gc.strict_references;

    let mut gc_config = config.gc_config()?;
    if let Some(timeout) = &options.timeout {
        gc_config.run_timeout = Some(util::parse_duration(timeout).context("Invalid --timeout")?);
    }
    gc_config.extra_locations.extend(options.extra_locations);
    debug!(
        cutoff = %settings.cutoff,
        grace = ?settings.grace,
        dry_run = settings.dry_run,
        "resolved run settings"
    );

    // 2. Wire collaborators and the checkpoint repository
    let collaborators = lake::collaborators(&options.catalog)?;
    let repo = super::open_repository(config)?;
    let orchestrator = Orchestrator::new(repo, collaborators, gc_config);

    // 3. Create and drive the run
    let run = orchestrator
        .create_run(settings)
        .context("Failed to create GC run")?;
    info!(run_id = %run.id, catalog = %options.catalog.display(), "run created");
    if !options.json {
        println!("Run {} started", run.id.to_string().yellow());
    }
    let strict = run.settings.strict;
    let report = drive(&orchestrator, run, options.json).await?;

    // 4. Report
    finish(&report, strict, options.json)
}

/// Execute a run with a spinner and Ctrl-C cancellation
pub(crate) async fn drive(
    orchestrator: &Orchestrator,
    run: GcRun,
    json: bool,
) -> Result<RunReport> {
    let cancel = orchestrator.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            eprintln!("Stopping after in-flight work; progress is kept");
            cancel.cancel();
        }
    });

    let spinner = (!json).then(|| {
        let message = if run.settings.dry_run {
            "Collecting (dry run)..."
        } else {
            "Collecting..."
        };
        render::spinner(message)
    });

    let id = run.id;
    let result = orchestrator.execute(run).await;
    interrupt.abort();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    result.with_context(|| format!("Run {} aborted", id))
}

pub(crate) fn finish(report: &RunReport, strict: bool, json: bool) -> Result<i32> {
    if json {
        render::print_json(report)?;
    } else {
        println!();
        render::print_report(report);
    }
    Ok(report.exit_code(strict))
}
