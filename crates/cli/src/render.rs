//! Human and JSON rendering of run reports

use crate::util::{format_relative_time, format_size};
use anyhow::{Context, Result};
use collector::RunReport;
use indicatif::{ProgressBar, ProgressStyle};
use journal::{GcRun, RunPhase};
use owo_colors::OwoColorize;
use std::time::Duration;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

pub fn print_json(report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    println!("{}", json);
    Ok(())
}

fn phase_label(report: &RunReport) -> String {
    match report.phase {
        _ if report.cancelled => format!("{} (cancelled)", report.phase).yellow().to_string(),
        RunPhase::Completed => report.phase.to_string().green().to_string(),
        RunPhase::Failed => report.phase.to_string().red().to_string(),
        _ => report.phase.to_string().yellow().to_string(),
    }
}

/// Summary block printed after `run`, `resume` and `inspect`
pub fn print_report(report: &RunReport) {
    let title = if report.dry_run { "GC Dry Run" } else { "GC Run" };
    println!("{} {}", title.bold(), report.run_id.to_string().yellow());
    println!("{}", RULE);
    println!("Phase:               {}", phase_label(report));
    println!("Cutoff:              {}", report.cutoff.to_rfc3339().dimmed());
    if let Some(at) = report.mark_completed_at {
        println!("Mark completed:      {}", format_relative_time(at).dimmed());
    }
    if let Some(error) = &report.error {
        println!("Error:               {}", error.red());
    }
    println!();

    println!("{}", "Mark".bold());
    println!(
        "  References:        {} ({} done, {} skipped, {} vanished)",
        report.references.total,
        report.references.done,
        report.references.skipped,
        report.references.vanished
    );
    println!("  Commits visited:   {}", report.commits_visited);
    println!("  Snapshots read:    {}", report.snapshots_enumerated);
    println!("  Live files:        {}", report.live_files.to_string().cyan());
    println!();

    println!("{}", "Sweep".bold());
    println!("  Locations:         {}", report.locations_swept);
    println!("  Files scanned:     {}", report.files_scanned);
    println!("  Files retained:    {}", report.files_retained);
    println!("  Skipped (race):    {}", report.skipped_race);
    if report.dry_run {
        println!("  Would delete:      {}", report.would_delete.to_string().yellow());
    } else {
        println!("  Deleted:           {}", report.deleted.to_string().yellow());
        let failed = report.delete_failed.to_string();
        if report.delete_failed > 0 {
            println!("  Failed:            {}", failed.red());
        } else {
            println!("  Failed:            {}", failed);
        }
        println!("  Space reclaimed:   {}", format_size(report.bytes_reclaimed).green());
    }

    let problems = report.skipped_references.len()
        + report.unreadable_snapshots.len()
        + report.failed_locations.len()
        + report.failed_files.len();
    if problems > 0 {
        println!();
        let hint = format!(
            "{} problem(s) recorded; see 'lakesweep inspect {} --failures'",
            problems, report.run_id
        );
        println!("{}", hint.yellow());
    }
    if report.cancelled {
        println!();
        println!("{}", format!("Resume with 'lakesweep resume {}'", report.run_id).dimmed());
    }
}

/// Everything that did not go cleanly, one line each
pub fn print_failures(report: &RunReport) {
    if report.skipped_references.is_empty()
        && report.unreadable_snapshots.is_empty()
        && report.failed_locations.is_empty()
        && report.failed_files.is_empty()
    {
        println!("{}", "No failures recorded".dimmed());
        return;
    }

    if !report.skipped_references.is_empty() {
        println!("{}", "Skipped references".bold());
        for skipped in &report.skipped_references {
            println!("  {} {}", skipped.name.cyan(), skipped.reason.dimmed());
        }
    }
    if !report.unreadable_snapshots.is_empty() {
        println!("{}", "Partially unreadable snapshots".bold());
        for snapshot in &report.unreadable_snapshots {
            println!(
                "  {}@{} {}",
                snapshot.content.cyan(),
                snapshot.snapshot,
                snapshot.reason.dimmed()
            );
        }
    }
    if !report.failed_locations.is_empty() {
        println!("{}", "Locations not swept".bold());
        for location in &report.failed_locations {
            println!("  {} {}", location.location.cyan(), location.error.dimmed());
        }
    }
    if !report.failed_files.is_empty() {
        println!("{}", "Failed deletions".bold());
        for file in &report.failed_files {
            println!("  {} {}", file.file.red(), file.error.dimmed());
        }
    }
}

/// One line per run for `lakesweep list`
pub fn print_run_line(run: &GcRun) {
    let id = run.id.to_string();
    let mode = if run.settings.dry_run { "dry-run" } else { "delete" };
    let phase = if run.cancelled {
        format!("{} (cancelled)", run.phase)
    } else {
        run.phase.to_string()
    };
    println!(
        "{} {:<26} {:<8} {}",
        id.yellow(),
        phase,
        mode.cyan(),
        format_relative_time(run.created_at).dimmed()
    );
}

/// Spinner shown while a run is in progress
pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
