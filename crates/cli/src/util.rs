//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use journal::{CheckpointRepository, RunId};
use std::time::Duration;

/// Resolve a run reference to its id
///
/// Supports:
/// - Full ULID: "01HN8XYZ..."
/// - Unique ULID prefix: "01HN8" (at least 4 characters)
/// - "latest": the most recently created run
pub fn resolve_run_ref(reference: &str, repo: &dyn CheckpointRepository) -> Result<RunId> {
    if let Ok(id) = reference.parse::<RunId>() {
        if repo.load_run(id)?.is_some() {
            return Ok(id);
        }
        anyhow::bail!("Run not found: {}", reference);
    }

    let runs = repo.list_runs().context("Failed to list runs")?;
    if reference == "latest" {
        return runs
            .last()
            .map(|run| run.id)
            .context("No runs recorded yet");
    }

    if reference.len() >= 4 {
        let upper = reference.to_ascii_uppercase();
        let matching: Vec<RunId> = runs
            .iter()
            .map(|run| run.id)
            .filter(|id| id.to_string().starts_with(&upper))
            .collect();
        match matching.len() {
            1 => return Ok(matching[0]),
            0 => {}
            n => anyhow::bail!("Ambiguous run prefix '{}': matches {} runs", reference, n),
        }
    }

    anyhow::bail!("Unknown run reference: '{}'", reference)
}

/// Parse a duration like "90s", "15m", "3h", "7d" or "2w"
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .with_context(|| format!("Duration '{}' needs a unit (s, m, h, d, w)", text))?;
    let (number, unit) = text.split_at(split);
    let value: u64 = number
        .parse()
        .with_context(|| format!("Invalid duration '{}'", text))?;
    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        _ => anyhow::bail!("Unknown duration unit '{}' in '{}'", unit, text),
    };
    Ok(Duration::from_secs(value.saturating_mul(seconds)))
}

/// Compact form of a duration using its largest whole unit
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    for (unit, size) in [("w", 604_800), ("d", 86_400), ("h", 3600), ("m", 60)] {
        if secs >= size && secs % size == 0 {
            return format!("{}{}", secs / size, unit);
        }
    }
    format!("{}s", secs)
}

/// Retention cutoff from `--cutoff <rfc3339>` or `--retain <duration>`
pub fn resolve_cutoff(
    cutoff: Option<&str>,
    retain: Option<&str>,
    default_retain: &str,
) -> Result<DateTime<Utc>> {
    if let Some(cutoff) = cutoff {
        return DateTime::parse_from_rfc3339(cutoff)
            .map(|at| at.with_timezone(&Utc))
            .with_context(|| format!("Invalid --cutoff '{}': expected RFC 3339", cutoff));
    }
    let retain = parse_duration(retain.unwrap_or(default_retain))?;
    let retain = chrono::Duration::from_std(retain).context("Retention window too large")?;
    Ok(Utc::now() - retain)
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(at: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - at).num_seconds();
    if seconds < 0 {
        "in the future".to_string()
    } else if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else if seconds < 604800 {
        format!("{} days ago", seconds / 86400)
    } else {
        format!("{} weeks ago", seconds / 604800)
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
