//! Configuration management command
//!
//! Provides CLI interface to view and edit the lakesweep config file.

use anyhow::{Context, Result};
use cli_lib::config::{self, Config};
use owo_colors::OwoColorize;

fn show(key: &str, value: impl std::fmt::Display) {
    println!("  {} = {}", key.cyan(), value);
}

fn show_optional(key: &str, value: Option<&str>, unset: &str) {
    match value {
        Some(value) => show(key, value),
        None => println!("  {} = {}", key.cyan(), unset.dimmed()),
    }
}

/// List all configuration values
pub async fn run_list() -> Result<i32> {
    let config = config::load()?;
    let config_path = config::config_file_path()?;

    println!("{}", "Lakesweep Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), config_path.display().dimmed());

    println!("{}", "[gc]".yellow());
    println!(
        "  {} = {} {}",
        "grace".cyan(),
        config.gc.grace,
        format!("({})", config.grace_display()).dimmed()
    );
    show("retain", &config.gc.retain);
    show_optional("head_age_ceiling", config.gc.head_age_ceiling.as_deref(), "(heads always live)");
    show("strict", config.gc.strict);
    show("strict_references", config.gc.strict_references);
    show("dedup_cache_limit", config.gc.dedup_cache_limit);
    show("max_head_reresolutions", config.gc.max_head_reresolutions);
    show("max_mark_passes", config.gc.max_mark_passes);
    show_optional("run_timeout", config.gc.run_timeout.as_deref(), "(no limit)");
    if !config.gc.extra_locations.is_empty() {
        show("extra_locations", config.gc.extra_locations.join(", "));
    }

    println!("\n{}", "[concurrency]".yellow());
    show("mark_parallelism", config.concurrency.mark_parallelism);
    show("enumerate_parallelism", config.concurrency.enumerate_parallelism);
    show("sweep_parallelism", config.concurrency.sweep_parallelism);
    show("page_size", config.concurrency.page_size);
    show("delete_batch_size", config.concurrency.delete_batch_size);

    println!("\n{}", "[retry]".yellow());
    show("max_attempts", config.retry.max_attempts);
    show("initial_backoff_ms", config.retry.initial_backoff_ms);
    show("max_backoff_ms", config.retry.max_backoff_ms);
    show("call_timeout_secs", config.retry.call_timeout_secs);

    println!("\n{}", "[repository]".yellow());
    let repository = config.repository_path()?;
    show("path", repository.display());

    println!("\n{}", "[logging]".yellow());
    show("level", &config.logging.level);
    let directory = config.logging.directory.as_ref().map(|d| d.display().to_string());
    show_optional("directory", directory.as_deref(), "(stderr only)");

    println!("\n{}", "Valid Ranges:".bold());
    println!("  *_parallelism: 1-256");
    println!("  page_size: 1-100,000");
    println!("  delete_batch_size: 1-10,000");
    println!("  max_attempts: 1-100");
    println!("  durations: <n>s, <n>m, <n>h, <n>d, <n>w");

    Ok(0)
}

/// Get a single configuration value
pub async fn run_get(key: &str) -> Result<i32> {
    let config = config::load()?;
    println!("{}", config.get(key)?);
    Ok(0)
}

/// Set a configuration value
pub async fn run_set(key: &str, value: &str) -> Result<i32> {
    let mut config = config::load()?;
    config.set(key, value)?;

    // Validate before saving
    config.validate().context("Invalid configuration value")?;
    config::save(&config)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    Ok(0)
}

/// Show the config file path and optionally create it
pub async fn run_path(create: bool) -> Result<i32> {
    let config_path = config::config_file_path()?;

    if create && !config_path.exists() {
        config::init_if_missing()?;
        println!("{} Created config file at: {}", "✓".green(), config_path.display());
    } else if config_path.exists() {
        println!("{}", config_path.display());
    } else {
        println!("{}", config_path.display());
        println!("{}", "File does not exist. Use --create to create it.".yellow());
    }

    Ok(0)
}

/// Show example configuration
pub async fn run_example() -> Result<i32> {
    print!("{}", config::example_config());
    Ok(0)
}

/// Load the config, failing with the file location on error
pub fn load_for_command() -> Result<Config> {
    let path = config::config_file_path()?;
    config::load().with_context(|| format!("Failed to load configuration from {}", path.display()))
}
