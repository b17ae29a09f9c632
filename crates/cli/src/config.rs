//! Lakesweep configuration file
//!
//! Loaded from `$LAKESWEEP_CONFIG` or `<config dir>/lakesweep/config.toml`.
//! A missing file means defaults; every section and field is optional.

use crate::util::{format_duration, parse_duration};
use anyhow::{Context, Result};
use collector::GcConfig;
use ls_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV: &str = "LAKESWEEP_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gc: GcSection,
    pub concurrency: ConcurrencySection,
    pub retry: RetrySection,
    pub repository: RepositorySection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcSection {
    /// Safety margin before the mark completion time ("3h")
    pub grace: String,
    /// Default retention when `--cutoff`/`--retain` are not given ("7d")
    pub retain: String,
    /// Heads older than this obey the cutoff too (unset = heads always live)
    pub head_age_ceiling: Option<String>,
    pub strict: bool,
    pub strict_references: bool,
    pub dedup_cache_limit: usize,
    pub max_head_reresolutions: u32,
    pub max_mark_passes: u32,
    /// Whole-run timeout (unset = none)
    pub run_timeout: Option<String>,
    /// Locations swept even when no live file remains in them
    pub extra_locations: Vec<String>,
}

impl Default for GcSection {
    fn default() -> Self {
        Self {
            grace: "3h".into(),
            retain: "7d".into(),
            head_age_ceiling: None,
            strict: false,
            strict_references: false,
            dedup_cache_limit: 1_000_000,
            max_head_reresolutions: 3,
            max_mark_passes: 8,
            run_timeout: None,
            extra_locations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySection {
    pub mark_parallelism: usize,
    pub enumerate_parallelism: usize,
    pub sweep_parallelism: usize,
    pub page_size: usize,
    pub delete_batch_size: usize,
}

impl Default for ConcurrencySection {
    fn default() -> Self {
        Self {
            mark_parallelism: 4,
            enumerate_parallelism: 8,
            sweep_parallelism: 4,
            page_size: 1000,
            delete_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-call timeout, 0 = none
    pub call_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            call_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    /// Checkpoint database directory (default: `<data dir>/lakesweep`)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Write a daily log file here as well
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            directory: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        parse_duration(&self.gc.grace).context("gc.grace")?;
        parse_duration(&self.gc.retain).context("gc.retain")?;
        if let Some(ceiling) = &self.gc.head_age_ceiling {
            parse_duration(ceiling).context("gc.head_age_ceiling")?;
        }
        if let Some(timeout) = &self.gc.run_timeout {
            parse_duration(timeout).context("gc.run_timeout")?;
        }

        let ranges = [
            ("concurrency.mark_parallelism", self.concurrency.mark_parallelism, 1, 256),
            ("concurrency.enumerate_parallelism", self.concurrency.enumerate_parallelism, 1, 256),
            ("concurrency.sweep_parallelism", self.concurrency.sweep_parallelism, 1, 256),
            ("concurrency.page_size", self.concurrency.page_size, 1, 100_000),
            ("concurrency.delete_batch_size", self.concurrency.delete_batch_size, 1, 10_000),
        ];
        for (key, value, min, max) in ranges {
            if value < min || value > max {
                anyhow::bail!("{} must be between {} and {} (got {})", key, min, max, value);
            }
        }
        if !(1..=100).contains(&self.retry.max_attempts) {
            anyhow::bail!("retry.max_attempts must be between 1 and 100");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            anyhow::bail!("retry.initial_backoff_ms must not exceed retry.max_backoff_ms");
        }
        if self.gc.max_mark_passes == 0 {
            anyhow::bail!("gc.max_mark_passes must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            call_timeout: (self.retry.call_timeout_secs > 0)
                .then(|| Duration::from_secs(self.retry.call_timeout_secs)),
        }
    }

    /// Collector knobs from this file
    pub fn gc_config(&self) -> Result<GcConfig> {
        let retry = self.retry_policy();
        let run_timeout = self.gc.run_timeout.as_deref().map(parse_duration).transpose()?;
        Ok(GcConfig {
            mark_parallelism: self.concurrency.mark_parallelism,
            enumerate_parallelism: self.concurrency.enumerate_parallelism,
            sweep_parallelism: self.concurrency.sweep_parallelism,
            page_size: self.concurrency.page_size,
            delete_batch_size: self.concurrency.delete_batch_size,
            dedup_cache_limit: self.gc.dedup_cache_limit,
            max_head_reresolutions: self.gc.max_head_reresolutions,
            max_mark_passes: self.gc.max_mark_passes,
            extra_locations: self.gc.extra_locations.clone(),
            catalog_retry: retry,
            table_retry: retry,
            store_retry: retry,
            run_timeout,
            ..GcConfig::default()
        })
    }

    pub fn repository_path(&self) -> Result<PathBuf> {
        match &self.repository.path {
            Some(path) => Ok(path.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("lakesweep"))
                .context("Could not determine data directory; set repository.path"),
        }
    }

    /// Look up a `section.key` value as a display string
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "gc.grace" => self.gc.grace.clone(),
            "gc.retain" => self.gc.retain.clone(),
            "gc.head_age_ceiling" => self.gc.head_age_ceiling.clone().unwrap_or_default(),
            "gc.strict" => self.gc.strict.to_string(),
            "gc.strict_references" => self.gc.strict_references.to_string(),
            "gc.dedup_cache_limit" => self.gc.dedup_cache_limit.to_string(),
            "gc.max_head_reresolutions" => self.gc.max_head_reresolutions.to_string(),
            "gc.max_mark_passes" => self.gc.max_mark_passes.to_string(),
            "gc.run_timeout" => self.gc.run_timeout.clone().unwrap_or_default(),
            "concurrency.mark_parallelism" => self.concurrency.mark_parallelism.to_string(),
            "concurrency.enumerate_parallelism" => {
                self.concurrency.enumerate_parallelism.to_string()
            }
            "concurrency.sweep_parallelism" => self.concurrency.sweep_parallelism.to_string(),
            "concurrency.page_size" => self.concurrency.page_size.to_string(),
            "concurrency.delete_batch_size" => self.concurrency.delete_batch_size.to_string(),
            "retry.max_attempts" => self.retry.max_attempts.to_string(),
            "retry.initial_backoff_ms" => self.retry.initial_backoff_ms.to_string(),
            "retry.max_backoff_ms" => self.retry.max_backoff_ms.to_string(),
            "retry.call_timeout_secs" => self.retry.call_timeout_secs.to_string(),
            "repository.path" => self
                .repository
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "logging.level" => self.logging.level.clone(),
            "logging.directory" => self
                .logging
                .directory
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            _ => anyhow::bail!(
                "Unknown config key: {}. Use 'lakesweep config list' to see available keys.",
                key
            ),
        };
        Ok(value)
    }

    /// Set a `section.key` value from its string form; an empty string
    /// clears optional keys
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn optional(value: &str) -> Option<String> {
            (!value.is_empty()).then(|| value.to_string())
        }
        fn number<T: std::str::FromStr>(value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid value: must be a non-negative integer"))
        }
        fn flag(value: &str) -> Result<bool> {
            value.parse().context("Invalid value: must be 'true' or 'false'")
        }

        match key {
            "gc.grace" => self.gc.grace = value.to_string(),
            "gc.retain" => self.gc.retain = value.to_string(),
            "gc.head_age_ceiling" => self.gc.head_age_ceiling = optional(value),
            "gc.strict" => self.gc.strict = flag(value)?,
            "gc.strict_references" => self.gc.strict_references = flag(value)?,
            "gc.dedup_cache_limit" => self.gc.dedup_cache_limit = number(value)?,
            "gc.max_head_reresolutions" => self.gc.max_head_reresolutions = number(value)?,
            "gc.max_mark_passes" => self.gc.max_mark_passes = number(value)?,
            "gc.run_timeout" => self.gc.run_timeout = optional(value),
            "concurrency.mark_parallelism" => self.concurrency.mark_parallelism = number(value)?,
            "concurrency.enumerate_parallelism" => {
                self.concurrency.enumerate_parallelism = number(value)?
            }
            "concurrency.sweep_parallelism" => self.concurrency.sweep_parallelism = number(value)?,
            "concurrency.page_size" => self.concurrency.page_size = number(value)?,
            "concurrency.delete_batch_size" => self.concurrency.delete_batch_size = number(value)?,
            "retry.max_attempts" => self.retry.max_attempts = number(value)?,
            "retry.initial_backoff_ms" => self.retry.initial_backoff_ms = number(value)?,
            "retry.max_backoff_ms" => self.retry.max_backoff_ms = number(value)?,
            "retry.call_timeout_secs" => self.retry.call_timeout_secs = number(value)?,
            "repository.path" => self.repository.path = optional(value).map(PathBuf::from),
            "logging.level" => self.logging.level = value.to_string(),
            "logging.directory" => self.logging.directory = optional(value).map(PathBuf::from),
            _ => anyhow::bail!(
                "Unknown config key: {}. Use 'lakesweep config list' to see available keys.",
                key
            ),
        }
        Ok(())
    }

    /// Human form of the grace window, for display
    pub fn grace_display(&self) -> String {
        parse_duration(&self.gc.grace)
            .map(format_duration)
            .unwrap_or_else(|_| self.gc.grace.clone())
    }
}

/// Config file location
pub fn config_file_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("lakesweep").join("config.toml"))
        .context("Could not determine config directory")
}

/// Load the config file, falling back to defaults when it does not exist
pub fn load() -> Result<Config> {
    let path = config_file_path()?;
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn save(config: &Config) -> Result<()> {
    let path = config_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let raw = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(&path, raw).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write the default config if no file exists yet
pub fn init_if_missing() -> Result<PathBuf> {
    let path = config_file_path()?;
    if !path.exists() {
        save(&Config::default())?;
    }
    Ok(path)
}

pub fn example_config() -> &'static str {
    r#"# Lakesweep configuration
# Location: $LAKESWEEP_CONFIG or ~/.config/lakesweep/config.toml

[gc]
# Files modified within this window of the mark completion are never deleted
grace = "3h"
# Default retention when no --cutoff or --retain is given
retain = "7d"
# Heads older than this obey the retention cutoff as well (default: heads always live)
# head_age_ceiling = "365d"
strict = false
strict_references = false
dedup_cache_limit = 1000000
max_head_reresolutions = 3
max_mark_passes = 8
# run_timeout = "6h"
# extra_locations = ["file:///lake/dropped_table/"]

[concurrency]
mark_parallelism = 4
enumerate_parallelism = 8
sweep_parallelism = 4
page_size = 1000
delete_batch_size = 100

[retry]
max_attempts = 5
initial_backoff_ms = 100
max_backoff_ms = 10000
call_timeout_secs = 30

[repository]
# path = "/var/lib/lakesweep"

[logging]
level = "warn"
# directory = "/var/log/lakesweep"
"#
}
