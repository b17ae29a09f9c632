//! Collector tuning and retention

use chrono::{DateTime, Utc};
use journal::RunSettings;
use ls_core::{CommitRef, GcError, Result, RetryPolicy};
use std::time::Duration;

/// Knobs for one orchestrator
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Maximum reference walks in flight
    pub mark_parallelism: usize,
    /// Maximum snapshot enumerations in flight per commit batch
    pub enumerate_parallelism: usize,
    /// Maximum storage locations swept at once
    pub sweep_parallelism: usize,
    /// Objects requested per listing page
    pub page_size: usize,
    /// Files handed to one `delete_batch` call
    pub delete_batch_size: usize,
    /// Live entries written per repository batch
    pub live_batch_size: usize,
    /// Per-content dedup cache size before it is cleared (files)
    pub dedup_cache_limit: usize,
    /// Times a moved head is walked again before the reference is settled
    pub max_head_reresolutions: u32,
    /// Reference listings per mark phase, catching references created mid-run
    pub max_mark_passes: u32,
    /// Locations swept even if no live file lives there
    pub extra_locations: Vec<String>,
    pub catalog_retry: RetryPolicy,
    pub table_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    /// Lease time-to-live; renewed at a third of this
    pub lease_ttl: Duration,
    /// Whole-run limit, `None` = unlimited
    pub run_timeout: Option<Duration>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            mark_parallelism: 4,
            enumerate_parallelism: 8,
            sweep_parallelism: 4,
            page_size: 1000,
            delete_batch_size: 100,
            live_batch_size: 512,
            dedup_cache_limit: 1_000_000,
            max_head_reresolutions: 3,
            max_mark_passes: 8,
            extra_locations: Vec::new(),
            catalog_retry: RetryPolicy::default(),
            table_retry: RetryPolicy::default(),
            store_retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(60),
            run_timeout: None,
        }
    }
}

impl GcConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("mark_parallelism", self.mark_parallelism),
            ("enumerate_parallelism", self.enumerate_parallelism),
            ("sweep_parallelism", self.sweep_parallelism),
            ("page_size", self.page_size),
            ("delete_batch_size", self.delete_batch_size),
            ("live_batch_size", self.live_batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(GcError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.lease_ttl < Duration::from_secs(1) {
            return Err(GcError::Config("lease_ttl must be at least one second".into()));
        }
        if self.max_mark_passes == 0 {
            return Err(GcError::Config("max_mark_passes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Decides which commits keep their snapshots live
pub trait RetentionPredicate: Send + Sync {
    /// Non-head commit: is it young enough to be walked?
    fn retains(&self, commit: &CommitRef) -> bool;

    /// Head of a live reference
    fn retains_head(&self, commit: &CommitRef) -> bool;
}

/// Age-based retention: commits at or after `cutoff` are retained
///
/// Heads are always retained unless `head_ceiling` is set, in which case
/// heads older than the ceiling also obey the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffRetention {
    pub cutoff: DateTime<Utc>,
    pub head_ceiling: Option<DateTime<Utc>>,
}

impl CutoffRetention {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            cutoff: settings.cutoff,
            head_ceiling: settings.head_ceiling,
        }
    }
}

impl RetentionPredicate for CutoffRetention {
    fn retains(&self, commit: &CommitRef) -> bool {
        commit.timestamp >= self.cutoff
    }

    fn retains_head(&self, commit: &CommitRef) -> bool {
        match self.head_ceiling {
            Some(ceiling) if commit.timestamp < ceiling => self.retains(commit),
            _ => true,
        }
    }
}
