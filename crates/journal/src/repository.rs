//! Checkpoint repository capability
//!
//! The single source of truth for run progress. Every write is an
//! idempotent upsert keyed by a natural identifier so callers may retry.

use crate::run::{
    CandidateStatus, GcRun, OrphanCandidate, ReferenceProgress, RunId, RunLease, SweepProgress,
    UnreadableSnapshot,
};
use ls_core::{CommitId, ContentId, FileIdentifier, LiveSetEntry, Result, SnapshotRef};
use std::time::Duration;

pub trait CheckpointRepository: Send + Sync {
    // ---- runs ----

    /// Persist a new run; `RunConflict` if the id already exists
    fn create_run(&self, run: &GcRun) -> Result<()>;
    fn load_run(&self, id: RunId) -> Result<Option<GcRun>>;
    fn save_run(&self, run: &GcRun) -> Result<()>;
    /// All runs, oldest first
    fn list_runs(&self) -> Result<Vec<GcRun>>;

    // ---- lease ----

    /// Take ownership of a run; `RunConflict` while another owner holds a live lease
    fn acquire_lease(&self, id: RunId, owner: &str, ttl: Duration) -> Result<RunLease>;
    fn renew_lease(&self, id: RunId, owner: &str, ttl: Duration) -> Result<RunLease>;
    fn release_lease(&self, id: RunId, owner: &str) -> Result<()>;

    // ---- reference bookkeeping ----

    fn save_reference(&self, id: RunId, progress: &ReferenceProgress) -> Result<()>;
    fn reference(&self, id: RunId, name: &str) -> Result<Option<ReferenceProgress>>;
    fn references(&self, id: RunId) -> Result<Vec<ReferenceProgress>>;

    // ---- mark cursor ----

    /// Commits still to visit for a reference
    fn frontier(&self, id: RunId, reference: &str) -> Result<Vec<CommitId>>;
    fn seed_frontier(&self, id: RunId, reference: &str, commits: &[CommitId]) -> Result<()>;
    /// Remove a commit from the frontier without marking it processed
    fn drop_from_frontier(&self, id: RunId, reference: &str, commit: &CommitId) -> Result<()>;
    /// Atomically mark `commit` processed, remove it from the frontier and
    /// add its unprocessed `parents`
    fn complete_commit(
        &self,
        id: RunId,
        reference: &str,
        commit: &CommitId,
        parents: &[CommitId],
    ) -> Result<()>;
    fn is_processed(&self, id: RunId, commit: &CommitId) -> Result<bool>;
    fn processed_count(&self, id: RunId) -> Result<u64>;

    /// Record that all files of a snapshot are in the live set
    fn mark_enumerated(&self, id: RunId, content: &ContentId, snapshot: &SnapshotRef) -> Result<()>;
    fn is_enumerated(&self, id: RunId, content: &ContentId, snapshot: &SnapshotRef) -> Result<bool>;
    fn enumerated_count(&self, id: RunId) -> Result<u64>;

    fn record_unreadable(&self, id: RunId, snapshot: &UnreadableSnapshot) -> Result<()>;
    fn unreadable(&self, id: RunId) -> Result<Vec<UnreadableSnapshot>>;

    // ---- live set ----

    /// Upsert entries into their location partitions; returns how many were new
    fn insert_live(&self, id: RunId, entries: &[LiveSetEntry]) -> Result<u64>;
    fn is_live(&self, id: RunId, file: &FileIdentifier) -> Result<bool>;
    fn live_locations(&self, id: RunId) -> Result<Vec<String>>;
    fn live_count(&self, id: RunId) -> Result<u64>;

    // ---- sweep ----

    fn candidate(&self, id: RunId, file: &FileIdentifier) -> Result<Option<OrphanCandidate>>;
    /// Candidates in key order, optionally filtered by status
    fn candidates(
        &self,
        id: RunId,
        status: Option<CandidateStatus>,
    ) -> Result<Vec<OrphanCandidate>>;
    fn sweep_progress(&self, id: RunId, location: &str) -> Result<SweepProgress>;
    fn sweep_progresses(&self, id: RunId) -> Result<Vec<SweepProgress>>;
    /// Atomically upsert a page's candidates together with the advanced cursor
    fn commit_sweep_page(
        &self,
        id: RunId,
        candidates: &[OrphanCandidate],
        progress: &SweepProgress,
    ) -> Result<()>;

    /// Make every previous write durable
    fn flush(&self) -> Result<()>;
}
