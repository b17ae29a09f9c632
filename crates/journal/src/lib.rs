//! Checkpoint repository for GC runs
//!
//! This crate provides:
//! - Run state (ULID-based ids, phase machine, settings)
//! - Per-reference mark bookkeeping and persisted traversal frontiers
//! - The live set, partitioned by storage location
//! - Orphan candidates and per-location sweep cursors
//! - A repository-level lease so one run is never driven twice
//!
//! Backed by sled.

pub mod journal;
pub mod repository;
pub mod run;

// Re-exports
pub use journal::Journal;
pub use repository::CheckpointRepository;
pub use run::{
    CandidateStatus, GcRun, OrphanCandidate, ReferenceProgress, ReferenceStatus, RunId, RunLease,
    RunPhase, RunSettings, SweepProgress, UnreadableSnapshot,
};
