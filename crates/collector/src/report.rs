//! End-of-run summary assembled from the checkpoint repository

use chrono::{DateTime, Utc};
use journal::{
    CandidateStatus, CheckpointRepository, GcRun, ReferenceStatus, RunId, RunPhase,
    UnreadableSnapshot,
};
use ls_core::Result;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceCounts {
    pub total: u64,
    pub done: u64,
    pub skipped: u64,
    pub vanished: u64,
    /// Not settled yet (interrupted runs only)
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedReference {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedLocation {
    pub location: String,
    pub error: String,
}

/// Everything an operator needs to judge a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub phase: RunPhase,
    pub cancelled: bool,
    pub dry_run: bool,
    pub cutoff: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub mark_completed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    pub references: ReferenceCounts,
    pub commits_visited: u64,
    pub snapshots_enumerated: u64,
    pub live_files: u64,

    pub locations_swept: u64,
    pub files_scanned: u64,
    pub files_retained: u64,
    pub orphan_candidates: u64,
    pub deleted: u64,
    pub delete_failed: u64,
    pub skipped_race: u64,
    /// Orphans a dry run would have deleted
    pub would_delete: u64,
    pub bytes_reclaimed: u64,

    pub skipped_references: Vec<SkippedReference>,
    pub unreadable_snapshots: Vec<UnreadableSnapshot>,
    pub failed_files: Vec<FailedFile>,
    pub failed_locations: Vec<FailedLocation>,
}

impl RunReport {
    /// Summarise a run from its checkpoints
    pub fn collect(repo: &dyn CheckpointRepository, run: &GcRun) -> Result<Self> {
        let mut references = ReferenceCounts::default();
        let mut skipped_references = Vec::new();
        for progress in repo.references(run.id)? {
            references.total += 1;
            match progress.status {
                ReferenceStatus::Done => references.done += 1,
                ReferenceStatus::Vanished => references.vanished += 1,
                ReferenceStatus::Skipped => {
                    references.skipped += 1;
                    skipped_references.push(SkippedReference {
                        name: progress.name,
                        reason: progress.error.unwrap_or_default(),
                    });
                }
                ReferenceStatus::Pending | ReferenceStatus::InProgress => references.pending += 1,
            }
        }

        let mut report = Self {
            run_id: run.id,
            phase: run.phase,
            cancelled: run.cancelled,
            dry_run: run.settings.dry_run,
            cutoff: run.settings.cutoff,
            created_at: run.created_at,
            mark_completed_at: run.mark_completed_at,
            finished_at: run.finished_at,
            error: run.error.clone(),
            references,
            commits_visited: repo.processed_count(run.id)?,
            snapshots_enumerated: repo.enumerated_count(run.id)?,
            live_files: repo.live_count(run.id)?,
            locations_swept: 0,
            files_scanned: 0,
            files_retained: 0,
            orphan_candidates: 0,
            deleted: 0,
            delete_failed: 0,
            skipped_race: 0,
            would_delete: 0,
            bytes_reclaimed: 0,
            skipped_references,
            unreadable_snapshots: repo.unreadable(run.id)?,
            failed_files: Vec::new(),
            failed_locations: Vec::new(),
        };

        for progress in repo.sweep_progresses(run.id)? {
            report.files_scanned += progress.scanned;
            report.files_retained += progress.retained;
            report.bytes_reclaimed += progress.bytes_reclaimed;
            match progress.error {
                Some(error) => report.failed_locations.push(FailedLocation {
                    location: progress.location,
                    error,
                }),
                None if progress.done => report.locations_swept += 1,
                None => {}
            }
        }

        for candidate in repo.candidates(run.id, None)? {
            match candidate.status {
                CandidateStatus::Pending => {
                    report.orphan_candidates += 1;
                    if run.settings.dry_run {
                        report.would_delete += 1;
                    }
                }
                CandidateStatus::Deleted => {
                    report.orphan_candidates += 1;
                    report.deleted += 1;
                }
                CandidateStatus::DeleteFailed => {
                    report.orphan_candidates += 1;
                    report.delete_failed += 1;
                    report.failed_files.push(FailedFile {
                        file: candidate.file.to_string(),
                        error: candidate.error.unwrap_or_default(),
                    });
                }
                CandidateStatus::SkippedRace => report.skipped_race += 1,
            }
        }

        Ok(report)
    }

    /// Completed and not interrupted
    pub fn succeeded(&self) -> bool {
        self.phase == RunPhase::Completed && !self.cancelled
    }

    /// Process exit status: 0 success, 1 failed or unfinished, 2 when
    /// `strict` and some file or location could not be swept
    pub fn exit_code(&self, strict: bool) -> i32 {
        if !self.succeeded() {
            return 1;
        }
        if strict && (self.delete_failed > 0 || !self.failed_locations.is_empty()) {
            return 2;
        }
        0
    }
}
