//! Run state and checkpoint records

use chrono::{DateTime, Utc};
use ls_core::{CommitId, ContentId, FileIdentifier, GcError, ReferenceKind, Result, SnapshotRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use ulid::Ulid;

/// Unique id of one GC run (ULID for timestamp + uniqueness)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Byte key used for repository rows
    pub fn to_key(self) -> [u8; 16] {
        self.0.to_bytes()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = GcError;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(RunId)
            .map_err(|e| GcError::Config(format!("invalid run id '{}': {}", s, e)))
    }
}

/// Run lifecycle
///
/// `CREATED → MARKING → MARK_COMPLETE → SWEEPING → COMPLETED`, with `FAILED`
/// reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Created,
    Marking,
    MarkComplete,
    Sweeping,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Created => "CREATED",
            RunPhase::Marking => "MARKING",
            RunPhase::MarkComplete => "MARK_COMPLETE",
            RunPhase::Sweeping => "SWEEPING",
            RunPhase::Completed => "COMPLETED",
            RunPhase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }

    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Created, Marking)
                | (Marking, MarkComplete)
                | (MarkComplete, Sweeping)
                | (Sweeping, Completed)
                | (Created | Marking | MarkComplete | Sweeping, Failed)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings fixed when a run is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Commits older than this are collectable unless they are a live head
    pub cutoff: DateTime<Utc>,
    /// Heads older than this also obey the cutoff (`None` = heads always live)
    pub head_ceiling: Option<DateTime<Utc>>,
    /// Safety margin subtracted from the mark completion time
    pub grace: Duration,
    pub dry_run: bool,
    /// Non-zero exit when any deletion failed
    pub strict: bool,
    /// Reference resolution failures abort the run
    pub strict_references: bool,
}

impl RunSettings {
    pub fn new(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            head_ceiling: None,
            grace: Duration::from_secs(3 * 60 * 60),
            dry_run: false,
            strict: false,
            strict_references: false,
        }
    }
}

/// One execution of the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcRun {
    pub id: RunId,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub settings: RunSettings,
    pub phase: RunPhase,
    /// The instant the live set became checkpoint-durable
    pub mark_completed_at: Option<DateTime<Utc>>,
    /// Phase the run was in when it failed, used to reopen it
    pub failed_in: Option<RunPhase>,
    pub error: Option<String>,
    /// Stopped by the user; the phase is kept so the run can be resumed
    pub cancelled: bool,
    /// Number of reference listings performed during marking
    pub mark_passes: u32,
}

impl GcRun {
    pub fn new(settings: RunSettings) -> Self {
        Self {
            id: RunId::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            settings,
            phase: RunPhase::Created,
            mark_completed_at: None,
            failed_in: None,
            error: None,
            cancelled: false,
            mark_passes: 0,
        }
    }

    /// Move to the next phase, rejecting illegal transitions
    pub fn transition(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(GcError::InvalidState(format!(
                "run {} cannot move from {} to {}",
                self.id, self.phase, next
            )));
        }
        if next == RunPhase::MarkComplete {
            self.mark_completed_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.phase = next;
        Ok(())
    }

    /// Record an unrecoverable error
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.phase.is_terminal() {
            self.failed_in = Some(self.phase);
            self.phase = RunPhase::Failed;
            self.finished_at = Some(Utc::now());
        }
        self.error = Some(reason.into());
    }

    /// Put a failed run back into the phase it failed in
    pub fn reopen(&mut self) -> Result<()> {
        match (self.phase, self.failed_in) {
            (RunPhase::Failed, Some(previous)) => {
                self.phase = previous;
                self.failed_in = None;
                self.finished_at = None;
                self.error = None;
                Ok(())
            }
            (RunPhase::Completed, _) => Err(GcError::InvalidState(format!(
                "run {} already completed",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    /// Files modified at or after this instant are never deleted
    pub fn deletion_horizon(&self) -> Option<DateTime<Utc>> {
        let grace =
            chrono::Duration::from_std(self.settings.grace).unwrap_or(chrono::Duration::MAX);
        self.mark_completed_at
            .map(|at| at.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }
}

/// Mark-phase status of one named reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Pending,
    InProgress,
    Done,
    /// Resolution failed; reported, not walked
    Skipped,
    /// Dropped from the catalog while the run was going
    Vanished,
}

impl ReferenceStatus {
    /// Whether marking has finished with this reference
    pub fn is_settled(self) -> bool {
        matches!(self, ReferenceStatus::Done | ReferenceStatus::Skipped | ReferenceStatus::Vanished)
    }
}

/// Per-reference bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProgress {
    pub name: String,
    pub kind: ReferenceKind,
    /// Last head seeded into the frontier
    pub head: Option<CommitId>,
    pub status: ReferenceStatus,
    /// Mark pass that first listed this reference
    pub pass: u32,
    /// Times the head moved and was walked again
    pub re_resolutions: u32,
    pub error: Option<String>,
}

impl ReferenceProgress {
    pub fn pending(name: impl Into<String>, kind: ReferenceKind, pass: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            head: None,
            status: ReferenceStatus::Pending,
            pass,
            re_resolutions: 0,
            error: None,
        }
    }
}

/// Deletion status of an orphan candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    Pending,
    Deleted,
    DeleteFailed,
    /// Modified inside the grace window; kept
    SkippedRace,
}

impl CandidateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateStatus::Pending => "PENDING",
            CandidateStatus::Deleted => "DELETED",
            CandidateStatus::DeleteFailed => "DELETE_FAILED",
            CandidateStatus::SkippedRace => "SKIPPED_RACE",
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored file absent from the live set at sweep time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanCandidate {
    pub file: FileIdentifier,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub status: CandidateStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Sweep cursor and tallies for one storage location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepProgress {
    pub location: String,
    /// Path of the last object fully handled
    pub cursor: Option<String>,
    pub done: bool,
    pub scanned: u64,
    pub retained: u64,
    pub bytes_reclaimed: u64,
    pub error: Option<String>,
}

impl SweepProgress {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }
}

/// A snapshot whose files could only partly be enumerated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableSnapshot {
    pub content: ContentId,
    pub snapshot: SnapshotRef,
    pub reason: String,
}

/// Exclusive ownership of a run by one orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl RunLease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
