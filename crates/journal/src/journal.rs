//! Checkpoint journal using sled
//!
//! Layout: two global trees (`runs`, `leases`) plus a family of trees per
//! run, all prefixed with `run:<id>:` so runs never share rows. Live-set
//! entries are partitioned into one tree per storage location.

use crate::repository::CheckpointRepository;
use crate::run::{
    CandidateStatus, GcRun, OrphanCandidate, ReferenceProgress, RunId, RunLease, SweepProgress,
    UnreadableSnapshot,
};
use chrono::Utc;
use ls_core::{
    partition_key, CommitId, ContentId, FileIdentifier, GcError, LiveSetEntry, Result, SnapshotRef,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const EMPTY: &[u8] = &[];

/// Sled-backed checkpoint repository
pub struct Journal {
    db: Db,
    runs: Tree,
    leases: Tree,
}

impl Journal {
    /// Open or create a journal in the given directory
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path.join("checkpoints.db")).map_err(GcError::unavailable)?;
        Self::from_db(db)
    }

    /// Journal that lives only as long as the process
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(GcError::unavailable)?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let runs = db.open_tree("runs").map_err(GcError::unavailable)?;
        let leases = db.open_tree("leases").map_err(GcError::unavailable)?;
        Ok(Self { db, runs, leases })
    }

    fn tree(&self, id: RunId, name: &str) -> Result<Tree> {
        self.db
            .open_tree(format!("run:{}:{}", id, name))
            .map_err(GcError::unavailable)
    }

    fn live_partition(&self, id: RunId, location: &str) -> Result<Tree> {
        self.tree(id, &format!("live:{}", partition_key(location).short_hex()))
    }

    fn update_lease<F>(&self, id: RunId, owner: &str, ttl: Duration, allowed: F) -> Result<RunLease>
    where
        F: Fn(Option<&RunLease>) -> Result<()>,
    {
        let key = id.to_key();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| GcError::Config(e.to_string()))?;

        loop {
            let current = self.leases.get(key).map_err(GcError::unavailable)?;
            let existing: Option<RunLease> = current.as_deref().map(decode).transpose()?;
            allowed(existing.as_ref())?;

            let lease = RunLease {
                owner: owner.to_string(),
                expires_at: Utc::now() + ttl,
            };
            let swapped = self
                .leases
                .compare_and_swap(key, current.as_ref(), Some(encode(&lease)?))
                .map_err(GcError::unavailable)?;
            if swapped.is_ok() {
                return Ok(lease);
            }
            // Lost a race with another writer; re-read and decide again
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(GcError::unavailable)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(GcError::unavailable)
}

fn tx_error<E: std::fmt::Debug>(err: TransactionError<E>) -> GcError {
    GcError::CheckpointUnavailable(format!("transaction failed: {:?}", err))
}

fn frontier_key(reference: &str, commit: &CommitId) -> Vec<u8> {
    let mut key = Vec::with_capacity(reference.len() + commit.as_str().len() + 1);
    key.extend_from_slice(reference.as_bytes());
    key.push(0);
    key.extend_from_slice(commit.as_str().as_bytes());
    key
}

fn frontier_prefix(reference: &str) -> Vec<u8> {
    let mut key = reference.as_bytes().to_vec();
    key.push(0);
    key
}

fn snapshot_key(content: &ContentId, snapshot: &SnapshotRef) -> Vec<u8> {
    let mut key = content.as_str().as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(snapshot.as_str().as_bytes());
    key
}

fn collect_values<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
    tree.iter()
        .values()
        .map(|value| decode(&value.map_err(GcError::unavailable)?))
        .collect()
}

impl CheckpointRepository for Journal {
    fn create_run(&self, run: &GcRun) -> Result<()> {
        let swapped = self
            .runs
            .compare_and_swap(run.id.to_key(), None::<&[u8]>, Some(encode(run)?))
            .map_err(GcError::unavailable)?;
        swapped.map_err(|_| GcError::RunConflict(format!("run {} already exists", run.id)))?;
        debug!(run_id = %run.id, "created run");
        Ok(())
    }

    fn load_run(&self, id: RunId) -> Result<Option<GcRun>> {
        self.runs
            .get(id.to_key())
            .map_err(GcError::unavailable)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn save_run(&self, run: &GcRun) -> Result<()> {
        self.runs
            .insert(run.id.to_key(), encode(run)?)
            .map_err(GcError::unavailable)?;
        self.runs.flush().map_err(GcError::unavailable)?;
        Ok(())
    }

    fn list_runs(&self) -> Result<Vec<GcRun>> {
        // ULID keys sort by creation time
        collect_values(&self.runs)
    }

    fn acquire_lease(&self, id: RunId, owner: &str, ttl: Duration) -> Result<RunLease> {
        self.update_lease(id, owner, ttl, |existing| match existing {
            Some(lease) if lease.owner != owner && lease.is_live(Utc::now()) => {
                Err(GcError::RunConflict(format!(
                    "run {} is owned by {} until {}",
                    id, lease.owner, lease.expires_at
                )))
            }
            _ => Ok(()),
        })
    }

    fn renew_lease(&self, id: RunId, owner: &str, ttl: Duration) -> Result<RunLease> {
        self.update_lease(id, owner, ttl, |existing| match existing {
            Some(lease) if lease.owner == owner => Ok(()),
            Some(lease) => Err(GcError::RunConflict(format!(
                "lease on run {} was taken over by {}",
                id, lease.owner
            ))),
            None => Err(GcError::RunConflict(format!("lease on run {} was released", id))),
        })
    }

    fn release_lease(&self, id: RunId, owner: &str) -> Result<()> {
        let key = id.to_key();
        let Some(current) = self.leases.get(key).map_err(GcError::unavailable)? else {
            return Ok(());
        };
        let lease: RunLease = decode(&current)?;
        if lease.owner != owner {
            return Ok(());
        }
        // A failed swap means someone else took it over in the meantime
        let _ = self
            .leases
            .compare_and_swap(key, Some(&current), None::<Vec<u8>>)
            .map_err(GcError::unavailable)?;
        Ok(())
    }

    fn save_reference(&self, id: RunId, progress: &ReferenceProgress) -> Result<()> {
        self.tree(id, "refs")?
            .insert(progress.name.as_bytes(), encode(progress)?)
            .map_err(GcError::unavailable)?;
        Ok(())
    }

    fn reference(&self, id: RunId, name: &str) -> Result<Option<ReferenceProgress>> {
        self.tree(id, "refs")?
            .get(name.as_bytes())
            .map_err(GcError::unavailable)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn references(&self, id: RunId) -> Result<Vec<ReferenceProgress>> {
        collect_values(&self.tree(id, "refs")?)
    }

    fn frontier(&self, id: RunId, reference: &str) -> Result<Vec<CommitId>> {
        let prefix = frontier_prefix(reference);
        self.tree(id, "frontier")?
            .scan_prefix(&prefix)
            .keys()
            .map(|key| {
                let key = key.map_err(GcError::unavailable)?;
                let commit =
                    std::str::from_utf8(&key[prefix.len()..]).map_err(GcError::unavailable)?;
                Ok(CommitId::from(commit))
            })
            .collect()
    }

    fn seed_frontier(&self, id: RunId, reference: &str, commits: &[CommitId]) -> Result<()> {
        let frontier = self.tree(id, "frontier")?;
        let mut batch = sled::Batch::default();
        for commit in commits {
            batch.insert(frontier_key(reference, commit), EMPTY);
        }
        frontier.apply_batch(batch).map_err(GcError::unavailable)
    }

    fn drop_from_frontier(&self, id: RunId, reference: &str, commit: &CommitId) -> Result<()> {
        self.tree(id, "frontier")?
            .remove(frontier_key(reference, commit))
            .map_err(GcError::unavailable)?;
        Ok(())
    }

    fn complete_commit(
        &self,
        id: RunId,
        reference: &str,
        commit: &CommitId,
        parents: &[CommitId],
    ) -> Result<()> {
        let processed = self.tree(id, "processed")?;
        let frontier = self.tree(id, "frontier")?;

        (&processed, &frontier)
            .transaction(|(processed, frontier)| -> ConflictableTransactionResult<(), ()> {
                processed.insert(commit.as_str().as_bytes(), EMPTY)?;
                frontier.remove(frontier_key(reference, commit))?;
                for parent in parents {
                    if processed.get(parent.as_str().as_bytes())?.is_none() {
                        frontier.insert(frontier_key(reference, parent), EMPTY)?;
                    }
                }
                Ok(())
            })
            .map_err(tx_error)
    }

    fn is_processed(&self, id: RunId, commit: &CommitId) -> Result<bool> {
        self.tree(id, "processed")?
            .contains_key(commit.as_str().as_bytes())
            .map_err(GcError::unavailable)
    }

    fn processed_count(&self, id: RunId) -> Result<u64> {
        Ok(self.tree(id, "processed")?.len() as u64)
    }

    fn mark_enumerated(
        &self,
        id: RunId,
        content: &ContentId,
        snapshot: &SnapshotRef,
    ) -> Result<()> {
        self.tree(id, "enumerated")?
            .insert(snapshot_key(content, snapshot), EMPTY)
            .map_err(GcError::unavailable)?;
        Ok(())
    }

    fn is_enumerated(
        &self,
        id: RunId,
        content: &ContentId,
        snapshot: &SnapshotRef,
    ) -> Result<bool> {
        self.tree(id, "enumerated")?
            .contains_key(snapshot_key(content, snapshot))
            .map_err(GcError::unavailable)
    }

    fn enumerated_count(&self, id: RunId) -> Result<u64> {
        Ok(self.tree(id, "enumerated")?.len() as u64)
    }

    fn record_unreadable(&self, id: RunId, snapshot: &UnreadableSnapshot) -> Result<()> {
        self.tree(id, "unreadable")?
            .insert(snapshot_key(&snapshot.content, &snapshot.snapshot), encode(snapshot)?)
            .map_err(GcError::unavailable)?;
        Ok(())
    }

    fn unreadable(&self, id: RunId) -> Result<Vec<UnreadableSnapshot>> {
        collect_values(&self.tree(id, "unreadable")?)
    }

    fn insert_live(&self, id: RunId, entries: &[LiveSetEntry]) -> Result<u64> {
        let locations = self.tree(id, "live_locations")?;
        let mut inserted = 0;

        // Entries usually arrive grouped by location
        let mut start = 0;
        while start < entries.len() {
            let location = entries[start].file.location();
            let end = entries[start..]
                .iter()
                .position(|e| e.file.location() != location)
                .map_or(entries.len(), |offset| start + offset);

            let partition = self.live_partition(id, location)?;
            for entry in &entries[start..end] {
                let previous = partition
                    .compare_and_swap(
                        entry.file.path().as_bytes(),
                        None::<&[u8]>,
                        Some(encode(entry)?),
                    )
                    .map_err(GcError::unavailable)?;
                // First-seen reason wins
                if previous.is_ok() {
                    inserted += 1;
                }
            }
            locations
                .insert(location.as_bytes(), EMPTY)
                .map_err(GcError::unavailable)?;
            start = end;
        }

        Ok(inserted)
    }

    fn is_live(&self, id: RunId, file: &FileIdentifier) -> Result<bool> {
        self.live_partition(id, file.location())?
            .contains_key(file.path().as_bytes())
            .map_err(GcError::unavailable)
    }

    fn live_locations(&self, id: RunId) -> Result<Vec<String>> {
        self.tree(id, "live_locations")?
            .iter()
            .keys()
            .map(|key| {
                let key = key.map_err(GcError::unavailable)?;
                String::from_utf8(key.to_vec()).map_err(GcError::unavailable)
            })
            .collect()
    }

    fn live_count(&self, id: RunId) -> Result<u64> {
        let mut total = 0;
        for location in self.live_locations(id)? {
            total += self.live_partition(id, &location)?.len() as u64;
        }
        Ok(total)
    }

    fn candidate(&self, id: RunId, file: &FileIdentifier) -> Result<Option<OrphanCandidate>> {
        self.tree(id, "candidates")?
            .get(file.key().as_bytes())
            .map_err(GcError::unavailable)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn candidates(
        &self,
        id: RunId,
        status: Option<CandidateStatus>,
    ) -> Result<Vec<OrphanCandidate>> {
        let all: Vec<OrphanCandidate> = collect_values(&self.tree(id, "candidates")?)?;
        Ok(match status {
            Some(status) => all.into_iter().filter(|c| c.status == status).collect(),
            None => all,
        })
    }

    fn sweep_progress(&self, id: RunId, location: &str) -> Result<SweepProgress> {
        Ok(self
            .tree(id, "sweep")?
            .get(location.as_bytes())
            .map_err(GcError::unavailable)?
            .map(|bytes| decode(&bytes))
            .transpose()?
            .unwrap_or_else(|| SweepProgress::new(location)))
    }

    fn sweep_progresses(&self, id: RunId) -> Result<Vec<SweepProgress>> {
        collect_values(&self.tree(id, "sweep")?)
    }

    fn commit_sweep_page(
        &self,
        id: RunId,
        candidates: &[OrphanCandidate],
        progress: &SweepProgress,
    ) -> Result<()> {
        let candidate_tree = self.tree(id, "candidates")?;
        let sweep_tree = self.tree(id, "sweep")?;

        let encoded: Vec<(String, Vec<u8>)> = candidates
            .iter()
            .map(|c| Ok((c.file.key(), encode(c)?)))
            .collect::<Result<_>>()?;
        let progress_bytes = encode(progress)?;

        (&candidate_tree, &sweep_tree)
            .transaction(|(candidate_tree, sweep_tree)| -> ConflictableTransactionResult<(), ()> {
                for (key, value) in &encoded {
                    candidate_tree.insert(key.as_bytes(), value.as_slice())?;
                }
                sweep_tree.insert(progress.location.as_bytes(), progress_bytes.as_slice())?;
                Ok(())
            })
            .map_err(tx_error)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(GcError::unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{ReferenceStatus, RunSettings};
    use ls_core::{LiveReason, ReferenceKind};

    fn entry(location: &str, path: &str) -> LiveSetEntry {
        LiveSetEntry {
            file: FileIdentifier::new(location, path).unwrap(),
            content: ContentId::from("t1"),
            snapshot: SnapshotRef::from("s1"),
            reason: LiveReason {
                reference: "main".into(),
                commit: CommitId::from("c1"),
                via_head: true,
            },
        }
    }

    fn new_run(journal: &Journal) -> GcRun {
        let run = GcRun::new(RunSettings::new(Utc::now()));
        journal.create_run(&run).unwrap();
        run
    }

    #[test]
    fn test_create_run_rejects_duplicates() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        assert!(matches!(journal.create_run(&run), Err(GcError::RunConflict(_))));
        assert_eq!(journal.load_run(run.id).unwrap().unwrap(), run);
    }

    #[test]
    fn test_runs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run = {
            let journal = Journal::open(dir.path()).unwrap();
            let run = new_run(&journal);
            journal.insert_live(run.id, &[entry("s3://b/t/", "data/a")]).unwrap();
            journal.flush().unwrap();
            run
        };

        let journal = Journal::open(dir.path()).unwrap();
        assert_eq!(journal.list_runs().unwrap().len(), 1);
        assert!(journal
            .is_live(run.id, &FileIdentifier::new("s3://b/t/", "data/a").unwrap())
            .unwrap());
    }

    #[test]
    fn test_lease_excludes_other_owners() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        let ttl = Duration::from_secs(60);

        journal.acquire_lease(run.id, "host-a", ttl).unwrap();
        assert!(journal.acquire_lease(run.id, "host-a", ttl).is_ok());
        assert!(matches!(
            journal.acquire_lease(run.id, "host-b", ttl),
            Err(GcError::RunConflict(_))
        ));
        assert!(journal.renew_lease(run.id, "host-b", ttl).is_err());

        journal.release_lease(run.id, "host-a").unwrap();
        assert!(journal.acquire_lease(run.id, "host-b", ttl).is_ok());
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);

        journal.acquire_lease(run.id, "host-a", Duration::ZERO).unwrap();
        let lease = journal.acquire_lease(run.id, "host-b", Duration::from_secs(60)).unwrap();
        assert_eq!(lease.owner, "host-b");
    }

    #[test]
    fn test_complete_commit_moves_frontier() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        let c1 = CommitId::from("c1");
        let c2 = CommitId::from("c2");
        let c3 = CommitId::from("c3");

        journal.seed_frontier(run.id, "main", &[c3.clone()]).unwrap();
        journal.complete_commit(run.id, "main", &c3, &[c2.clone()]).unwrap();
        assert_eq!(journal.frontier(run.id, "main").unwrap(), vec![c2.clone()]);

        // Processed parents are not queued again
        journal.complete_commit(run.id, "dev", &c1, &[]).unwrap();
        journal.complete_commit(run.id, "main", &c2, &[c1.clone()]).unwrap();
        assert!(journal.frontier(run.id, "main").unwrap().is_empty());
        assert_eq!(journal.processed_count(run.id).unwrap(), 3);
        assert!(journal.is_processed(run.id, &c1).unwrap());
    }

    #[test]
    fn test_frontiers_are_per_reference() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);

        journal.seed_frontier(run.id, "main", &[CommitId::from("a")]).unwrap();
        journal.seed_frontier(run.id, "main-2", &[CommitId::from("b")]).unwrap();
        assert_eq!(journal.frontier(run.id, "main").unwrap(), vec![CommitId::from("a")]);

        journal.drop_from_frontier(run.id, "main", &CommitId::from("a")).unwrap();
        assert!(journal.frontier(run.id, "main").unwrap().is_empty());
        assert_eq!(journal.frontier(run.id, "main-2").unwrap().len(), 1);
    }

    #[test]
    fn test_insert_live_is_idempotent() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        let entries = vec![
            entry("s3://b/t1/", "a"),
            entry("s3://b/t1/", "b"),
            entry("s3://b/t2/", "a"),
        ];

        assert_eq!(journal.insert_live(run.id, &entries).unwrap(), 3);
        assert_eq!(journal.insert_live(run.id, &entries).unwrap(), 0);
        assert_eq!(journal.live_count(run.id).unwrap(), 3);
        assert_eq!(journal.live_locations(run.id).unwrap(), vec!["s3://b/t1/", "s3://b/t2/"]);
        assert!(!journal
            .is_live(run.id, &FileIdentifier::new("s3://b/t2/", "b").unwrap())
            .unwrap());
    }

    #[test]
    fn test_runs_do_not_share_rows() {
        let journal = Journal::temporary().unwrap();
        let first = new_run(&journal);
        let second = new_run(&journal);

        journal.insert_live(first.id, &[entry("s3://b/t/", "a")]).unwrap();
        let file = FileIdentifier::new("s3://b/t/", "a").unwrap();
        assert!(journal.is_live(first.id, &file).unwrap());
        assert!(!journal.is_live(second.id, &file).unwrap());
    }

    #[test]
    fn test_sweep_page_commits_candidates_and_cursor() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        let candidate = OrphanCandidate {
            file: FileIdentifier::new("s3://b/t/", "old").unwrap(),
            last_modified: Utc::now(),
            size: 10,
            status: CandidateStatus::Deleted,
            attempts: 1,
            error: None,
        };
        let mut progress = journal.sweep_progress(run.id, "s3://b/t/").unwrap();
        progress.cursor = Some("old".into());
        progress.scanned = 4;

        journal.commit_sweep_page(run.id, &[candidate.clone()], &progress).unwrap();

        assert_eq!(journal.sweep_progress(run.id, "s3://b/t/").unwrap(), progress);
        assert_eq!(journal.candidate(run.id, &candidate.file).unwrap(), Some(candidate));
        assert_eq!(journal.candidates(run.id, Some(CandidateStatus::Deleted)).unwrap().len(), 1);
        assert!(journal.candidates(run.id, Some(CandidateStatus::Pending)).unwrap().is_empty());
    }

    #[test]
    fn test_reference_bookkeeping() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        let mut progress = ReferenceProgress::pending("main", ReferenceKind::Branch, 1);
        journal.save_reference(run.id, &progress).unwrap();

        progress.status = ReferenceStatus::Done;
        progress.head = Some(CommitId::from("c3"));
        journal.save_reference(run.id, &progress).unwrap();

        assert_eq!(journal.reference(run.id, "main").unwrap(), Some(progress));
        assert_eq!(journal.references(run.id).unwrap().len(), 1);
        assert!(journal.reference(run.id, "dev").unwrap().is_none());
    }

    #[test]
    fn test_enumerated_and_unreadable() {
        let journal = Journal::temporary().unwrap();
        let run = new_run(&journal);
        let content = ContentId::from("t1");
        let snapshot = SnapshotRef::from("s1");

        assert!(!journal.is_enumerated(run.id, &content, &snapshot).unwrap());
        journal.mark_enumerated(run.id, &content, &snapshot).unwrap();
        journal.mark_enumerated(run.id, &content, &snapshot).unwrap();
        assert!(journal.is_enumerated(run.id, &content, &snapshot).unwrap());
        assert_eq!(journal.enumerated_count(run.id).unwrap(), 1);

        journal
            .record_unreadable(
                run.id,
                &UnreadableSnapshot {
                    content,
                    snapshot,
                    reason: "manifest expired".into(),
                },
            )
            .unwrap();
        assert_eq!(journal.unreadable(run.id).unwrap().len(), 1);
    }
}
