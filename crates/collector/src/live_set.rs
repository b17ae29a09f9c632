//! Live-set accumulator and membership index
//!
//! The accumulator turns walker output into durable live-set rows, one
//! snapshot at a time. A snapshot is recorded as enumerated only after all
//! of its files are in the repository, so a restart re-enumerates exactly
//! the snapshots that were in flight.

use crate::cancel::CancelToken;
use crate::enumerator::SnapshotEnumerator;
use crate::walker::SnapshotSink;
use ahash::AHashSet;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use journal::{CheckpointRepository, RunId, UnreadableSnapshot};
use ls_core::{FileIdentifier, LiveSetEntry, LiveSnapshot, Result};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct LiveSetAccumulator {
    run: RunId,
    repo: Arc<dyn CheckpointRepository>,
    enumerator: SnapshotEnumerator,
    batch_size: usize,
    parallelism: usize,
    cancel: CancelToken,
}

impl LiveSetAccumulator {
    pub fn new(
        run: RunId,
        repo: Arc<dyn CheckpointRepository>,
        enumerator: SnapshotEnumerator,
        batch_size: usize,
        parallelism: usize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            run,
            repo,
            enumerator,
            batch_size: batch_size.max(1),
            parallelism: parallelism.max(1),
            cancel,
        }
    }

    async fn absorb_one(&self, snapshot: LiveSnapshot) -> Result<()> {
        self.cancel.check()?;
        if self.repo.is_enumerated(self.run, &snapshot.content, &snapshot.snapshot)? {
            return Ok(());
        }

        let enumerated = self
            .enumerator
            .enumerate(&snapshot.content, &snapshot.snapshot)
            .await?;

        let entries: Vec<LiveSetEntry> = enumerated
            .files
            .iter()
            .map(|file| LiveSetEntry {
                file: file.clone(),
                content: snapshot.content.clone(),
                snapshot: snapshot.snapshot.clone(),
                reason: snapshot.reason.clone(),
            })
            .collect();
        let mut inserted = 0;
        for chunk in entries.chunks(self.batch_size) {
            inserted += self.repo.insert_live(self.run, chunk)?;
        }

        if let Some(reason) = enumerated.unreadable {
            warn!(
                run_id = %self.run,
                content = %snapshot.content,
                snapshot = %snapshot.snapshot,
                reason = %reason,
                "snapshot partially unreadable"
            );
            self.repo.record_unreadable(
                self.run,
                &UnreadableSnapshot {
                    content: snapshot.content.clone(),
                    snapshot: snapshot.snapshot.clone(),
                    reason,
                },
            )?;
        }

        self.enumerator.remember(&snapshot.content, &enumerated.files);
        self.repo
            .mark_enumerated(self.run, &snapshot.content, &snapshot.snapshot)?;
        debug!(
            run_id = %self.run,
            snapshot = %snapshot.snapshot,
            reference = %snapshot.reason.reference,
            inserted,
            "snapshot absorbed"
        );
        Ok(())
    }
}

#[async_trait]
impl SnapshotSink for LiveSetAccumulator {
    async fn absorb(&self, snapshots: Vec<LiveSnapshot>) -> Result<()> {
        let mut seen = AHashSet::new();
        let unique: Vec<LiveSnapshot> = snapshots
            .into_iter()
            .filter(|s| seen.insert((s.content.clone(), s.snapshot.clone())))
            .collect();

        stream::iter(unique)
            .map(|snapshot| self.absorb_one(snapshot))
            .buffer_unordered(self.parallelism)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }
}

/// Read-only membership checks against the persisted live set
///
/// A file listed under one location may belong to a partition of a nested
/// location (a table stored below another table's location), so every live
/// location that prefixes the file's key is consulted.
pub struct LiveIndex {
    run: RunId,
    repo: Arc<dyn CheckpointRepository>,
    locations: Vec<String>,
}

impl LiveIndex {
    pub fn load(run: RunId, repo: Arc<dyn CheckpointRepository>) -> Result<Self> {
        let locations = repo.live_locations(run)?;
        Ok(Self { run, repo, locations })
    }

    pub fn is_live(&self, file: &FileIdentifier) -> Result<bool> {
        if self.repo.is_live(self.run, file)? {
            return Ok(true);
        }

        let key = file.key();
        for location in &self.locations {
            if location.as_str() == file.location() || !key.starts_with(location.as_str()) {
                continue;
            }
            let nested = FileIdentifier::new(location, &key[location.len()..])?;
            if self.repo.is_live(self.run, &nested)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Locations to list: live locations plus `extra`, without any location
    /// already covered by a listing of one of its prefixes
    pub fn sweep_roots(&self, extra: &[String]) -> Vec<String> {
        let mut all: Vec<String> = self.locations.iter().chain(extra.iter()).cloned().collect();
        all.sort();
        all.dedup();

        let mut roots: Vec<String> = Vec::new();
        for location in all {
            // Sorted order puts a prefix before everything it covers
            if roots.iter().any(|root| location.starts_with(root.as_str())) {
                continue;
            }
            roots.push(location);
        }
        roots
    }
}
