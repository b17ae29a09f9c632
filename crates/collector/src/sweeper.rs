//! Set-difference sweeper: inventory minus live set, per location
//!
//! Each listing page is classified against the live index and its orphans
//! deleted in batches. The page's candidate rows and the advanced cursor
//! are committed together, so a restart re-lists at most one page.

use crate::cancel::CancelToken;
use crate::inventory::InventoryScanner;
use crate::live_set::LiveIndex;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use journal::{CandidateStatus, CheckpointRepository, GcRun, OrphanCandidate, RunId, SweepProgress};
use ls_core::{GcError, ObjectStores, Result, RetryPolicy, StoredObject};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Sweeper {
    run: RunId,
    repo: Arc<dyn CheckpointRepository>,
    stores: ObjectStores,
    index: LiveIndex,
    horizon: DateTime<Utc>,
    dry_run: bool,
    page_size: usize,
    batch_size: usize,
    retry: RetryPolicy,
    cancel: CancelToken,
}

/// Classification of one listed object
enum Verdict {
    Retained,
    /// Already handled by an earlier attempt
    Settled,
    Race(OrphanCandidate),
    Orphan(OrphanCandidate),
}

impl Sweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run: &GcRun,
        repo: Arc<dyn CheckpointRepository>,
        stores: ObjectStores,
        index: LiveIndex,
        page_size: usize,
        batch_size: usize,
        retry: RetryPolicy,
        cancel: CancelToken,
    ) -> Result<Self> {
        let horizon = run.deletion_horizon().ok_or_else(|| {
            GcError::InvalidState(format!("run {} has no mark completion time", run.id))
        })?;
        Ok(Self {
            run: run.id,
            repo,
            stores,
            index,
            horizon,
            dry_run: run.settings.dry_run,
            page_size,
            batch_size: batch_size.max(1),
            retry,
            cancel,
        })
    }

    /// Sweep one location to completion
    pub async fn sweep_location(&self, location: &str) -> Result<SweepProgress> {
        let mut progress = self.repo.sweep_progress(self.run, location)?;
        if progress.done {
            return Ok(progress);
        }

        let store = self.stores.for_location(location)?;
        let scanner = InventoryScanner::new(store.clone(), self.page_size, self.retry);
        let mut pages = scanner.pages(location, progress.cursor.clone());

        info!(
            run_id = %self.run,
            location,
            cursor = ?progress.cursor,
            dry_run = self.dry_run,
            "sweeping location"
        );

        while let Some(page) = pages.next().await {
            let page = page?;

            // 1. Classify
            let mut retained = 0;
            let mut races = Vec::new();
            let mut orphans = Vec::new();
            for object in &page.objects {
                match self.classify(object)? {
                    Verdict::Retained => retained += 1,
                    Verdict::Settled => {}
                    Verdict::Race(candidate) => races.push(candidate),
                    Verdict::Orphan(candidate) => orphans.push(candidate),
                }
            }

            // 2. Delete in batches, stopping between batches on cancellation
            let mut handled = Vec::with_capacity(orphans.len());
            let mut cancelled = false;
            if self.dry_run {
                handled = orphans;
            } else {
                for batch in orphans.chunks(self.batch_size) {
                    if self.cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                    handled.extend(self.delete_batch(store.as_ref(), batch).await);
                }
            }

            // 3. Commit candidates; only advance the cursor over a finished page
            if !cancelled {
                progress.scanned += page.objects.len() as u64;
                progress.retained += retained;
                progress.bytes_reclaimed += handled
                    .iter()
                    .filter(|c| c.status == CandidateStatus::Deleted)
                    .map(|c| c.size)
                    .sum::<u64>();
                if let Some(last) = page.objects.last() {
                    progress.cursor = Some(last.file.path().to_string());
                }
                progress.done = page.next.is_none();
            }
            let mut rows = races;
            rows.extend(handled);
            self.repo.commit_sweep_page(self.run, &rows, &progress)?;

            if cancelled {
                info!(run_id = %self.run, location, "sweep cancelled");
                return Err(GcError::Cancelled);
            }
            self.cancel.check()?;
        }

        if !progress.done {
            // Empty or vanished location
            progress.done = true;
            self.repo.commit_sweep_page(self.run, &[], &progress)?;
        }
        info!(
            run_id = %self.run,
            location,
            scanned = progress.scanned,
            retained = progress.retained,
            bytes_reclaimed = progress.bytes_reclaimed,
            "location swept"
        );
        Ok(progress)
    }

    fn classify(&self, object: &StoredObject) -> Result<Verdict> {
        if self.index.is_live(&object.file)? {
            return Ok(Verdict::Retained);
        }
        if let Some(existing) = self.repo.candidate(self.run, &object.file)? {
            // Deleted files can reappear in an eventually-consistent listing
            if matches!(existing.status, CandidateStatus::Deleted | CandidateStatus::SkippedRace) {
                return Ok(Verdict::Settled);
            }
        }

        let candidate = OrphanCandidate {
            file: object.file.clone(),
            last_modified: object.last_modified,
            size: object.size,
            status: CandidateStatus::Pending,
            attempts: 0,
            error: None,
        };
        if object.last_modified >= self.horizon {
            debug!(run_id = %self.run, file = %object.file, "modified inside grace window");
            return Ok(Verdict::Race(OrphanCandidate {
                status: CandidateStatus::SkippedRace,
                ..candidate
            }));
        }
        Ok(Verdict::Orphan(candidate))
    }

    async fn delete_batch(
        &self,
        store: &dyn ls_core::ObjectStore,
        batch: &[OrphanCandidate],
    ) -> Vec<OrphanCandidate> {
        let files: Vec<_> = batch.iter().map(|c| c.file.clone()).collect();
        let summary = store.delete_batch(&files).await;
        let failed: ahash::AHashSet<_> =
            summary.failed.iter().map(|(file, _)| file.clone()).collect();

        let mut outcomes = Vec::with_capacity(batch.len());
        for candidate in batch {
            let mut candidate = candidate.clone();
            candidate.attempts += 1;
            if !failed.contains(&candidate.file) {
                candidate.status = CandidateStatus::Deleted;
                outcomes.push(candidate);
                continue;
            }

            // Retry individually with backoff
            let retried = self.retry.run("delete", || store.delete(&candidate.file)).await;
            match retried {
                Ok(_) => {
                    candidate.attempts += 1;
                    candidate.status = CandidateStatus::Deleted;
                }
                Err(err) => {
                    warn!(
                        run_id = %self.run,
                        file = %candidate.file,
                        error = %err,
                        "delete failed"
                    );
                    candidate.attempts += self.retry.max_attempts.max(1);
                    candidate.status = CandidateStatus::DeleteFailed;
                    candidate.error = Some(err.to_string());
                }
            }
            outcomes.push(candidate);
        }
        outcomes
    }
}
