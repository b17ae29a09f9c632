//! GC orchestrator: runs the phase state machine for one run
//!
//! `CREATED → MARKING → MARK_COMPLETE → SWEEPING → COMPLETED`. Every phase
//! boundary is persisted before the next phase starts, so a restarted
//! process picks the run up at the phase it was in, with each component
//! resuming from its own checkpoint cursor.

use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::config::{CutoffRetention, GcConfig, RetentionPredicate};
use crate::enumerator::SnapshotEnumerator;
use crate::live_set::{LiveIndex, LiveSetAccumulator};
use crate::report::RunReport;
use crate::sweeper::Sweeper;
use crate::walker::ReferenceWalker;
use ahash::AHashSet;
use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use journal::{CheckpointRepository, GcRun, ReferenceProgress, RunId, RunPhase, RunSettings};
use ls_core::file::normalize_location;
use ls_core::{Catalog, GcError, NamedReference, ObjectStores, Result, TableFormat};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// External services a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub table_format: Arc<dyn TableFormat>,
    pub stores: ObjectStores,
}

pub struct Orchestrator {
    repo: Arc<dyn CheckpointRepository>,
    collaborators: Collaborators,
    config: GcConfig,
    retention: Option<Arc<dyn RetentionPredicate>>,
    /// Lease owner id, unique per orchestrator instance
    owner: String,
    /// Stops the execution in flight; re-armed when it returns
    cancel_handle: CancelHandle,
    cancel: CancelToken,
}

/// State of one `execute` call, shared with its lease renewal task
struct Execution {
    cancel: CancelToken,
    lease_lost: Arc<AtomicBool>,
}

impl Execution {
    fn lease_lost(&self) -> bool {
        self.lease_lost.load(Ordering::SeqCst)
    }
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn CheckpointRepository>,
        collaborators: Collaborators,
        config: GcConfig,
    ) -> Self {
        let (cancel_handle, cancel) = cancel_pair();
        Self {
            repo,
            collaborators,
            config,
            retention: None,
            owner: format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
            cancel_handle,
            cancel,
        }
    }

    /// Replace the cutoff-based retention of each run
    pub fn with_retention(mut self, retention: Arc<dyn RetentionPredicate>) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Handle that stops the current run at the next safe point
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    pub fn repository(&self) -> &Arc<dyn CheckpointRepository> {
        &self.repo
    }

    pub fn create_run(&self, settings: RunSettings) -> Result<GcRun> {
        self.config.validate()?;
        let run = GcRun::new(settings);
        self.repo.create_run(&run)?;
        info!(
            run_id = %run.id,
            cutoff = %run.settings.cutoff,
            dry_run = run.settings.dry_run,
            "created run"
        );
        Ok(run)
    }

    /// Create a run and drive it to a terminal phase
    pub async fn run(&self, settings: RunSettings) -> Result<RunReport> {
        let run = self.create_run(settings)?;
        self.execute(run).await
    }

    /// Continue a cancelled, interrupted or failed run from its checkpoints
    pub async fn resume(&self, id: RunId) -> Result<RunReport> {
        self.config.validate()?;
        let mut run = self
            .repo
            .load_run(id)?
            .ok_or_else(|| GcError::NotFound(format!("run {}", id)))?;
        run.reopen()?;
        info!(run_id = %run.id, phase = %run.phase, "resuming run");
        self.execute(run).await
    }

    /// Drive an already created or reopened run
    pub async fn execute(&self, mut run: GcRun) -> Result<RunReport> {
        // 1. Take the run lease; a live lease elsewhere means another instance owns it
        self.repo
            .acquire_lease(run.id, &self.owner, self.config.lease_ttl)?;
        let execution = Execution {
            cancel: self.cancel.clone(),
            lease_lost: Arc::new(AtomicBool::new(false)),
        };
        let renewal = self.spawn_lease_renewal(run.id, &execution);

        // 2. Drive the phases under the run timeout
        run.cancelled = false;
        if run.started_at.is_none() {
            run.started_at = Some(Utc::now());
        }
        let outcome = match self.repo.save_run(&run) {
            Ok(()) => match self.config.run_timeout {
                Some(limit) => {
                    let driven = self.drive(&mut run, &execution);
                    match tokio::time::timeout(limit, driven).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(GcError::Timeout(limit)),
                    }
                }
                None => self.drive(&mut run, &execution).await,
            },
            Err(err) => Err(err),
        };
        renewal.abort();
        // The next execution on this instance starts uncancelled
        self.cancel_handle.reset();

        // 3. The run record belongs to whoever holds the lease now
        if execution.lease_lost() {
            warn!(
                run_id = %run.id,
                phase = %run.phase,
                "run lease lost; leaving run state to its new owner"
            );
            return Err(match outcome {
                Err(err @ GcError::RunConflict(_)) => err,
                _ => GcError::RunConflict(format!("lease on run {} was lost", run.id)),
            });
        }

        // 4. Persist the outcome and give the lease back
        let result = self.finish(&mut run, outcome);
        if let Err(err) = self.repo.release_lease(run.id, &self.owner) {
            warn!(run_id = %run.id, error = %err, "failed to release run lease");
        }
        result
    }

    fn finish(&self, run: &mut GcRun, outcome: Result<()>) -> Result<RunReport> {
        match outcome {
            Ok(()) => {}
            Err(GcError::Cancelled) => {
                warn!(run_id = %run.id, phase = %run.phase, "run cancelled; resume to continue");
                run.cancelled = true;
            }
            Err(err @ GcError::CheckpointUnavailable(_)) => {
                error!(
                    run_id = %run.id,
                    phase = %run.phase,
                    error = %err,
                    "checkpoint repository unavailable"
                );
                run.fail(err.to_string());
                if let Err(save) = self.repo.save_run(run) {
                    warn!(run_id = %run.id, error = %save, "failed to record failed run");
                }
                return Err(err);
            }
            Err(err) => {
                error!(run_id = %run.id, phase = %run.phase, error = %err, "run failed");
                run.fail(err.to_string());
            }
        }
        self.repo.save_run(run)?;
        self.repo.flush()?;

        let report = RunReport::collect(self.repo.as_ref(), run)?;
        info!(
            run_id = %run.id,
            phase = %run.phase,
            live_files = report.live_files,
            deleted = report.deleted,
            delete_failed = report.delete_failed,
            skipped_race = report.skipped_race,
            "run finished"
        );
        Ok(report)
    }

    fn spawn_lease_renewal(&self, id: RunId, execution: &Execution) -> JoinHandle<()> {
        let repo = self.repo.clone();
        let owner = self.owner.clone();
        let ttl = self.config.lease_ttl;
        let cancel = self.cancel_handle.clone();
        let lease_lost = execution.lease_lost.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(ttl / 3);
            timer.tick().await;
            loop {
                timer.tick().await;
                if let Err(err) = repo.renew_lease(id, &owner, ttl) {
                    error!(run_id = %id, error = %err, "lost run lease; stopping run");
                    lease_lost.store(true, Ordering::SeqCst);
                    cancel.cancel();
                    return;
                }
                debug!(run_id = %id, "renewed run lease");
            }
        })
    }

    /// Persist the run record while this execution still holds the lease
    fn save_run(&self, run: &GcRun, execution: &Execution) -> Result<()> {
        if execution.lease_lost() {
            return Err(GcError::RunConflict(format!("lease on run {} was lost", run.id)));
        }
        self.repo.save_run(run)
    }

    async fn drive(&self, run: &mut GcRun, execution: &Execution) -> Result<()> {
        loop {
            execution.cancel.check()?;
            match run.phase {
                RunPhase::Created => {
                    run.transition(RunPhase::Marking)?;
                    self.save_run(run, execution)?;
                }
                RunPhase::Marking => {
                    self.mark(run, execution).await?;
                    // Live set durable before the deletion horizon is fixed
                    self.repo.flush()?;
                    run.transition(RunPhase::MarkComplete)?;
                    self.save_run(run, execution)?;
                    info!(
                        run_id = %run.id,
                        live_files = self.repo.live_count(run.id)?,
                        commits = self.repo.processed_count(run.id)?,
                        "mark phase complete"
                    );
                }
                RunPhase::MarkComplete => {
                    run.transition(RunPhase::Sweeping)?;
                    self.save_run(run, execution)?;
                }
                RunPhase::Sweeping => {
                    self.sweep(run, &execution.cancel).await?;
                    run.transition(RunPhase::Completed)?;
                    self.save_run(run, execution)?;
                }
                RunPhase::Completed | RunPhase::Failed => return Ok(()),
            }
        }
    }

    /// Walk every reference until a fresh listing turns up nothing unsettled
    async fn mark(&self, run: &mut GcRun, execution: &Execution) -> Result<()> {
        let cancel = &execution.cancel;
        let retention = self
            .retention
            .clone()
            .unwrap_or_else(|| Arc::new(CutoffRetention::from_settings(&run.settings)));
        let walker = ReferenceWalker::new(
            run.id,
            self.collaborators.catalog.clone(),
            self.repo.clone(),
            retention,
            self.config.catalog_retry,
            self.config.max_head_reresolutions,
            run.settings.strict_references,
            cancel.clone(),
        );
        let accumulator = LiveSetAccumulator::new(
            run.id,
            self.repo.clone(),
            SnapshotEnumerator::new(
                self.collaborators.table_format.clone(),
                self.config.table_retry,
                self.config.dedup_cache_limit,
            ),
            self.config.live_batch_size,
            self.config.enumerate_parallelism,
            cancel.clone(),
        );

        loop {
            cancel.check()?;

            // 1. List references and register the ones not seen before
            let listed = self
                .config
                .catalog_retry
                .run("list_references", || self.collaborators.catalog.list_references())
                .await?;
            run.mark_passes += 1;
            let pass = run.mark_passes;
            self.save_run(run, execution)?;

            let known: AHashSet<String> = self
                .repo
                .references(run.id)?
                .into_iter()
                .map(|p| p.name)
                .collect();
            for reference in listed.iter().filter(|r| !known.contains(&r.name)) {
                debug!(run_id = %run.id, reference = %reference.name, pass, "new reference");
                let progress = ReferenceProgress::pending(&reference.name, reference.kind, pass);
                self.repo.save_reference(run.id, &progress)?;
            }

            // 2. Walk everything not yet settled, including interrupted walks
            let unsettled: Vec<NamedReference> = self
                .repo
                .references(run.id)?
                .into_iter()
                .filter(|p| !p.status.is_settled())
                .map(|p| NamedReference { name: p.name, kind: p.kind })
                .collect();
            if unsettled.is_empty() {
                break;
            }
            info!(run_id = %run.id, pass, references = unsettled.len(), "walking references");

            stream::iter(unsettled)
                .map(|reference| {
                    let walker = &walker;
                    let accumulator = &accumulator;
                    async move { walker.walk(&reference, pass, accumulator).await }
                })
                .buffer_unordered(self.config.mark_parallelism)
                .try_collect::<Vec<_>>()
                .await?;

            if pass >= self.config.max_mark_passes {
                warn!(run_id = %run.id, pass, "reference listing limit reached");
                break;
            }
        }

        // 3. Gate: every known reference has been settled in this run
        let pending: Vec<String> = self
            .repo
            .references(run.id)?
            .into_iter()
            .filter(|p| !p.status.is_settled())
            .map(|p| p.name)
            .collect();
        if !pending.is_empty() {
            return Err(GcError::InvalidState(format!(
                "references not walked before sweep: {}",
                pending.join(", ")
            )));
        }
        Ok(())
    }

    /// Sweep every location holding live files plus configured extras
    async fn sweep(&self, run: &GcRun, cancel: &CancelToken) -> Result<()> {
        let extra = self
            .config
            .extra_locations
            .iter()
            .map(String::as_str)
            .map(normalize_location)
            .collect::<Result<Vec<_>>>()?;
        let index = LiveIndex::load(run.id, self.repo.clone())?;
        let roots = index.sweep_roots(&extra);
        info!(run_id = %run.id, locations = roots.len(), "sweeping storage");

        let sweeper = Sweeper::new(
            run,
            self.repo.clone(),
            self.collaborators.stores.clone(),
            index,
            self.config.page_size,
            self.config.delete_batch_size,
            self.config.store_retry,
            cancel.clone(),
        )?;

        let results: Vec<(String, Result<_>)> = stream::iter(roots)
            .map(|location| {
                let sweeper = &sweeper;
                async move {
                    let result = sweeper.sweep_location(&location).await;
                    (location, result)
                }
            })
            .buffer_unordered(self.config.sweep_parallelism)
            .collect()
            .await;

        for (location, result) in results {
            match result {
                Ok(_) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(run_id = %run.id, location, error = %err, "location sweep failed");
                    let mut progress = self.repo.sweep_progress(run.id, &location)?;
                    progress.error = Some(err.to_string());
                    self.repo.commit_sweep_page(run.id, &[], &progress)?;
                }
            }
        }
        Ok(())
    }
}
