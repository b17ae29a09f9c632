//! Reference walker: commit-graph traversal from every branch and tag head
//!
//! Each reference keeps a persisted frontier of commits still to visit. A
//! run-global processed set, shared by all references, ensures a commit on
//! shared ancestry is handled once. A commit is only marked processed after
//! the sink has made every snapshot it emitted durable, so an interrupted
//! walk resumes from its frontier without losing or refetching work.

use crate::cancel::CancelToken;
use crate::config::RetentionPredicate;
use async_trait::async_trait;
use dashmap::DashSet;
use journal::{CheckpointRepository, ReferenceProgress, ReferenceStatus, RunId};
use ls_core::{
    Catalog, CommitId, CommitRef, GcError, LiveReason, LiveSnapshot, NamedReference, Result,
    RetryPolicy,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Consumer of walker output
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Make the snapshots' files durable in the live set
    async fn absorb(&self, snapshots: Vec<LiveSnapshot>) -> Result<()>;
}

pub struct ReferenceWalker {
    run: RunId,
    catalog: Arc<dyn Catalog>,
    repo: Arc<dyn CheckpointRepository>,
    retention: Arc<dyn RetentionPredicate>,
    retry: RetryPolicy,
    max_reresolutions: u32,
    strict: bool,
    cancel: CancelToken,
    /// Commits being processed by some task of this process right now
    claims: DashSet<CommitId>,
}

impl ReferenceWalker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run: RunId,
        catalog: Arc<dyn Catalog>,
        repo: Arc<dyn CheckpointRepository>,
        retention: Arc<dyn RetentionPredicate>,
        retry: RetryPolicy,
        max_reresolutions: u32,
        strict: bool,
        cancel: CancelToken,
    ) -> Self {
        Self {
            run,
            catalog,
            repo,
            retention,
            retry,
            max_reresolutions,
            strict,
            cancel,
            claims: DashSet::new(),
        }
    }

    /// Walk one reference until its frontier is drained and its head is stable
    pub async fn walk(
        &self,
        reference: &NamedReference,
        pass: u32,
        sink: &dyn SnapshotSink,
    ) -> Result<ReferenceProgress> {
        let mut progress = self
            .repo
            .reference(self.run, &reference.name)?
            .unwrap_or_else(|| ReferenceProgress::pending(&reference.name, reference.kind, pass));
        if progress.status.is_settled() {
            return Ok(progress);
        }

        progress.status = ReferenceStatus::InProgress;
        self.repo.save_reference(self.run, &progress)?;

        loop {
            self.cancel.check()?;

            // 1. Resolve the head again; references move and disappear
            let head = match self
                .retry
                .run("resolve", || self.catalog.resolve(&reference.name))
                .await
            {
                Ok(head) => head,
                Err(GcError::NotFound(_)) => {
                    info!(
                        run_id = %self.run,
                        reference = %reference.name,
                        "reference vanished during walk"
                    );
                    self.drain_abandoned(reference, &progress, sink).await?;
                    return self.settle(progress, ReferenceStatus::Vanished, None);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    let error = GcError::ReferenceResolution {
                        reference: reference.name.clone(),
                        reason: err.to_string(),
                    };
                    if self.strict {
                        return Err(error);
                    }
                    warn!(
                        run_id = %self.run,
                        reference = %reference.name,
                        error = %err,
                        "skipping unresolvable reference"
                    );
                    self.drain_abandoned(reference, &progress, sink).await?;
                    let reason = error.to_string();
                    return self.settle(progress, ReferenceStatus::Skipped, Some(reason));
                }
            };

            // 2. Seed a new or moved head
            match progress.head.as_ref() {
                Some(previous) if *previous == head => {
                    if self.repo.frontier(self.run, &reference.name)?.is_empty() {
                        return self.settle(progress, ReferenceStatus::Done, None);
                    }
                }
                Some(previous) if progress.re_resolutions >= self.max_reresolutions => {
                    warn!(
                        run_id = %self.run,
                        reference = %reference.name,
                        from = %previous,
                        to = %head,
                        "head keeps moving; settling reference"
                    );
                    return self.settle(progress, ReferenceStatus::Done, None);
                }
                previous => {
                    if let Some(previous) = previous {
                        debug!(
                            run_id = %self.run,
                            reference = %reference.name,
                            from = %previous,
                            to = %head,
                            "head moved"
                        );
                        progress.re_resolutions += 1;
                    }
                    self.seed_head(reference, &head, sink).await?;
                    progress.head = Some(head);
                    self.repo.save_reference(self.run, &progress)?;
                }
            }

            // 3. Drain the frontier
            self.drain(reference, progress.head.as_ref(), sink).await?;
        }
    }

    /// Finish commits queued while the reference was still resolvable
    ///
    /// Other references drop shared commits this reference already
    /// processed and rely on its frontier to reach their parents.
    async fn drain_abandoned(
        &self,
        reference: &NamedReference,
        progress: &ReferenceProgress,
        sink: &dyn SnapshotSink,
    ) -> Result<()> {
        let pending = self.repo.frontier(self.run, &reference.name)?.len();
        if pending == 0 {
            return Ok(());
        }
        debug!(
            run_id = %self.run,
            reference = %reference.name,
            pending,
            "draining frontier of unresolvable reference"
        );
        self.drain(reference, progress.head.as_ref(), sink).await
    }

    fn settle(
        &self,
        mut progress: ReferenceProgress,
        status: ReferenceStatus,
        error: Option<String>,
    ) -> Result<ReferenceProgress> {
        progress.status = status;
        progress.error = error;
        self.repo.save_reference(self.run, &progress)?;
        debug!(
            run_id = %self.run,
            reference = %progress.name,
            status = ?status,
            "reference settled"
        );
        Ok(progress)
    }

    /// Emit the full content state visible at the head and queue the head
    async fn seed_head(
        &self,
        reference: &NamedReference,
        head: &CommitId,
        sink: &dyn SnapshotSink,
    ) -> Result<()> {
        let commit = match self.fetch(head).await? {
            Some(commit) => commit,
            None => return Ok(()),
        };
        if !self.retention.retains_head(&commit) {
            debug!(
                run_id = %self.run,
                reference = %reference.name,
                head = %head,
                "head older than ceiling"
            );
            return Ok(());
        }

        let contents = self
            .retry
            .run("contents_at", || self.catalog.contents_at(head))
            .await?;
        let reason = LiveReason {
            reference: reference.name.clone(),
            commit: head.clone(),
            via_head: true,
        };
        let snapshots = contents
            .into_iter()
            .map(|(content, snapshot)| LiveSnapshot {
                content,
                snapshot,
                reason: reason.clone(),
            })
            .collect();
        sink.absorb(snapshots).await?;

        self.repo
            .seed_frontier(self.run, &reference.name, std::slice::from_ref(head))
    }

    async fn drain(
        &self,
        reference: &NamedReference,
        head: Option<&CommitId>,
        sink: &dyn SnapshotSink,
    ) -> Result<()> {
        loop {
            let frontier = self.repo.frontier(self.run, &reference.name)?;
            if frontier.is_empty() {
                return Ok(());
            }
            for commit_id in frontier {
                self.cancel.check()?;
                self.visit(reference, &commit_id, head == Some(&commit_id), sink)
                    .await?;
            }
        }
    }

    async fn visit(
        &self,
        reference: &NamedReference,
        id: &CommitId,
        is_head: bool,
        sink: &dyn SnapshotSink,
    ) -> Result<()> {
        let name = reference.name.as_str();

        // Shared ancestry: whoever processed it queued its parents already
        if self.repo.is_processed(self.run, id)? {
            return self.repo.drop_from_frontier(self.run, name, id);
        }
        if !self.claims.insert(id.clone()) {
            // Another walk of this process holds it and will queue the parents
            return self.repo.drop_from_frontier(self.run, name, id);
        }

        let result = self.visit_claimed(reference, id, is_head, sink).await;
        self.claims.remove(id);
        result
    }

    async fn visit_claimed(
        &self,
        reference: &NamedReference,
        id: &CommitId,
        is_head: bool,
        sink: &dyn SnapshotSink,
    ) -> Result<()> {
        let name = reference.name.as_str();
        let Some(commit) = self.fetch(id).await? else {
            return self.repo.drop_from_frontier(self.run, name, id);
        };

        let retained = if is_head {
            self.retention.retains_head(&commit)
        } else {
            self.retention.retains(&commit)
        };
        if !retained {
            // Older than the cutoff: stop descending here
            return self.repo.drop_from_frontier(self.run, name, id);
        }

        let reason = LiveReason {
            reference: name.to_string(),
            commit: id.clone(),
            via_head: false,
        };
        let snapshots: Vec<LiveSnapshot> = commit
            .puts()
            .map(|(content, snapshot)| LiveSnapshot {
                content: content.clone(),
                snapshot: snapshot.clone(),
                reason: reason.clone(),
            })
            .collect();
        if !snapshots.is_empty() {
            sink.absorb(snapshots).await?;
        }

        self.repo
            .complete_commit(self.run, name, id, commit.parents.as_slice())
    }

    /// Read a commit; `None` when the catalog no longer has it
    async fn fetch(&self, id: &CommitId) -> Result<Option<CommitRef>> {
        match self.retry.run("commit", || self.catalog.commit(id)).await {
            Ok(commit) => Ok(Some(commit)),
            Err(GcError::NotFound(_)) => {
                warn!(run_id = %self.run, commit = %id, "commit missing from catalog");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::config::CutoffRetention;
    use chrono::{DateTime, TimeZone, Utc};
    use journal::{GcRun, Journal, RunSettings};
    use ls_core::{ContentId, ContentMutation, MemoryCatalog, ReferenceKind, SnapshotRef};
    use parking_lot::Mutex;
    use smallvec::SmallVec;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<LiveSnapshot>>,
    }

    impl RecordingSink {
        fn snapshots(&self) -> BTreeSet<String> {
            self.seen.lock().iter().map(|s| s.snapshot.to_string()).collect()
        }
    }

    #[async_trait]
    impl SnapshotSink for RecordingSink {
        async fn absorb(&self, snapshots: Vec<LiveSnapshot>) -> Result<()> {
            self.seen.lock().extend(snapshots);
            Ok(())
        }
    }

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, n, 0, 0, 0).unwrap()
    }

    fn commit(id: &str, parents: &[&str], at: u32, puts: &[(&str, &str)]) -> CommitRef {
        CommitRef {
            id: CommitId::from(id),
            parents: parents.iter().map(|p| CommitId::from(*p)).collect::<SmallVec<_>>(),
            timestamp: day(at),
            mutations: puts
                .iter()
                .map(|(content, snapshot)| ContentMutation::Put {
                    content: ContentId::from(*content),
                    snapshot: SnapshotRef::from(*snapshot),
                })
                .collect(),
        }
    }

    struct Fixture {
        repo: Arc<Journal>,
        catalog: Arc<MemoryCatalog>,
        run: GcRun,
    }

    impl Fixture {
        fn new(cutoff: DateTime<Utc>) -> Self {
            let repo = Arc::new(Journal::temporary().unwrap());
            let run = GcRun::new(RunSettings::new(cutoff));
            repo.create_run(&run).unwrap();
            Self {
                repo,
                catalog: Arc::new(MemoryCatalog::new()),
                run,
            }
        }

        fn walker(&self, strict: bool) -> ReferenceWalker {
            let (_handle, token) = cancel_pair();
            ReferenceWalker::new(
                self.run.id,
                self.catalog.clone(),
                self.repo.clone(),
                Arc::new(CutoffRetention::from_settings(&self.run.settings)),
                RetryPolicy::no_retry(),
                2,
                strict,
                token,
            )
        }
    }

    /// main: c1 <- c2 <- c3, tag `old` at c1, cutoff between c1 and c2
    fn linear_history(fixture: &Fixture) {
        fixture.catalog.add_commit(commit("c1", &[], 1, &[("t1", "s1")]));
        fixture.catalog.add_commit(commit("c2", &["c1"], 5, &[("t1", "s2")]));
        fixture.catalog.add_commit(commit("c3", &["c2"], 6, &[("t1", "s3")]));
        fixture.catalog.set_branch("main", "c3");
        fixture.catalog.set_tag("old", "c1");
    }

    #[tokio::test]
    async fn test_cutoff_stops_descent() {
        let fixture = Fixture::new(day(3));
        linear_history(&fixture);
        let sink = RecordingSink::default();

        let progress = fixture
            .walker(false)
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await
            .unwrap();

        assert_eq!(progress.status, ReferenceStatus::Done);
        assert_eq!(sink.snapshots(), BTreeSet::from(["s2".to_string(), "s3".to_string()]));
        assert!(!fixture.repo.is_processed(fixture.run.id, &CommitId::from("c1")).unwrap());
    }

    #[tokio::test]
    async fn test_tag_keeps_old_commit_live() {
        let fixture = Fixture::new(day(3));
        linear_history(&fixture);
        let sink = RecordingSink::default();
        let walker = fixture.walker(false);

        walker.walk(&NamedReference::branch("main"), 1, &sink).await.unwrap();
        walker.walk(&NamedReference::tag("old"), 1, &sink).await.unwrap();

        assert!(sink.snapshots().contains("s1"));
        assert!(fixture.repo.is_processed(fixture.run.id, &CommitId::from("c1")).unwrap());
    }

    #[tokio::test]
    async fn test_head_state_includes_unchanged_old_content() {
        let fixture = Fixture::new(day(3));
        fixture.catalog.add_commit(commit("c1", &[], 1, &[("t1", "s1"), ("t2", "s9")]));
        fixture.catalog.add_commit(commit("c2", &["c1"], 5, &[("t1", "s2")]));
        fixture.catalog.set_branch("main", "c2");
        let sink = RecordingSink::default();

        fixture
            .walker(false)
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await
            .unwrap();

        // t2 was last written before the cutoff but is still visible at main
        let snapshots = sink.snapshots();
        assert!(snapshots.contains("s9"));
        assert!(!snapshots.contains("s1"));
    }

    #[tokio::test]
    async fn test_shared_ancestry_processed_once() {
        let fixture = Fixture::new(day(1));
        fixture.catalog.add_commit(commit("root", &[], 1, &[("t1", "s0")]));
        fixture.catalog.add_commit(commit("a", &["root"], 2, &[("t1", "sa")]));
        fixture.catalog.add_commit(commit("b", &["root"], 3, &[("t1", "sb")]));
        fixture.catalog.add_commit(commit("m", &["a", "b"], 4, &[("t1", "sm")]));
        fixture.catalog.set_branch("main", "m");
        fixture.catalog.set_branch("feature", "b");
        let sink = RecordingSink::default();
        let walker = fixture.walker(false);

        walker.walk(&NamedReference::branch("main"), 1, &sink).await.unwrap();
        let reads_after_main = fixture.catalog.commit_reads();
        walker.walk(&NamedReference::branch("feature"), 1, &sink).await.unwrap();

        // feature only re-reads its head for the head state
        assert_eq!(fixture.catalog.commit_reads(), reads_after_main + 1);
        assert_eq!(fixture.repo.processed_count(fixture.run.id).unwrap(), 4);
        assert_eq!(sink.snapshots().len(), 4);
    }

    #[tokio::test]
    async fn test_cycles_terminate() {
        let fixture = Fixture::new(day(1));
        fixture.catalog.add_commit(commit("x", &["y"], 2, &[("t1", "sx")]));
        fixture.catalog.add_commit(commit("y", &["x"], 2, &[("t1", "sy")]));
        fixture.catalog.set_branch("main", "x");
        let sink = RecordingSink::default();

        let progress = fixture
            .walker(false)
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await
            .unwrap();
        assert_eq!(progress.status, ReferenceStatus::Done);
    }

    #[tokio::test]
    async fn test_vanished_reference() {
        let fixture = Fixture::new(day(1));
        let sink = RecordingSink::default();

        let progress = fixture
            .walker(false)
            .walk(&NamedReference::branch("gone"), 1, &sink)
            .await
            .unwrap();
        assert_eq!(progress.status, ReferenceStatus::Vanished);
    }

    /// `a` was interrupted after processing c3 with c2 still queued; `b`
    /// shares c3 and drops it as already processed
    fn interrupted_shared_history(fixture: &Fixture) {
        fixture.catalog.add_commit(commit("c1", &[], 1, &[("t1", "s1")]));
        fixture.catalog.add_commit(commit("c2", &["c1"], 5, &[("t1", "s2")]));
        fixture.catalog.add_commit(commit("c3", &["c2"], 8, &[("t1", "s3")]));
        fixture.catalog.set_branch("a", "c3");
        fixture.catalog.set_branch("b", "c3");

        let run = fixture.run.id;
        let c3 = CommitId::from("c3");
        let mut progress = ReferenceProgress::pending("a", ReferenceKind::Branch, 1);
        progress.status = ReferenceStatus::InProgress;
        progress.head = Some(c3.clone());
        fixture.repo.save_reference(run, &progress).unwrap();
        fixture.repo.seed_frontier(run, "a", std::slice::from_ref(&c3)).unwrap();
        fixture
            .repo
            .complete_commit(run, "a", &c3, &[CommitId::from("c2")])
            .unwrap();
    }

    #[tokio::test]
    async fn test_vanished_reference_finishes_queued_parents() {
        let fixture = Fixture::new(day(3));
        interrupted_shared_history(&fixture);
        let sink = RecordingSink::default();
        let walker = fixture.walker(false);

        let b = walker.walk(&NamedReference::branch("b"), 1, &sink).await.unwrap();
        assert_eq!(b.status, ReferenceStatus::Done);
        assert!(!sink.snapshots().contains("s2"));

        fixture.catalog.drop_reference("a");
        let a = walker.walk(&NamedReference::branch("a"), 1, &sink).await.unwrap();

        assert_eq!(a.status, ReferenceStatus::Vanished);
        assert!(sink.snapshots().contains("s2"));
        assert!(!sink.snapshots().contains("s1"));
        assert!(fixture.repo.frontier(fixture.run.id, "a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_reference_finishes_queued_parents() {
        let fixture = Fixture::new(day(3));
        interrupted_shared_history(&fixture);
        let sink = RecordingSink::default();
        let walker = fixture.walker(false);

        walker.walk(&NamedReference::branch("b"), 1, &sink).await.unwrap();
        fixture.catalog.make_unavailable("a");
        let a = walker.walk(&NamedReference::branch("a"), 1, &sink).await.unwrap();

        assert_eq!(a.status, ReferenceStatus::Skipped);
        assert!(sink.snapshots().contains("s2"));
        assert!(fixture.repo.is_processed(fixture.run.id, &CommitId::from("c2")).unwrap());
    }

    #[tokio::test]
    async fn test_unresolvable_reference_skipped_or_fatal() {
        let fixture = Fixture::new(day(1));
        linear_history(&fixture);
        fixture.catalog.make_unavailable("main");
        let sink = RecordingSink::default();

        let progress = fixture
            .walker(false)
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await
            .unwrap();
        assert_eq!(progress.status, ReferenceStatus::Skipped);
        assert!(progress.error.is_some());

        let fixture = Fixture::new(day(1));
        linear_history(&fixture);
        fixture.catalog.make_unavailable("main");
        let result = fixture
            .walker(true)
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await;
        assert!(matches!(result, Err(GcError::ReferenceResolution { .. })));
    }

    #[tokio::test]
    async fn test_moved_head_is_walked_on_next_walk() {
        let fixture = Fixture::new(day(1));
        linear_history(&fixture);
        let sink = RecordingSink::default();
        let walker = fixture.walker(false);

        // Interrupt-free walk to c3, then pretend the reference is mid-walk again
        let mut progress = walker
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await
            .unwrap();
        progress.status = ReferenceStatus::InProgress;
        fixture.repo.save_reference(fixture.run.id, &progress).unwrap();

        fixture.catalog.add_commit(commit("c4", &["c3"], 7, &[("t1", "s4")]));
        fixture.catalog.set_branch("main", "c4");

        let progress = walker
            .walk(&NamedReference::branch("main"), 1, &sink)
            .await
            .unwrap();
        assert_eq!(progress.head, Some(CommitId::from("c4")));
        assert_eq!(progress.re_resolutions, 1);
        assert!(sink.snapshots().contains("s4"));
    }

    #[tokio::test]
    async fn test_cancel_stops_walk() {
        let fixture = Fixture::new(day(1));
        linear_history(&fixture);
        let (handle, token) = cancel_pair();
        let walker = ReferenceWalker::new(
            fixture.run.id,
            fixture.catalog.clone(),
            fixture.repo.clone(),
            Arc::new(CutoffRetention::from_settings(&fixture.run.settings)),
            RetryPolicy::no_retry(),
            2,
            false,
            token,
        );
        handle.cancel();

        let result = walker
            .walk(&NamedReference::branch("main"), 1, &RecordingSink::default())
            .await;
        assert!(matches!(result, Err(GcError::Cancelled)));
    }
}
