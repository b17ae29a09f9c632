//! Snapshot file enumeration with per-content dedup

use ahash::{AHashMap, AHashSet};
use futures::StreamExt;
use ls_core::{ContentId, FileIdentifier, GcError, Result, RetryPolicy, SnapshotRef, TableFormat};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Files of one snapshot not yet counted for its content
#[derive(Debug, Default)]
pub struct Enumerated {
    pub files: Vec<FileIdentifier>,
    /// Set when the table-format layer could only partly read the snapshot
    pub unreadable: Option<String>,
}

struct SeenFiles {
    by_content: AHashMap<ContentId, AHashSet<FileIdentifier>>,
    total: usize,
}

pub struct SnapshotEnumerator {
    table_format: Arc<dyn TableFormat>,
    retry: RetryPolicy,
    seen: Mutex<SeenFiles>,
    cache_limit: usize,
}

impl SnapshotEnumerator {
    pub fn new(table_format: Arc<dyn TableFormat>, retry: RetryPolicy, cache_limit: usize) -> Self {
        Self {
            table_format,
            retry,
            seen: Mutex::new(SeenFiles {
                by_content: AHashMap::new(),
                total: 0,
            }),
            cache_limit,
        }
    }

    /// Enumerate a snapshot, dropping files already counted for its content
    ///
    /// A partially unreadable snapshot yields the files read before the
    /// failure plus the reason. Other errors are retried per the policy.
    pub async fn enumerate(
        &self,
        content: &ContentId,
        snapshot: &SnapshotRef,
    ) -> Result<Enumerated> {
        let (files, unreadable) = self
            .retry
            .run("enumerate_files", || self.collect(content, snapshot))
            .await?;

        let seen = self.seen.lock();
        let known = seen.by_content.get(content);
        let mut local = AHashSet::with_capacity(files.len());
        let total = files.len();
        let files: Vec<FileIdentifier> = files
            .into_iter()
            .filter(|f| !known.is_some_and(|k| k.contains(f)))
            .filter(|f| local.insert(f.clone()))
            .collect();

        debug!(
            content = %content,
            snapshot = %snapshot,
            total,
            new = files.len(),
            "enumerated snapshot"
        );
        Ok(Enumerated { files, unreadable })
    }

    /// Record files that are now durable in the live set
    pub fn remember(&self, content: &ContentId, files: &[FileIdentifier]) {
        let mut seen = self.seen.lock();
        if seen.total + files.len() > self.cache_limit {
            seen.by_content.clear();
            seen.total = 0;
        }
        let entry = seen.by_content.entry(content.clone()).or_default();
        let before = entry.len();
        entry.extend(files.iter().cloned());
        let added = entry.len() - before;
        seen.total += added;
    }

    async fn collect(
        &self,
        content: &ContentId,
        snapshot: &SnapshotRef,
    ) -> Result<(Vec<FileIdentifier>, Option<String>)> {
        let mut stream = self.table_format.enumerate_files(content, snapshot);
        let mut files = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(file) => files.push(file),
                Err(GcError::PartiallyUnreadable { reason, .. }) => {
                    return Ok((files, Some(reason)));
                }
                Err(err) => return Err(err),
            }
        }
        Ok((files, None))
    }
}
