//! Table-format capability: the files a snapshot depends on
//!
//! Enumeration is lazy. A snapshot whose metadata was already expired by
//! the table-format layer yields `GcError::PartiallyUnreadable` after the
//! files that could still be read.

use crate::error::{GcError, Result};
use crate::file::{local_path, scheme_of, FileIdentifier};
use crate::model::{ContentId, SnapshotRef};
use ahash::{AHashMap, AHashSet};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lazy, finite sequence of files
pub type FileStream<'a> = BoxStream<'a, Result<FileIdentifier>>;

/// Reader for one table format
pub trait TableFormat: Send + Sync {
    /// Data files, manifests, and metadata files the snapshot depends on
    fn enumerate_files<'a>(
        &'a self,
        content: &'a ContentId,
        snapshot: &'a SnapshotRef,
    ) -> FileStream<'a>;
}

fn unreadable(content: &ContentId, snapshot: &SnapshotRef, reason: impl Into<String>) -> GcError {
    GcError::PartiallyUnreadable {
        content: content.to_string(),
        snapshot: snapshot.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// In-memory table format
// ============================================================================

#[derive(Default)]
struct SnapshotFiles {
    files: Vec<FileIdentifier>,
    expired: bool,
}

/// Snapshot -> files map with failure injection
#[derive(Default)]
pub struct MemoryTableFormat {
    snapshots: RwLock<AHashMap<SnapshotRef, SnapshotFiles>>,
    transient_failures: RwLock<AHashMap<SnapshotRef, u32>>,
    enumerations: AtomicUsize,
}

impl MemoryTableFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&self, snapshot: impl Into<SnapshotRef>, files: Vec<FileIdentifier>) {
        self.snapshots.write().insert(
            snapshot.into(),
            SnapshotFiles {
                files,
                expired: false,
            },
        );
    }

    /// Mark a snapshot as partly expired: its files are still emitted,
    /// followed by a `PartiallyUnreadable` error
    pub fn expire_snapshot(&self, snapshot: &SnapshotRef) {
        if let Some(entry) = self.snapshots.write().get_mut(snapshot) {
            entry.expired = true;
        }
    }

    /// Fail the next `times` enumerations of `snapshot` with a transient error
    pub fn fail_transiently(&self, snapshot: impl Into<SnapshotRef>, times: u32) {
        self.transient_failures.write().insert(snapshot.into(), times);
    }

    /// Number of enumerations started
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl TableFormat for MemoryTableFormat {
    fn enumerate_files<'a>(
        &'a self,
        content: &'a ContentId,
        snapshot: &'a SnapshotRef,
    ) -> FileStream<'a> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);

        {
            let mut failures = self.transient_failures.write();
            if let Some(remaining) = failures.get_mut(snapshot) {
                if *remaining > 0 {
                    *remaining -= 1;
                    let err =
                        GcError::TransientIo(format!("metadata read failed for {}", snapshot));
                    return stream::iter(vec![Err(err)]).boxed();
                }
            }
        }

        let snapshots = self.snapshots.read();
        let items: Vec<Result<FileIdentifier>> = match snapshots.get(snapshot) {
            Some(entry) => {
                let mut items: Vec<_> = entry.files.iter().cloned().map(Ok).collect();
                if entry.expired {
                    items.push(Err(unreadable(content, snapshot, "manifest expired")));
                }
                items
            }
            None => vec![Err(unreadable(content, snapshot, "snapshot metadata missing"))],
        };
        stream::iter(items).boxed()
    }
}

// ============================================================================
// JSON manifest table format
// ============================================================================

/// Metadata or manifest document
///
/// The snapshot ref is the URI of the root document, which names the table
/// location. Manifests nest arbitrarily; relative entries resolve against
/// the table location.
#[derive(Debug, Default, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    manifests: Vec<String>,
}

/// Reads JSON metadata/manifest documents from `file://` locations
#[derive(Debug, Default, Clone)]
pub struct ManifestTableFormat;

impl ManifestTableFormat {
    pub fn new() -> Self {
        Self
    }
}

struct ManifestWalk {
    content: ContentId,
    snapshot: SnapshotRef,
    location: Option<String>,
    started: bool,
    ready: VecDeque<FileIdentifier>,
    pending: Vec<String>,
    visited: AHashSet<String>,
}

impl ManifestWalk {
    fn location(&self) -> Result<&str> {
        self.location
            .as_deref()
            .ok_or_else(|| unreadable(&self.content, &self.snapshot, "metadata names no location"))
    }

    fn absolute(&self, entry: &str) -> Result<String> {
        if scheme_of(entry).is_some() {
            Ok(entry.to_string())
        } else {
            Ok(format!("{}{}", self.location()?, entry))
        }
    }

    /// Identify a document file, falling back to its parent directory when
    /// it lives outside the table location
    fn identify(&self, uri: &str) -> Result<FileIdentifier> {
        let location = self.location()?;
        FileIdentifier::from_uri(uri, location).or_else(|_| match uri.rsplit_once('/') {
            Some((parent, name)) => FileIdentifier::new(parent, name),
            None => Err(GcError::InvalidPath(uri.to_string())),
        })
    }

    async fn read(&self, uri: &str) -> Result<ManifestDocument> {
        let path = local_path(uri)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let reason = format!("{} is missing", uri);
                return Err(unreadable(&self.content, &self.snapshot, reason));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            unreadable(&self.content, &self.snapshot, format!("{} is corrupt: {}", uri, e))
        })
    }

    fn absorb(&mut self, document: ManifestDocument) -> Result<()> {
        for file in &document.files {
            let uri = self.absolute(file)?;
            let id = self.identify(&uri)?;
            self.ready.push_back(id);
        }
        for manifest in document.manifests.iter().rev() {
            let uri = self.absolute(manifest)?;
            self.pending.push(uri);
        }
        Ok(())
    }

    async fn next_file(&mut self) -> Result<Option<FileIdentifier>> {
        loop {
            if let Some(file) = self.ready.pop_front() {
                return Ok(Some(file));
            }

            if !self.started {
                self.started = true;
                let root = self.snapshot.to_string();
                let document = self.read(&root).await?;
                self.location = document.location.clone();
                let metadata_file = self.identify(&root)?;
                self.ready.push_back(metadata_file);
                self.visited.insert(root);
                self.absorb(document)?;
                continue;
            }

            let Some(manifest) = self.pending.pop() else {
                return Ok(None);
            };
            if !self.visited.insert(manifest.clone()) {
                continue;
            }
            let document = self.read(&manifest).await?;
            let manifest_file = self.identify(&manifest)?;
            self.ready.push_back(manifest_file);
            self.absorb(document)?;
        }
    }
}

impl TableFormat for ManifestTableFormat {
    fn enumerate_files<'a>(
        &'a self,
        content: &'a ContentId,
        snapshot: &'a SnapshotRef,
    ) -> FileStream<'a> {
        let walk = ManifestWalk {
            content: content.clone(),
            snapshot: snapshot.clone(),
            location: None,
            started: false,
            ready: VecDeque::new(),
            pending: Vec::new(),
            visited: AHashSet::new(),
        };

        stream::try_unfold(walk, |mut walk| async move {
            Ok(walk.next_file().await?.map(|file| (file, walk)))
        })
        .boxed()
    }
}
