//! Versioned catalog capability
//!
//! GC only needs to list named references, resolve them to head commits,
//! read individual commits, and read the full content state at a commit.

use crate::error::{GcError, Result};
use crate::model::{
    CommitId, CommitRef, ContentId, ContentMutation, NamedReference, ReferenceKind, SnapshotRef,
};
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Read API of the versioned catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All branches and tags currently defined
    async fn list_references(&self) -> Result<Vec<NamedReference>>;

    /// Current head of a reference
    async fn resolve(&self, name: &str) -> Result<CommitId>;

    /// A single commit by id
    async fn commit(&self, id: &CommitId) -> Result<CommitRef>;

    /// Full visible content state (content -> snapshot) at a commit
    async fn contents_at(&self, id: &CommitId) -> Result<Vec<(ContentId, SnapshotRef)>>;
}

/// Exported catalog document
///
/// ```json
/// {
///   "references": [{"name": "main", "kind": "branch", "head": "c3"}],
///   "commits": [{"id": "c1", "parents": [], "timestamp": "...", "mutations": []}]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogExport {
    pub references: Vec<ExportedReference>,
    pub commits: Vec<CommitRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedReference {
    pub name: String,
    pub kind: ReferenceKind,
    pub head: CommitId,
}

#[derive(Default)]
struct CatalogState {
    references: BTreeMap<String, (ReferenceKind, CommitId)>,
    commits: AHashMap<CommitId, CommitRef>,
    unavailable: AHashSet<String>,
}

/// In-process catalog backed by a commit map
///
/// Loaded from a JSON export for the command line, built directly in tests.
/// Heads may be moved or dropped while a walk is in progress.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
    commit_reads: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an exported catalog document
    pub fn from_export(export: CatalogExport) -> Result<Self> {
        let catalog = Self::new();
        for commit in export.commits {
            catalog.add_commit(commit);
        }
        for reference in export.references {
            if !catalog.has_commit(&reference.head) {
                return Err(GcError::Config(format!(
                    "reference '{}' points at unknown commit {}",
                    reference.name, reference.head
                )));
            }
            catalog.set_reference(&reference.name, reference.kind, reference.head);
        }
        Ok(catalog)
    }

    /// Load a JSON catalog export from disk
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let export: CatalogExport = serde_json::from_str(&raw).map_err(|e| {
            GcError::Config(format!("invalid catalog export {}: {}", path.display(), e))
        })?;
        Self::from_export(export)
    }

    pub fn add_commit(&self, commit: CommitRef) {
        self.state.write().commits.insert(commit.id.clone(), commit);
    }

    pub fn has_commit(&self, id: &CommitId) -> bool {
        self.state.read().commits.contains_key(id)
    }

    pub fn set_reference(&self, name: &str, kind: ReferenceKind, head: CommitId) {
        self.state
            .write()
            .references
            .insert(name.to_string(), (kind, head));
    }

    pub fn set_branch(&self, name: &str, head: impl Into<CommitId>) {
        self.set_reference(name, ReferenceKind::Branch, head.into());
    }

    pub fn set_tag(&self, name: &str, head: impl Into<CommitId>) {
        self.set_reference(name, ReferenceKind::Tag, head.into());
    }

    pub fn drop_reference(&self, name: &str) {
        self.state.write().references.remove(name);
    }

    /// Make resolution of `name` fail with a transient error
    pub fn make_unavailable(&self, name: &str) {
        self.state.write().unavailable.insert(name.to_string());
    }

    /// Number of `commit()` reads served so far
    pub fn commit_reads(&self) -> usize {
        self.commit_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn list_references(&self) -> Result<Vec<NamedReference>> {
        Ok(self
            .state
            .read()
            .references
            .iter()
            .map(|(name, (kind, _))| NamedReference {
                name: name.clone(),
                kind: *kind,
            })
            .collect())
    }

    async fn resolve(&self, name: &str) -> Result<CommitId> {
        let state = self.state.read();
        if state.unavailable.contains(name) {
            return Err(GcError::TransientIo(format!("catalog unavailable for '{}'", name)));
        }
        state
            .references
            .get(name)
            .map(|(_, head)| head.clone())
            .ok_or_else(|| GcError::NotFound(format!("reference '{}'", name)))
    }

    async fn commit(&self, id: &CommitId) -> Result<CommitRef> {
        self.commit_reads.fetch_add(1, Ordering::SeqCst);
        self.state
            .read()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| GcError::NotFound(format!("commit {}", id)))
    }

    async fn contents_at(&self, id: &CommitId) -> Result<Vec<(ContentId, SnapshotRef)>> {
        let state = self.state.read();

        // Collect the first-parent chain back to the root
        let mut chain = Vec::new();
        let mut seen = AHashSet::new();
        let mut cursor = Some(id.clone());
        while let Some(commit_id) = cursor {
            if !seen.insert(commit_id.clone()) {
                break;
            }
            let commit = state
                .commits
                .get(&commit_id)
                .ok_or_else(|| GcError::NotFound(format!("commit {}", commit_id)))?;
            cursor = commit.parents.first().cloned();
            chain.push(commit);
        }

        // Replay mutations root first
        let mut contents: BTreeMap<ContentId, SnapshotRef> = BTreeMap::new();
        for commit in chain.iter().rev() {
            for mutation in &commit.mutations {
                match mutation {
                    ContentMutation::Put { content, snapshot } => {
                        contents.insert(content.clone(), snapshot.clone());
                    }
                    ContentMutation::Delete { content } => {
                        contents.remove(content);
                    }
                }
            }
        }

        Ok(contents.into_iter().collect())
    }
}
