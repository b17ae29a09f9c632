//! Object-store capability: paginated listing and idempotent deletion
//!
//! Listings are cursor-paginated in a stable order per backend so a sweep
//! can checkpoint the last object it fully handled. Deleting an object that
//! is already gone counts as success.

use crate::error::{GcError, Result};
use crate::file::{local_path, normalize_location, scheme_of, FileIdentifier, StoredObject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<StoredObject>,
    /// Cursor for the next page, `None` when the listing is exhausted
    pub next: Option<String>,
}

/// Successful deletion outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete; treated as success
    AlreadyAbsent,
}

/// Result of deleting several files under one location
#[derive(Debug, Default)]
pub struct DeleteSummary {
    pub deleted: Vec<FileIdentifier>,
    pub failed: Vec<(FileIdentifier, GcError)>,
}

/// Listing and deletion against one storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List up to `limit` objects under `location` whose path sorts after
    /// `start_after`
    async fn list_page(
        &self,
        location: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage>;

    /// Delete one object
    async fn delete(&self, file: &FileIdentifier) -> Result<DeleteOutcome>;

    /// Delete several objects, reporting per-file failures
    async fn delete_batch(&self, files: &[FileIdentifier]) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        for file in files {
            match self.delete(file).await {
                Ok(_) => summary.deleted.push(file.clone()),
                Err(err) => summary.failed.push((file.clone(), err)),
            }
        }
        summary
    }
}

/// Backends selected by URI scheme
#[derive(Clone, Default)]
pub struct ObjectStores {
    by_scheme: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend for a scheme
    pub fn with(mut self, scheme: &str, store: Arc<dyn ObjectStore>) -> Self {
        self.by_scheme.insert(scheme.to_string(), store);
        self
    }

    /// Backend responsible for a location
    pub fn for_location(&self, location: &str) -> Result<Arc<dyn ObjectStore>> {
        let scheme = scheme_of(location)
            .ok_or_else(|| GcError::InvalidPath(format!("location '{}' has no scheme", location)))?;
        let scheme = match scheme {
            "s3a" | "s3n" => "s3",
            other => other,
        };
        self.by_scheme
            .get(scheme)
            .cloned()
            .ok_or_else(|| {
                GcError::Config(format!("no object store configured for scheme '{}'", scheme))
            })
    }
}

// ============================================================================
// Local filesystem store
// ============================================================================

/// `file://` backend
///
/// Order is component-wise path order, which is what a sorted depth-first
/// directory walk produces.
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }

    fn list_blocking(
        location: String,
        root: PathBuf,
        start_after: Option<String>,
        limit: usize,
    ) -> Result<ListPage> {
        if !root.exists() {
            return Ok(ListPage::default());
        }

        let cursor = start_after.as_deref().map(Path::new);
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // Prune directories that sort entirely before the cursor
                let (Some(cursor), Ok(rel)) = (cursor, entry.path().strip_prefix(&root)) else {
                    return true;
                };
                !entry.file_type().is_dir()
                    || rel.as_os_str().is_empty()
                    || rel >= cursor
                    || cursor.starts_with(rel)
            });

        let mut objects = Vec::new();
        let mut more = false;
        for entry in walker {
            let entry = entry.map_err(|e| GcError::TransientIo(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .map_err(|e| GcError::InvalidPath(e.to_string()))?;
            if let Some(cursor) = cursor {
                if rel <= cursor {
                    continue;
                }
            }
            if objects.len() == limit {
                more = true;
                break;
            }

            let Some(rel_str) = rel.to_str() else {
                tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 path");
                continue;
            };
            let rel_str = rel_str.replace(std::path::MAIN_SEPARATOR, "/");
            let metadata = entry.metadata().map_err(|e| GcError::TransientIo(e.to_string()))?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            objects.push(StoredObject {
                file: FileIdentifier::new(&location, &rel_str)?,
                last_modified: modified,
                size: metadata.len(),
            });
        }

        let next = if more {
            objects.last().map(|o| o.file.path().to_string())
        } else {
            None
        };
        Ok(ListPage { objects, next })
    }
}

#[async_trait]
impl ObjectStore for LocalFileStore {
    async fn list_page(
        &self,
        location: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        let location = normalize_location(location)?;
        let root = local_path(&location)?;
        let start_after = start_after.map(str::to_string);
        let limit = limit.max(1);
        tokio::task::spawn_blocking(move || Self::list_blocking(location, root, start_after, limit))
            .await
            .map_err(|e| GcError::TransientIo(format!("listing task failed: {}", e)))?
    }

    async fn delete(&self, file: &FileIdentifier) -> Result<DeleteOutcome> {
        let path = local_path(&file.key())?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(GcError::DeleteFailed {
                    file: file.key(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(GcError::TransientIo(format!("failed to delete {}: {}", file, e))),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Ordered in-memory store with failure injection
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<FileIdentifier, StoredObject>>,
    delete_failures: RwLock<HashMap<FileIdentifier, u32>>,
    failing_listings: RwLock<HashMap<String, u32>>,
    delete_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, file: FileIdentifier, last_modified: DateTime<Utc>, size: u64) {
        self.objects.write().insert(
            file.clone(),
            StoredObject {
                file,
                last_modified,
                size,
            },
        );
    }

    pub fn contains(&self, file: &FileIdentifier) -> bool {
        self.objects.read().contains_key(file)
    }

    /// Paths present under a location, in listing order
    pub fn paths(&self, location: &str) -> Vec<String> {
        self.objects
            .read()
            .keys()
            .filter(|f| f.location() == location)
            .map(|f| f.path().to_string())
            .collect()
    }

    /// Fail the next `times` deletions of `file` (`u32::MAX` = always)
    pub fn fail_deletes(&self, file: &FileIdentifier, times: u32) {
        self.delete_failures.write().insert(file.clone(), times);
    }

    /// Fail the next `times` page requests for `location`
    pub fn fail_listings(&self, location: &str, times: u32) {
        self.failing_listings.write().insert(location.to_string(), times);
    }

    /// Number of delete attempts made, successful or not
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

fn take_failure<K: std::hash::Hash + Eq>(failures: &RwLock<HashMap<K, u32>>, key: &K) -> bool {
    let mut failures = failures.write();
    match failures.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            true
        }
        _ => false,
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        location: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        let location = normalize_location(location)?;
        if take_failure(&self.failing_listings, &location) {
            return Err(GcError::TransientIo(format!("listing {} throttled", location)));
        }

        let objects = self.objects.read();
        let mut page: Vec<StoredObject> = objects
            .values()
            .filter(|o| o.file.location() == location)
            .filter(|o| start_after.map_or(true, |cursor| o.file.path() > cursor))
            .take(limit.max(1) + 1)
            .cloned()
            .collect();

        let next = if page.len() > limit.max(1) {
            page.pop();
            page.last().map(|o| o.file.path().to_string())
        } else {
            None
        };
        Ok(ListPage { objects: page, next })
    }

    async fn delete(&self, file: &FileIdentifier) -> Result<DeleteOutcome> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.delete_failures, file) {
            return Err(GcError::TransientIo(format!("delete of {} throttled", file)));
        }
        match self.objects.write().remove(file) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}
