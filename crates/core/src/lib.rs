//! Core types for lakesweep
//!
//! This crate provides:
//! - Catalog data model (content ids, commits, named references, snapshots)
//! - Canonical file identifiers and storage listings
//! - The GC error taxonomy
//! - Retry with bounded exponential backoff
//! - Capability traits for the collaborators GC depends on (catalog,
//!   table format, object store) plus their backends

pub mod catalog;
pub mod error;
pub mod file;
pub mod hash;
pub mod model;
pub mod object_store;
pub mod retry;
pub mod table_format;

// Re-exports
pub use catalog::{Catalog, MemoryCatalog};
pub use error::{GcError, Result};
pub use file::{FileIdentifier, StoredObject};
pub use hash::{partition_key, Blake3Hash};
pub use model::{
    CommitId, CommitRef, ContentId, ContentMutation, LiveReason, LiveSetEntry, LiveSnapshot,
    NamedReference, ReferenceKind, SnapshotRef,
};
pub use object_store::{
    DeleteOutcome, DeleteSummary, ListPage, LocalFileStore, MemoryObjectStore, ObjectStore,
    ObjectStores,
};
pub use retry::RetryPolicy;
pub use table_format::{FileStream, ManifestTableFormat, MemoryTableFormat, TableFormat};
