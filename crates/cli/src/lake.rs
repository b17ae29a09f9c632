//! Collaborator wiring for the command line
//!
//! The catalog comes from a JSON export, table snapshots are JSON manifest
//! documents, and storage is the local filesystem under `file://` locations.

use anyhow::{Context, Result};
use collector::Collaborators;
use ls_core::{LocalFileStore, ManifestTableFormat, MemoryCatalog, ObjectStores};
use std::path::Path;
use std::sync::Arc;

pub fn collaborators(catalog_path: &Path) -> Result<Collaborators> {
    let catalog = MemoryCatalog::from_json_file(catalog_path)
        .with_context(|| format!("Failed to load catalog export {}", catalog_path.display()))?;
    Ok(Collaborators {
        catalog: Arc::new(catalog),
        table_format: Arc::new(ManifestTableFormat::new()),
        stores: ObjectStores::new().with("file", Arc::new(LocalFileStore::new())),
    })
}
