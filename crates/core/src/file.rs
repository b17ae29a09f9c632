//! Canonical file identifiers
//!
//! A file is identified by its storage location (a base URI ending in `/`)
//! plus a relative path below it. Two identifiers are equal iff both parts
//! match after canonicalisation; size and modification time are carried
//! separately by [`StoredObject`].

use crate::error::{GcError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Canonical key for a physical object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentifier {
    location: String,
    path: String,
}

impl FileIdentifier {
    /// Build an identifier from a base location and a path relative to it
    pub fn new(location: &str, path: &str) -> Result<Self> {
        Ok(Self {
            location: normalize_location(location)?,
            path: normalize_path(path)?,
        })
    }

    /// Relativise an absolute URI against its base location
    ///
    /// Paths without a scheme are taken as already relative to `location`.
    pub fn from_uri(uri: &str, location: &str) -> Result<Self> {
        let location = normalize_location(location)?;
        if scheme_of(uri).is_none() {
            return Self::new(&location, uri);
        }

        match uri.strip_prefix(location.as_str()) {
            Some(rest) => Ok(Self {
                path: normalize_path(rest)?,
                location,
            }),
            None => Err(GcError::InvalidPath(format!(
                "{} is not below location {}",
                uri, location
            ))),
        }
    }

    /// Base location, always ending in `/`
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Path relative to the location
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full canonical URI
    pub fn key(&self) -> String {
        format!("{}{}", self.location, self.path)
    }
}

impl std::fmt::Display for FileIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.location, self.path)
    }
}

/// An object as reported by a storage listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub file: FileIdentifier,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Extract the scheme from a URI (`s3://b/k` -> `s3`)
pub fn scheme_of(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    valid.then_some(scheme)
}

/// Normalize a storage location
///
/// - Requires a `scheme://` prefix
/// - Ensures exactly one trailing `/`
pub fn normalize_location(location: &str) -> Result<String> {
    if scheme_of(location).is_none() {
        return Err(GcError::InvalidPath(format!(
            "location '{}' has no URI scheme",
            location
        )));
    }

    let trimmed = location.trim_end_matches('/');
    if trimmed.ends_with(':') {
        // "file:///" style root
        return Ok(format!("{}///", trimmed));
    }
    Ok(format!("{}/", trimmed))
}

/// Normalize a path for use as an object key below a location
///
/// - Removes `./` segments
/// - Rejects absolute paths, `..`, and empty segments
pub fn normalize_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(GcError::InvalidPath("empty path".to_string()));
    }
    if path.starts_with('/') {
        return Err(GcError::InvalidPath(format!("absolute path '{}'", path)));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => continue,
            ".." => {
                return Err(GcError::InvalidPath(format!("'..' in path '{}'", path)));
            }
            "" => {
                return Err(GcError::InvalidPath(format!("empty segment in path '{}'", path)));
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(GcError::InvalidPath(format!("path '{}' names no file", path)));
    }
    Ok(segments.join("/"))
}

/// Local filesystem path for a `file://` URI
pub fn local_path(uri: &str) -> Result<PathBuf> {
    match uri.strip_prefix("file://") {
        Some(rest) if rest.starts_with('/') => Ok(PathBuf::from(rest)),
        Some(_) => Err(GcError::InvalidPath(format!(
            "file URI '{}' must be absolute",
            uri
        ))),
        None => Err(GcError::Config(format!("'{}' is not a file:// URI", uri))),
    }
}
