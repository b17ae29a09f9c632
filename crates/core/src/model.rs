//! Catalog data model
//!
//! Commits form a DAG keyed by [`CommitId`]; branches and tags are named
//! pointers into it. Each commit records the content mutations it introduced.

use crate::file::FileIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Stable identity of a table or view across its history
    ContentId
);
string_id!(
    /// Globally unique commit id
    CommitId
);
string_id!(
    /// Opaque, format-specific reference to one consistent file-set view
    SnapshotRef
);

/// Kind of named reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Branch,
    Tag,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceKind::Branch => f.write_str("branch"),
            ReferenceKind::Tag => f.write_str("tag"),
        }
    }
}

/// A branch or tag name; its head is resolved lazily through the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedReference {
    pub name: String,
    pub kind: ReferenceKind,
}

impl NamedReference {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ReferenceKind::Branch,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ReferenceKind::Tag,
        }
    }
}

/// Change to one content introduced by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ContentMutation {
    Put {
        content: ContentId,
        snapshot: SnapshotRef,
    },
    Delete {
        content: ContentId,
    },
}

/// Immutable node in the commit graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub id: CommitId,
    /// One parent normally, more for merges, none for the root
    #[serde(default)]
    pub parents: SmallVec<[CommitId; 1]>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub mutations: Vec<ContentMutation>,
}

impl CommitRef {
    /// Snapshots this commit introduces or touches
    pub fn puts(&self) -> impl Iterator<Item = (&ContentId, &SnapshotRef)> {
        self.mutations.iter().filter_map(|m| match m {
            ContentMutation::Put { content, snapshot } => Some((content, snapshot)),
            ContentMutation::Delete { .. } => None,
        })
    }
}

/// Why a snapshot (and therefore its files) is live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveReason {
    /// Reference whose traversal first reached it
    pub reference: String,
    pub commit: CommitId,
    /// Part of the full content state at the reference head
    pub via_head: bool,
}

/// One walker output: a snapshot that must be considered live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub content: ContentId,
    pub snapshot: SnapshotRef,
    pub reason: LiveReason,
}

/// A live file, recorded once with the reason it was first seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSetEntry {
    pub file: FileIdentifier,
    pub content: ContentId,
    pub snapshot: SnapshotRef,
    pub reason: LiveReason,
}
