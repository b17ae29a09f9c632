//! Garbage collection for a versioned table catalog
//!
//! A run marks every file reachable from the catalog's branches and tags
//! into a persistent live set, then sweeps storage and deletes what is not
//! in it:
//! - [`walker`]: commit-graph traversal per named reference
//! - [`enumerator`]: snapshot file listing with per-content dedup
//! - [`live_set`]: durable live-set accumulation and membership checks
//! - [`inventory`]: paginated storage listing
//! - [`sweeper`]: classification and deletion per location
//! - [`orchestrator`]: the run state machine tying the phases together

pub mod cancel;
pub mod config;
pub mod enumerator;
pub mod inventory;
pub mod live_set;
pub mod orchestrator;
pub mod report;
pub mod sweeper;
pub mod walker;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{CutoffRetention, GcConfig, RetentionPredicate};
pub use orchestrator::{Collaborators, Orchestrator};
pub use report::RunReport;
