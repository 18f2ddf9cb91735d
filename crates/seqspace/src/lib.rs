//! Seqspace - Alopex sequence/unsequence file space
//!
//! This crate tracks the immutable data files of a time series storage
//! engine and decides which of them must be merged to keep per-device
//! time order intact.
//!
//! # Components
//!
//! - [`FileResource`]: metadata and lifecycle status of one data file
//! - [`FileSpaceManager`]: sequence and unsequence lists per partition, with snapshots
//! - [`RewriteCrossSpaceSelector`]: picks bounded groups of files to merge
//! - [`run_selection_round`]: selects and claims candidates across partitions
//!
//! # Example
//!
//! ```rust
//! use alopex_seqspace::{
//!     CrossCompactionConfig, FileResource, FileSpaceManager, PartitionKey, SpaceKind,
//! };
//!
//! let manager = FileSpaceManager::new();
//! let key = PartitionKey::new("root.sg", 0);
//! manager.add_all(&key, vec![
//!     FileResource::new(1, SpaceKind::Sequence, 1).with_device("root.sg.d1", 0, 1000),
//! ], true)?;
//! manager.add_all(&key, vec![
//!     FileResource::new(2, SpaceKind::Unsequence, 2).with_device("root.sg.d1", 400, 500),
//! ], false)?;
//!
//! let round = alopex_seqspace::run_selection_round(&manager, &CrossCompactionConfig::default());
//! assert_eq!(round.candidate_count(), 1);
//! # Ok::<(), alopex_seqspace::SpaceError>(())
//! ```

#![deny(missing_docs)]

pub mod compaction;
pub mod error;
pub mod resource;
pub mod space;

pub use compaction::{
    run_selection_round, select_and_claim, CompactionCandidate, CrossCompactionConfig,
    CrossSpaceSelector, RewriteCrossSpaceSelector, SelectionRound,
};
pub use error::{InvariantKind, Result, SpaceError};
pub use resource::{
    DeviceId, DeviceTimeRange, FileId, FileResource, FileResourceRef, FileStatus, SpaceKind,
    TimeRange, Timestamp,
};
pub use space::{FileSpaceManager, PartitionKey, SpaceLayout, SpaceSnapshot};
