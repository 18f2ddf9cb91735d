//! Cross-space compaction selection.
//!
//! The selector reads a snapshot of one partition and returns frozen
//! [`CompactionCandidate`]s; [`schedule`] claims them on the manager so
//! that concurrent rounds never hand out the same file twice.

pub mod candidate;
pub mod config;
pub mod schedule;
pub mod selector;

pub use candidate::CompactionCandidate;
pub use config::CrossCompactionConfig;
pub use schedule::{run_selection_round, select_and_claim, SelectionRound};
pub use selector::{CrossSpaceSelector, RewriteCrossSpaceSelector};
