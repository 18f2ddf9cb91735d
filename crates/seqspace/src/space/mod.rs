//! File space management: partition registry, snapshots and on-disk layout.

pub mod layout;
pub mod manager;

pub use layout::{PartitionKey, SpaceLayout, TsFileName};
pub use manager::{FileSpaceManager, SpaceSnapshot};
