//! File resource model: time ranges, lifecycle status and per-file metadata.

pub mod codec;
pub mod file;
pub mod range;
pub mod status;

/// Timestamp on the engine's integer time axis.
pub type Timestamp = i64;

pub use file::{DeviceId, FileId, FileResource, FileResourceRef};
pub use range::{DeviceTimeRange, RangeRelation, TimeRange};
pub use status::{FileStatus, SpaceKind};
