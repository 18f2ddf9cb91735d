//! File space membership and lifecycle status.

/// Which space a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SpaceKind {
    /// Per-device non-overlapping files, written in time order.
    Sequence = 0,
    /// Out-of-order or delayed files that may overlap anything.
    Unsequence = 1,
}

impl SpaceKind {
    /// Creates a SpaceKind from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Sequence),
            1 => Some(Self::Unsequence),
            _ => None,
        }
    }

    /// Directory name used by the on-disk layout.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Unsequence => "unsequence",
        }
    }
}

/// Lifecycle status of a data file.
///
/// ```text
/// Unclosed -> Closed -> CompactionCandidate -> Compacting -> Deleted
///               |  ^            |                  |
///               |  +------------+------------------+   (release / abort)
///               +-> Deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileStatus {
    /// Still being written by ingestion.
    Unclosed = 0,
    /// Sealed and eligible for compaction.
    Closed = 1,
    /// Claimed by a selected compaction task.
    CompactionCandidate = 2,
    /// Being rewritten by a compaction executor.
    Compacting = 3,
    /// Removed from the file space. Terminal.
    Deleted = 4,
}

impl FileStatus {
    /// Creates a FileStatus from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unclosed),
            1 => Some(Self::Closed),
            2 => Some(Self::CompactionCandidate),
            3 => Some(Self::Compacting),
            4 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, next),
            (Unclosed, Closed)
                | (Closed, CompactionCandidate)
                | (Closed, Deleted)
                | (CompactionCandidate, Compacting)
                | (CompactionCandidate, Closed)
                | (Compacting, Deleted)
                | (Compacting, Closed)
        )
    }

    /// Only closed files may become compaction members.
    pub fn is_selectable(self) -> bool {
        self == Self::Closed
    }

    /// Claimed or in-flight compaction states.
    pub fn is_claimed(self) -> bool {
        matches!(self, Self::CompactionCandidate | Self::Compacting)
    }
}
