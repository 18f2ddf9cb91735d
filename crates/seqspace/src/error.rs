//! Error and Result types for file space and compaction selection operations.

use crate::resource::{FileId, FileStatus};
use std::io;
use thiserror::Error;

/// A convenience `Result` type for seqspace operations.
pub type Result<T> = std::result::Result<T, SpaceError>;

/// The error type for file space management and compaction selection.
#[derive(Debug, Error)]
pub enum SpaceError {
    /// A file referenced by a selection or a claim vanished or changed status
    /// after the snapshot was taken. The caller should retry with a fresh
    /// snapshot on the next scheduling cycle.
    #[error("Concurrent modification of file {file_id}: {reason}")]
    ConcurrentModification {
        /// File that no longer matches the snapshot.
        file_id: FileId,
        /// What changed.
        reason: String,
    },

    /// Malformed input that must never occur in a healthy file space.
    #[error("Invariant violation on file {file_id}: {kind}")]
    InvariantViolation {
        /// File carrying the malformed metadata.
        file_id: FileId,
        /// The violated invariant.
        kind: InvariantKind,
    },

    /// A status transition outside the lifecycle state machine.
    #[error("Illegal status transition for file {file_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        /// File being transitioned.
        file_id: FileId,
        /// Current status.
        from: FileStatus,
        /// Requested status.
        to: FileStatus,
    },

    /// The file is not registered in the partition.
    #[error("File not found: {0}")]
    FileNotFound(FileId),

    /// Ingestion wrote to a file that is already sealed.
    #[error("File {0} is not accepting writes")]
    FileSealed(FileId),

    /// The partition is not registered in the manager.
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    /// Invalid magic bytes in a resource sidecar.
    #[error("Invalid magic bytes: expected SRES, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported resource sidecar format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Resource sidecar checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// Resource sidecar content could not be decoded.
    #[error("Corrupted resource file: {0}")]
    Corrupted(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl SpaceError {
    /// Returns true if the error only concerns the current snapshot and the
    /// selection should simply be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    pub(crate) fn invariant(file_id: FileId, kind: InvariantKind) -> Self {
        Self::InvariantViolation { file_id, kind }
    }

    pub(crate) fn concurrent(file_id: FileId, reason: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            file_id,
            reason: reason.into(),
        }
    }
}

/// Invariants checked before a selection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantKind {
    /// A file that is no longer being written still has an open device range.
    OpenRangeInClosedFile {
        /// Device with the open range.
        device: String,
    },
    /// A closed device range whose start is after its end.
    InvertedRange {
        /// Device with the inverted range.
        device: String,
        /// Range start.
        start: i64,
        /// Range end.
        end: i64,
    },
    /// A file was passed in the wrong space list.
    WrongSpace,
    /// The same file id appears more than once in one selection input.
    DuplicateFile,
    /// A file was sealed while a device range was still open.
    MissingEndTime {
        /// Device without an end time.
        device: String,
    },
    /// A seal end time falls before data already written for the device.
    EndBeforeLastWrite {
        /// Device being sealed.
        device: String,
        /// Latest recorded timestamp.
        last_write: i64,
        /// Supplied end time.
        end: i64,
    },
    /// A device name too long for the resource sidecar format.
    DeviceNameTooLong {
        /// Device name length in bytes.
        len: usize,
    },
}

impl std::fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenRangeInClosedFile { device } => {
                write!(f, "closed file has open range for device {}", device)
            }
            Self::InvertedRange { device, start, end } => {
                write!(f, "device {} has inverted range [{}, {}]", device, start, end)
            }
            Self::WrongSpace => write!(f, "file listed in the wrong space"),
            Self::DuplicateFile => write!(f, "file listed twice"),
            Self::MissingEndTime { device } => {
                write!(f, "no end time supplied for open device {}", device)
            }
            Self::EndBeforeLastWrite {
                device,
                last_write,
                end,
            } => write!(
                f,
                "end time {} for device {} is before its last write at {}",
                end, device, last_write
            ),
            Self::DeviceNameTooLong { len } => {
                write!(f, "device name of {} bytes does not fit the resource format", len)
            }
        }
    }
}
