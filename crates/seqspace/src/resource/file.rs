//! Metadata of one persisted data file.

use crate::error::{InvariantKind, Result, SpaceError};
use crate::resource::{DeviceTimeRange, FileStatus, SpaceKind, TimeRange, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier of a data file, unique within a partition.
pub type FileId = u64;

/// Device identifier (full device path).
pub type DeviceId = String;

/// Shared, immutable handle to a file resource.
///
/// Snapshots hand out these handles; a status change in the manager swaps
/// in a new handle and never mutates one that a snapshot may be holding.
pub type FileResourceRef = Arc<FileResource>;

/// Metadata for one data file: space, lifecycle status and per-device ranges.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::resource::{FileResource, FileStatus, SpaceKind};
///
/// let file = FileResource::new(1, SpaceKind::Sequence, 1)
///     .with_device("root.sg.d1", 150, 400)
///     .with_size(4096);
/// assert_eq!(file.status(), FileStatus::Closed);
/// assert!(file.contains_device("root.sg.d1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    id: FileId,
    space: SpaceKind,
    status: FileStatus,
    devices: BTreeMap<DeviceId, DeviceTimeRange>,
    ordering_key: u64,
    size: u64,
    inner_level: u32,
    cross_level: u32,
}

impl FileResource {
    /// Creates a closed file without devices.
    pub fn new(id: FileId, space: SpaceKind, ordering_key: u64) -> Self {
        Self {
            id,
            space,
            status: FileStatus::Closed,
            devices: BTreeMap::new(),
            ordering_key,
            size: 0,
            inner_level: 0,
            cross_level: 0,
        }
    }

    /// Creates a file that ingestion is still writing.
    pub fn unclosed(id: FileId, space: SpaceKind, ordering_key: u64) -> Self {
        Self {
            status: FileStatus::Unclosed,
            ..Self::new(id, space, ordering_key)
        }
    }

    /// Adds a device with a closed range.
    pub fn with_device(mut self, device: impl Into<DeviceId>, start: Timestamp, end: Timestamp) -> Self {
        self.devices
            .insert(device.into(), DeviceTimeRange::closed(start, end));
        self
    }

    /// Adds a device whose data is still arriving.
    pub fn with_open_device(mut self, device: impl Into<DeviceId>, start: Timestamp) -> Self {
        self.devices
            .insert(device.into(), DeviceTimeRange::open(start));
        self
    }

    /// Adds a device with an explicit range.
    pub fn with_device_range(mut self, device: impl Into<DeviceId>, range: DeviceTimeRange) -> Self {
        self.devices.insert(device.into(), range);
        self
    }

    /// Sets the initial status, as reported by whoever created the file.
    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the estimated size in bytes.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the inner-space and cross-space compaction levels.
    pub fn with_levels(mut self, inner_level: u32, cross_level: u32) -> Self {
        self.inner_level = inner_level;
        self.cross_level = cross_level;
        self
    }

    /// Returns the file id.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the space this file belongs to.
    pub fn space(&self) -> SpaceKind {
        self.space
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> FileStatus {
        self.status
    }

    /// Returns the generation used to order sequence files.
    pub fn ordering_key(&self) -> u64 {
        self.ordering_key
    }

    /// Returns the estimated size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of inner-space compactions this file went through.
    pub fn inner_level(&self) -> u32 {
        self.inner_level
    }

    /// Returns the number of cross-space compactions this file went through.
    pub fn cross_level(&self) -> u32 {
        self.cross_level
    }

    /// Iterates devices in device id order.
    pub fn devices(&self) -> impl Iterator<Item = (&DeviceId, &DeviceTimeRange)> {
        self.devices.iter()
    }

    /// Returns the range of one device.
    pub fn device_range(&self, device: &str) -> Option<&DeviceTimeRange> {
        self.devices.get(device)
    }

    /// Returns true if the file holds data for `device`.
    pub fn contains_device(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    /// Returns the number of devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if the file may be selected as a compaction member.
    pub fn is_selectable(&self) -> bool {
        self.status.is_selectable()
    }

    /// Returns true if every device range ends before `lower_bound`, i.e.
    /// all data in the file has outlived its TTL.
    pub fn is_expired(&self, lower_bound: Timestamp) -> bool {
        !self.devices.is_empty()
            && self
                .devices
                .values()
                .all(|range| range.ends_before(lower_bound))
    }

    /// Checks the per-file invariants.
    ///
    /// # Errors
    ///
    /// Returns `SpaceError::InvariantViolation` if a file that is no longer
    /// being written has an open range, or a closed range is inverted.
    pub fn validate(&self) -> Result<()> {
        for (device, range) in &self.devices {
            match range {
                DeviceTimeRange::Open { .. } if self.status != FileStatus::Unclosed => {
                    return Err(SpaceError::invariant(
                        self.id,
                        InvariantKind::OpenRangeInClosedFile {
                            device: device.clone(),
                        },
                    ));
                }
                DeviceTimeRange::Closed(range) if !range.is_valid() => {
                    return Err(SpaceError::invariant(
                        self.id,
                        InvariantKind::InvertedRange {
                            device: device.clone(),
                            start: range.start,
                            end: range.end,
                        },
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Moves the file to `next` if the lifecycle allows it.
    pub(crate) fn transition(&mut self, next: FileStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SpaceError::IllegalTransition {
                file_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records a write for `device` at `ts`. New devices start as open ranges.
    pub(crate) fn record(&mut self, device: &str, ts: Timestamp) {
        match self.devices.get_mut(device) {
            Some(range) => range.record(ts),
            None => {
                self.devices
                    .insert(device.to_string(), DeviceTimeRange::open(ts));
            }
        }
    }

    /// Closes every open range with the supplied end times and marks the
    /// file closed. On error the file is left untouched and still unclosed.
    pub(crate) fn seal(&mut self, end_times: &BTreeMap<DeviceId, Timestamp>) -> Result<()> {
        let mut sealed = BTreeMap::new();
        for (device, range) in &self.devices {
            let closed = match (range, end_times.get(device)) {
                (_, Some(&end)) => {
                    let closed = range.close(end);
                    if !closed.is_valid() {
                        return Err(SpaceError::invariant(
                            self.id,
                            InvariantKind::InvertedRange {
                                device: device.clone(),
                                start: closed.start,
                                end: closed.end,
                            },
                        ));
                    }
                    if closed.end < range.last_write() {
                        return Err(SpaceError::invariant(
                            self.id,
                            InvariantKind::EndBeforeLastWrite {
                                device: device.clone(),
                                last_write: range.last_write(),
                                end,
                            },
                        ));
                    }
                    closed
                }
                (DeviceTimeRange::Closed(range), None) => *range,
                (DeviceTimeRange::Open { .. }, None) => {
                    return Err(SpaceError::invariant(
                        self.id,
                        InvariantKind::MissingEndTime {
                            device: device.clone(),
                        },
                    ));
                }
            };
            sealed.insert(device.clone(), DeviceTimeRange::Closed(closed));
        }
        self.transition(FileStatus::Closed)?;
        self.devices = sealed;
        Ok(())
    }

    /// Closed ranges of all devices; open ranges are skipped.
    pub fn closed_ranges(&self) -> impl Iterator<Item = (&DeviceId, TimeRange)> {
        self.devices.iter().filter_map(|(device, range)| match range {
            DeviceTimeRange::Closed(range) => Some((device, *range)),
            DeviceTimeRange::Open { .. } => None,
        })
    }
}
