//! Closed and open time ranges for per-device file metadata.

use crate::resource::Timestamp;

/// A closed time interval `[start, end]`.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::resource::TimeRange;
///
/// let a = TimeRange::new(100, 300);
/// assert!(a.overlaps(&TimeRange::new(300, 400)));
/// assert!(!a.overlaps(&TimeRange::new(301, 400)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// Start timestamp (inclusive).
    pub start: Timestamp,
    /// End timestamp (inclusive).
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a new range. The range is not validated; see [`TimeRange::is_valid`].
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Returns true if `start <= end`.
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Returns true if both closed ranges share at least one timestamp.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns true if `ts` lies inside the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// Position of a sequence-file device range relative to an unsequence range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRelation {
    /// The range ends strictly before the other starts.
    Before,
    /// The ranges share at least one timestamp.
    Overlapping,
    /// The range starts strictly after the other ends.
    After,
}

/// Time range of one device inside one file.
///
/// A device whose data is still arriving in an unclosed file has an open
/// range: its start is known, its end is unbounded. Keeping the open case as
/// its own variant means no comparison ever treats a placeholder end as a
/// real bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTimeRange {
    /// Finalized range.
    Closed(TimeRange),
    /// Range of a device still being written, conceptually `[start, +inf)`.
    Open {
        /// Earliest timestamp written for the device.
        start: Timestamp,
        /// Latest timestamp written for the device. Never below `start`.
        last_write: Timestamp,
    },
}

impl DeviceTimeRange {
    /// Creates a closed range.
    pub fn closed(start: Timestamp, end: Timestamp) -> Self {
        Self::Closed(TimeRange::new(start, end))
    }

    /// Creates an open range holding a single write at `start`.
    pub fn open(start: Timestamp) -> Self {
        Self::Open {
            start,
            last_write: start,
        }
    }

    /// Creates an open range whose writes so far span `[start, last_write]`.
    /// A `last_write` below `start` is raised to `start`.
    pub fn open_until(start: Timestamp, last_write: Timestamp) -> Self {
        Self::Open {
            start,
            last_write: last_write.max(start),
        }
    }

    /// Returns the start timestamp.
    pub fn start(&self) -> Timestamp {
        match self {
            Self::Closed(range) => range.start,
            Self::Open { start, .. } => *start,
        }
    }

    /// Returns the latest timestamp known to hold data: the end of a closed
    /// range, the last write of an open one.
    pub fn last_write(&self) -> Timestamp {
        match self {
            Self::Closed(range) => range.end,
            Self::Open { last_write, .. } => *last_write,
        }
    }

    /// Returns the end timestamp, or `None` for an open range.
    pub fn end(&self) -> Option<Timestamp> {
        match self {
            Self::Closed(range) => Some(range.end),
            Self::Open { .. } => None,
        }
    }

    /// Returns true for an open range.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns true if the range shares a timestamp with `other`.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        match self {
            Self::Closed(range) => range.overlaps(other),
            Self::Open { start, .. } => *start <= other.end,
        }
    }

    /// Returns true if the range ends strictly before `ts`.
    pub fn ends_before(&self, ts: Timestamp) -> bool {
        match self {
            Self::Closed(range) => range.end < ts,
            Self::Open { .. } => false,
        }
    }

    /// Classifies this range against `other`.
    ///
    /// # Examples
    /// ```rust
    /// use alopex_seqspace::resource::{DeviceTimeRange, RangeRelation, TimeRange};
    ///
    /// let unseq = TimeRange::new(300, 400);
    /// assert_eq!(DeviceTimeRange::closed(100, 200).relation_to(&unseq), RangeRelation::Before);
    /// assert_eq!(DeviceTimeRange::open(100).relation_to(&unseq), RangeRelation::Overlapping);
    /// assert_eq!(DeviceTimeRange::open(610).relation_to(&unseq), RangeRelation::After);
    /// ```
    pub fn relation_to(&self, other: &TimeRange) -> RangeRelation {
        if self.start() > other.end {
            RangeRelation::After
        } else if self.ends_before(other.start) {
            RangeRelation::Before
        } else {
            RangeRelation::Overlapping
        }
    }

    /// Extends the range to include `ts`.
    ///
    /// An open range stays unbounded and only tracks the written span.
    pub fn record(&mut self, ts: Timestamp) {
        match self {
            Self::Closed(range) => {
                range.start = range.start.min(ts);
                range.end = range.end.max(ts);
            }
            Self::Open { start, last_write } => {
                *start = (*start).min(ts);
                *last_write = (*last_write).max(ts);
            }
        }
    }

    /// Closes the range at `end`. Closing an already closed range keeps the
    /// larger of both ends.
    ///
    /// The result is not validated: an `end` before the start or before the
    /// last write of an open range is returned as given.
    pub fn close(self, end: Timestamp) -> TimeRange {
        match self {
            Self::Closed(range) => TimeRange::new(range.start, range.end.max(end)),
            Self::Open { start, .. } => TimeRange::new(start, end),
        }
    }
}
