//! Budget and filters for cross-space compaction selection.

use crate::resource::Timestamp;

/// Default maximum number of files in one candidate.
pub const DEFAULT_MAX_FILE_NUM: usize = 500;

/// Default maximum aggregate size of one candidate: 5 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default maximum number of candidates produced by one selection run.
pub const DEFAULT_MAX_CANDIDATES_PER_RUN: usize = 4;

/// Default minimum inner-space level of unsequence files.
pub const DEFAULT_MIN_UNSEQ_LEVEL: u32 = 0;

/// Default number of partitions selected concurrently in one round.
pub const DEFAULT_SELECTION_THREADS: usize = 8;

/// Configuration for cross-space compaction selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossCompactionConfig {
    /// Maximum number of files (sequence plus unsequence) in one candidate.
    ///
    /// Default: 500.
    pub max_file_num: usize,

    /// Maximum aggregate estimated size of one candidate in bytes.
    ///
    /// Default: 5 GiB.
    pub max_file_size: u64,

    /// Maximum number of candidates returned by one selection run.
    ///
    /// Default: 4.
    pub max_candidates_per_run: usize,

    /// Unsequence files below this inner-space level stop the scan until
    /// inner-space compaction has caught up. Default: 0.
    pub min_unseq_level: u32,

    /// Unsequence files whose data all ends before this timestamp have
    /// expired and are left to TTL cleanup. Default: none.
    pub ttl_lower_bound: Option<Timestamp>,

    /// Maximum number of partitions selected concurrently by
    /// `run_selection_round`. Zero is treated as one.
    ///
    /// Default: 8.
    pub selection_threads: usize,
}

impl Default for CrossCompactionConfig {
    fn default() -> Self {
        Self {
            max_file_num: DEFAULT_MAX_FILE_NUM,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_candidates_per_run: DEFAULT_MAX_CANDIDATES_PER_RUN,
            min_unseq_level: DEFAULT_MIN_UNSEQ_LEVEL,
            ttl_lower_bound: None,
            selection_threads: DEFAULT_SELECTION_THREADS,
        }
    }
}

impl CrossCompactionConfig {
    /// Sets the maximum file count per candidate.
    pub fn with_max_file_num(mut self, max: usize) -> Self {
        self.max_file_num = max;
        self
    }

    /// Sets the maximum aggregate size per candidate.
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// Sets the maximum number of candidates per run.
    pub fn with_max_candidates_per_run(mut self, max: usize) -> Self {
        self.max_candidates_per_run = max;
        self
    }

    /// Sets the minimum unsequence inner-space level.
    pub fn with_min_unseq_level(mut self, level: u32) -> Self {
        self.min_unseq_level = level;
        self
    }

    /// Sets the TTL lower bound.
    pub fn with_ttl_lower_bound(mut self, lower_bound: Timestamp) -> Self {
        self.ttl_lower_bound = Some(lower_bound);
        self
    }

    /// Sets the number of partitions selected concurrently.
    pub fn with_selection_threads(mut self, threads: usize) -> Self {
        self.selection_threads = threads;
        self
    }
}
