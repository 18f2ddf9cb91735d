//! Selection result and the builder that accumulates it.

use crate::compaction::CrossCompactionConfig;
use crate::resource::{DeviceId, FileId, FileResourceRef};
use std::collections::{BTreeSet, HashSet};

/// A frozen group of files to be merged into new sequence files.
///
/// Sequence files are ordered by ordering key, unsequence files by the
/// order in which they were selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionCandidate {
    seq_files: Vec<FileResourceRef>,
    unseq_files: Vec<FileResourceRef>,
    total_file_size: u64,
}

impl CompactionCandidate {
    /// Sequence members in ordering key order.
    pub fn seq_files(&self) -> &[FileResourceRef] {
        &self.seq_files
    }

    /// Unsequence members in selection order.
    pub fn unseq_files(&self) -> &[FileResourceRef] {
        &self.unseq_files
    }

    /// Number of member files.
    pub fn total_file_num(&self) -> usize {
        self.seq_files.len() + self.unseq_files.len()
    }

    /// Aggregate estimated size of the members in bytes.
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    /// Ids of all members, sequence files first.
    pub fn file_ids(&self) -> Vec<FileId> {
        self.seq_files
            .iter()
            .chain(self.unseq_files.iter())
            .map(|file| file.id())
            .collect()
    }

    /// Returns true if `id` is a member.
    pub fn contains(&self, id: FileId) -> bool {
        self.seq_files
            .iter()
            .chain(self.unseq_files.iter())
            .any(|file| file.id() == id)
    }

    /// Devices whose data the compaction rewrites.
    pub fn target_devices(&self) -> BTreeSet<DeviceId> {
        self.seq_files
            .iter()
            .chain(self.unseq_files.iter())
            .flat_map(|file| file.devices().map(|(device, _)| device.clone()))
            .collect()
    }
}

/// The files one unsequence file drags into a candidate.
#[derive(Debug, Clone)]
pub(crate) struct Split {
    pub(crate) unseq: FileResourceRef,
    /// Sequence targets not yet in the builder.
    pub(crate) seq: Vec<FileResourceRef>,
}

impl Split {
    fn file_num(&self) -> usize {
        1 + self.seq.len()
    }

    fn file_size(&self) -> u64 {
        self.seq
            .iter()
            .fold(self.unseq.size(), |acc, file| acc.saturating_add(file.size()))
    }
}

/// Append-only accumulator for one candidate.
#[derive(Debug, Default)]
pub(crate) struct CandidateBuilder {
    seq_files: Vec<FileResourceRef>,
    unseq_files: Vec<FileResourceRef>,
    seq_ids: HashSet<FileId>,
    total_file_size: u64,
}

impl CandidateBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.seq_files.is_empty() && self.unseq_files.is_empty()
    }

    pub(crate) fn contains_seq(&self, id: FileId) -> bool {
        self.seq_ids.contains(&id)
    }

    pub(crate) fn file_num(&self) -> usize {
        self.seq_files.len() + self.unseq_files.len()
    }

    /// Returns true if committing `split` keeps the candidate within budget.
    pub(crate) fn fits(&self, split: &Split, config: &CrossCompactionConfig) -> bool {
        self.file_num() + split.file_num() <= config.max_file_num
            && self.total_file_size.saturating_add(split.file_size()) <= config.max_file_size
    }

    pub(crate) fn commit(&mut self, split: Split) {
        self.total_file_size = self.total_file_size.saturating_add(split.file_size());
        for file in split.seq {
            if self.seq_ids.insert(file.id()) {
                self.seq_files.push(file);
            }
        }
        self.unseq_files.push(split.unseq);
    }

    /// Freezes the builder. Returns `None` unless it holds at least one
    /// file of each space.
    pub(crate) fn finish(self) -> Option<CompactionCandidate> {
        if self.seq_files.is_empty() || self.unseq_files.is_empty() {
            return None;
        }
        let mut seq_files = self.seq_files;
        seq_files.sort_by_key(|file| (file.ordering_key(), file.id()));
        Some(CompactionCandidate {
            seq_files,
            unseq_files: self.unseq_files,
            total_file_size: self.total_file_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{FileResource, SpaceKind};
    use std::sync::Arc;

    fn seq(id: FileId, ordering_key: u64, size: u64) -> FileResourceRef {
        Arc::new(
            FileResource::new(id, SpaceKind::Sequence, ordering_key)
                .with_device("d1", id as i64 * 100, id as i64 * 100 + 50)
                .with_size(size),
        )
    }

    fn unseq(id: FileId, size: u64) -> FileResourceRef {
        Arc::new(
            FileResource::new(id, SpaceKind::Unsequence, id)
                .with_device("d2", 0, 10)
                .with_size(size),
        )
    }

    #[test]
    fn test_finish_sorts_sequence_files() {
        let mut builder = CandidateBuilder::new();
        builder.commit(Split {
            unseq: unseq(10, 1),
            seq: vec![seq(3, 3, 1)],
        });
        builder.commit(Split {
            unseq: unseq(11, 1),
            seq: vec![seq(1, 1, 1)],
        });

        let candidate = builder.finish().unwrap();
        assert_eq!(candidate.file_ids(), vec![1, 3, 10, 11]);
        assert_eq!(candidate.total_file_num(), 4);
        assert_eq!(candidate.total_file_size(), 4);
        assert!(candidate.contains(11));
        assert!(!candidate.contains(2));
        let devices: Vec<DeviceId> = candidate.target_devices().into_iter().collect();
        assert_eq!(devices, vec!["d1".to_string(), "d2".to_string()]);
    }

    #[test]
    fn test_finish_requires_both_spaces() {
        let mut builder = CandidateBuilder::new();
        builder.commit(Split {
            unseq: unseq(10, 1),
            seq: Vec::new(),
        });
        assert!(builder.finish().is_none());
        assert!(CandidateBuilder::new().finish().is_none());
    }

    #[test]
    fn test_fits_respects_both_limits() {
        let config = CrossCompactionConfig::default()
            .with_max_file_num(3)
            .with_max_file_size(100);
        let mut builder = CandidateBuilder::new();
        let first = Split {
            unseq: unseq(10, 40),
            seq: vec![seq(1, 1, 40)],
        };
        assert!(builder.fits(&first, &config));
        builder.commit(first);

        let too_many = Split {
            unseq: unseq(11, 1),
            seq: vec![seq(2, 2, 1)],
        };
        assert!(!builder.fits(&too_many, &config));

        let too_big = Split {
            unseq: unseq(12, 21),
            seq: Vec::new(),
        };
        assert!(!builder.fits(&too_big, &config));

        let exact = Split {
            unseq: unseq(13, 20),
            seq: Vec::new(),
        };
        assert!(builder.fits(&exact, &config));
        assert!(builder.contains_seq(1));
    }
}
