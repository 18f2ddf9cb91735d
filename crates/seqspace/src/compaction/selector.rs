//! Cross-space compaction selection.
//!
//! Unsequence files are consumed strictly in arrival order. For every
//! device of an unsequence file the selector finds the sequence files its
//! points must be merged into; the unsequence file together with those
//! targets forms an atomic split that is either committed to the current
//! candidate or ends the scan.

use crate::compaction::candidate::{CandidateBuilder, Split};
use crate::compaction::{CompactionCandidate, CrossCompactionConfig};
use crate::error::{InvariantKind, Result, SpaceError};
use crate::resource::{
    FileId, FileResourceRef, FileStatus, RangeRelation, SpaceKind, TimeRange,
};
use crate::space::{FileSpaceManager, PartitionKey, SpaceSnapshot};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Selects groups of sequence and unsequence files to merge.
pub trait CrossSpaceSelector: Send + Sync {
    /// Selects zero or more disjoint candidates from the given files.
    ///
    /// Selection is read-only and idempotent on an unchanged snapshot. An
    /// infeasible selection yields fewer candidates, never an error.
    ///
    /// # Errors
    ///
    /// Returns `SpaceError::ConcurrentModification` if an input file is not
    /// part of the selector's snapshot, and `SpaceError::InvariantViolation`
    /// for malformed input.
    fn select_cross_space_task(
        &self,
        seq_files: &[FileResourceRef],
        unseq_files: &[FileResourceRef],
    ) -> Result<Vec<CompactionCandidate>>;
}

/// Why an unsequence file could not be split.
#[derive(Debug)]
enum Blocked {
    /// An overlapping sequence file is not selectable.
    Overlap { device: String, file_id: FileId },
    /// Neither neighbour of the unsequence range is selectable.
    NoTarget { device: String },
}

/// Selector that rewrites unsequence data into the sequence files it
/// overlaps or borders.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::compaction::{CrossCompactionConfig, CrossSpaceSelector, RewriteCrossSpaceSelector};
/// use alopex_seqspace::resource::{FileResource, SpaceKind};
/// use alopex_seqspace::space::{FileSpaceManager, PartitionKey};
///
/// let manager = FileSpaceManager::new();
/// let key = PartitionKey::new("root.sg", 0);
/// let seq = FileResource::new(1, SpaceKind::Sequence, 1).with_device("d1", 0, 100);
/// let unseq = FileResource::new(2, SpaceKind::Unsequence, 2).with_device("d1", 50, 60);
/// manager.add_all(&key, vec![seq], true).unwrap();
/// manager.add_all(&key, vec![unseq], false).unwrap();
///
/// let selector = RewriteCrossSpaceSelector::new("root.sg", 0, CrossCompactionConfig::default(), &manager);
/// let candidates = selector.select().unwrap();
/// assert_eq!(candidates.len(), 1);
/// assert_eq!(candidates[0].file_ids(), vec![1, 2]);
/// ```
#[derive(Debug)]
pub struct RewriteCrossSpaceSelector {
    key: PartitionKey,
    config: CrossCompactionConfig,
    snapshot: SpaceSnapshot,
    index: HashMap<FileId, FileResourceRef>,
}

impl RewriteCrossSpaceSelector {
    /// Creates a selector over a fresh snapshot of one partition.
    pub fn new(
        storage_group: impl Into<String>,
        time_partition: i64,
        config: CrossCompactionConfig,
        manager: &FileSpaceManager,
    ) -> Self {
        let key = PartitionKey::new(storage_group, time_partition);
        let snapshot = manager.snapshot(&key);
        Self::from_snapshot(snapshot, config)
    }

    /// Creates a selector over an existing snapshot.
    pub fn from_snapshot(snapshot: SpaceSnapshot, config: CrossCompactionConfig) -> Self {
        let index = snapshot
            .seq_files()
            .iter()
            .chain(snapshot.unseq_files().iter())
            .map(|file| (file.id(), FileResourceRef::clone(file)))
            .collect();
        Self {
            key: snapshot.key().clone(),
            config,
            snapshot,
            index,
        }
    }

    /// Returns the partition this selector works on.
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Returns the snapshot this selector works on.
    pub fn snapshot(&self) -> &SpaceSnapshot {
        &self.snapshot
    }

    /// Selects over every file of the snapshot.
    pub fn select(&self) -> Result<Vec<CompactionCandidate>> {
        self.select_cross_space_task(self.snapshot.seq_files(), self.snapshot.unseq_files())
    }

    /// Checks the input lists against the snapshot and returns the
    /// snapshot's view of every file.
    fn resolve_inputs(
        &self,
        seq_files: &[FileResourceRef],
        unseq_files: &[FileResourceRef],
    ) -> Result<(Vec<FileResourceRef>, Vec<FileResourceRef>)> {
        let mut seen = HashSet::new();
        let mut check = |files: &[FileResourceRef], space: SpaceKind| -> Result<Vec<FileResourceRef>> {
            let mut resolved = Vec::with_capacity(files.len());
            for file in files {
                if file.space() != space {
                    return Err(SpaceError::invariant(file.id(), InvariantKind::WrongSpace));
                }
                if !seen.insert(file.id()) {
                    return Err(SpaceError::invariant(file.id(), InvariantKind::DuplicateFile));
                }
                file.validate()?;

                let current = self
                    .index
                    .get(&file.id())
                    .ok_or_else(|| SpaceError::concurrent(file.id(), "not present in snapshot"))?;
                if current.status() == FileStatus::Deleted || file.status() == FileStatus::Deleted {
                    return Err(SpaceError::concurrent(file.id(), "file was deleted"));
                }
                if current.status() != file.status() {
                    return Err(SpaceError::concurrent(
                        file.id(),
                        format!("status {:?} differs from snapshot {:?}", file.status(), current.status()),
                    ));
                }
                resolved.push(FileResourceRef::clone(current));
            }
            Ok(resolved)
        };

        let mut seq = check(seq_files, SpaceKind::Sequence)?;
        let unseq = check(unseq_files, SpaceKind::Unsequence)?;
        seq.sort_by_key(|file| (file.ordering_key(), file.id()));
        Ok((seq, unseq))
    }

    /// Finds the sequence files `unseq` must be merged with.
    ///
    /// A sequence file is selectable if it is closed and not consumed by an
    /// earlier candidate of this run; files of the current builder are
    /// selectable and are not repeated in the split.
    fn split(
        &self,
        unseq: &FileResourceRef,
        seq_files: &[FileResourceRef],
        consumed: &HashSet<FileId>,
        builder: &CandidateBuilder,
    ) -> std::result::Result<Split, Blocked> {
        let selectable = |file: &FileResourceRef| file.is_selectable() && !consumed.contains(&file.id());
        let mut targets: BTreeMap<FileId, FileResourceRef> = BTreeMap::new();

        for (device, range) in unseq.closed_ranges() {
            if let Some(files) = self.device_targets(device, &range, seq_files, &selectable)? {
                for file in files {
                    targets.insert(file.id(), FileResourceRef::clone(file));
                }
            }
        }

        Ok(Split {
            unseq: FileResourceRef::clone(unseq),
            seq: targets
                .into_values()
                .filter(|file| !builder.contains_seq(file.id()))
                .collect(),
        })
    }

    /// Resolves the targets of one device. `None` means the device is in
    /// no sequence file and needs no target.
    fn device_targets<'a, F>(
        &self,
        device: &str,
        range: &TimeRange,
        seq_files: &'a [FileResourceRef],
        selectable: &F,
    ) -> std::result::Result<Option<Vec<&'a FileResourceRef>>, Blocked>
    where
        F: Fn(&FileResourceRef) -> bool,
    {
        let mut overlapping = Vec::new();
        let mut previous = None;
        let mut following = None;
        let mut present = false;

        for file in seq_files {
            let Some(seq_range) = file.device_range(device) else {
                continue;
            };
            present = true;
            match seq_range.relation_to(range) {
                RangeRelation::Overlapping => {
                    if !selectable(file) {
                        return Err(Blocked::Overlap {
                            device: device.to_string(),
                            file_id: file.id(),
                        });
                    }
                    overlapping.push(file);
                }
                RangeRelation::Before => previous = Some(file),
                RangeRelation::After => {
                    if following.is_none() {
                        following = Some(file);
                    }
                }
            }
        }

        if !overlapping.is_empty() {
            return Ok(Some(overlapping));
        }
        if let Some(file) = following.filter(|file| selectable(*file)) {
            return Ok(Some(vec![file]));
        }
        if let Some(file) = previous.filter(|file| selectable(*file)) {
            return Ok(Some(vec![file]));
        }
        if !present {
            return Ok(None);
        }
        Err(Blocked::NoTarget {
            device: device.to_string(),
        })
    }

    fn log_blocked(&self, unseq: &FileResourceRef, blocked: &Blocked) {
        match blocked {
            Blocked::Overlap { device, file_id } => debug!(
                "Cross-space selection in {} stopped at unsequence file {}: device {} overlaps unavailable sequence file {}",
                self.key,
                unseq.id(),
                device,
                file_id
            ),
            Blocked::NoTarget { device } => debug!(
                "Cross-space selection in {} stopped at unsequence file {}: no selectable target for device {}",
                self.key,
                unseq.id(),
                device
            ),
        }
    }
}

impl CrossSpaceSelector for RewriteCrossSpaceSelector {
    fn select_cross_space_task(
        &self,
        seq_files: &[FileResourceRef],
        unseq_files: &[FileResourceRef],
    ) -> Result<Vec<CompactionCandidate>> {
        let (seq_files, unseq_files) = self.resolve_inputs(seq_files, unseq_files)?;

        let mut candidates = Vec::new();
        if self.config.max_candidates_per_run == 0 {
            return Ok(candidates);
        }

        let mut consumed: HashSet<FileId> = HashSet::new();
        let mut builder = CandidateBuilder::new();

        'scan: for unseq in &unseq_files {
            if !unseq.is_selectable() {
                debug!(
                    "Cross-space selection in {} stopped at unsequence file {} with status {:?}",
                    self.key,
                    unseq.id(),
                    unseq.status()
                );
                break;
            }
            if unseq.inner_level() < self.config.min_unseq_level {
                debug!(
                    "Cross-space selection in {} stopped at unsequence file {}: level {} below {}",
                    self.key,
                    unseq.id(),
                    unseq.inner_level(),
                    self.config.min_unseq_level
                );
                break;
            }
            if let Some(lower_bound) = self.config.ttl_lower_bound {
                if unseq.is_expired(lower_bound) {
                    debug!("Skipping expired unsequence file {} in {}", unseq.id(), self.key);
                    continue;
                }
            }

            loop {
                let split = match self.split(unseq, &seq_files, &consumed, &builder) {
                    Ok(split) => split,
                    Err(blocked) => {
                        self.log_blocked(unseq, &blocked);
                        break 'scan;
                    }
                };

                if builder.fits(&split, &self.config) {
                    builder.commit(split);
                    break;
                }
                if builder.is_empty() {
                    debug!(
                        "Cross-space selection in {} stopped at unsequence file {}: split exceeds the candidate budget",
                        self.key,
                        unseq.id()
                    );
                    break 'scan;
                }

                // Later unsequence files must not be merged ahead of the
                // ones held by a builder that cannot be finalized.
                let Some(candidate) = std::mem::take(&mut builder).finish() else {
                    break 'scan;
                };
                consumed.extend(candidate.file_ids());
                candidates.push(candidate);
                if candidates.len() >= self.config.max_candidates_per_run {
                    break 'scan;
                }
            }
        }

        if let Some(candidate) = builder.finish() {
            candidates.push(candidate);
        }

        debug!(
            "Cross-space selection in {} produced {} candidates from {} sequence and {} unsequence files",
            self.key,
            candidates.len(),
            seq_files.len(),
            unseq_files.len()
        );
        Ok(candidates)
    }
}
