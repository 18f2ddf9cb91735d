//! In-memory registry of sequence and unsequence files per partition.

use crate::compaction::CompactionCandidate;
use crate::error::{InvariantKind, Result, SpaceError};
use crate::resource::codec::{read_resource, write_resource};
use crate::resource::{
    DeviceId, FileId, FileResource, FileResourceRef, FileStatus, SpaceKind, Timestamp,
};
use crate::space::{PartitionKey, SpaceLayout};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PartitionFiles {
    seq: Vec<FileResourceRef>,
    unseq: Vec<FileResourceRef>,
}

impl PartitionFiles {
    fn locate(&self, id: FileId) -> Option<(SpaceKind, usize)> {
        if let Some(pos) = self.seq.iter().position(|file| file.id() == id) {
            return Some((SpaceKind::Sequence, pos));
        }
        self.unseq
            .iter()
            .position(|file| file.id() == id)
            .map(|pos| (SpaceKind::Unsequence, pos))
    }

    fn get(&self, id: FileId) -> Option<&FileResourceRef> {
        self.locate(id).map(|(space, pos)| &self.list(space)[pos])
    }

    fn list(&self, space: SpaceKind) -> &Vec<FileResourceRef> {
        match space {
            SpaceKind::Sequence => &self.seq,
            SpaceKind::Unsequence => &self.unseq,
        }
    }

    fn list_mut(&mut self, space: SpaceKind) -> &mut Vec<FileResourceRef> {
        match space {
            SpaceKind::Sequence => &mut self.seq,
            SpaceKind::Unsequence => &mut self.unseq,
        }
    }

    fn insert(&mut self, file: FileResourceRef) {
        match file.space() {
            SpaceKind::Sequence => {
                let key = file.ordering_key();
                let pos = self.seq.partition_point(|f| f.ordering_key() <= key);
                self.seq.insert(pos, file);
            }
            SpaceKind::Unsequence => self.unseq.push(file),
        }
    }

    /// Replaces one file with a modified copy. Snapshots that still hold
    /// the old handle keep seeing the old state.
    fn update<F>(&mut self, id: FileId, f: F) -> Result<FileResourceRef>
    where
        F: FnOnce(&mut FileResource) -> Result<()>,
    {
        let (space, pos) = self.locate(id).ok_or(SpaceError::FileNotFound(id))?;
        let slot = &mut self.list_mut(space)[pos];
        let mut next = (**slot).clone();
        f(&mut next)?;
        *slot = Arc::new(next);
        Ok(Arc::clone(slot))
    }

    fn remove(&mut self, id: FileId) -> Option<FileResourceRef> {
        let (space, pos) = self.locate(id)?;
        Some(self.list_mut(space).remove(pos))
    }

    /// Checks that every member is registered with status `from`.
    fn expect_status(&self, ids: &[FileId], from: FileStatus, to: FileStatus) -> Result<()> {
        for &id in ids {
            let file = self.get(id).ok_or(SpaceError::FileNotFound(id))?;
            if file.status() != from {
                return Err(SpaceError::IllegalTransition {
                    file_id: id,
                    from: file.status(),
                    to,
                });
            }
        }
        Ok(())
    }

    /// Moves every member to `to`. Statuses must have been checked first.
    fn transition_all(&mut self, ids: &[FileId], to: FileStatus) -> Result<()> {
        for &id in ids {
            self.update(id, |file| file.transition(to))?;
        }
        Ok(())
    }
}

/// Immutable view of one partition, unaffected by later manager mutations.
#[derive(Debug, Clone)]
pub struct SpaceSnapshot {
    key: PartitionKey,
    seq_files: Vec<FileResourceRef>,
    unseq_files: Vec<FileResourceRef>,
}

impl SpaceSnapshot {
    /// Returns the partition this snapshot was taken from.
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Sequence files in ordering key order.
    pub fn seq_files(&self) -> &[FileResourceRef] {
        &self.seq_files
    }

    /// Unsequence files in arrival order.
    pub fn unseq_files(&self) -> &[FileResourceRef] {
        &self.unseq_files
    }

    /// Looks a file up by id in either space.
    pub fn find(&self, id: FileId) -> Option<&FileResourceRef> {
        self.seq_files
            .iter()
            .chain(self.unseq_files.iter())
            .find(|file| file.id() == id)
    }

    /// Returns true if the partition had no files.
    pub fn is_empty(&self) -> bool {
        self.seq_files.is_empty() && self.unseq_files.is_empty()
    }
}

/// Registry of sequence and unsequence files for every
/// (storage group, time partition).
///
/// Readers take cheap snapshots under a short read lock. Every status change
/// replaces the affected `Arc<FileResource>`, so a snapshot never observes a
/// mutation.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::resource::{FileResource, SpaceKind};
/// use alopex_seqspace::space::{FileSpaceManager, PartitionKey};
///
/// let manager = FileSpaceManager::new();
/// let key = PartitionKey::new("root.sg", 0);
/// manager
///     .add_all(&key, vec![FileResource::new(1, SpaceKind::Sequence, 1).with_device("d1", 0, 10)], true)
///     .unwrap();
/// assert_eq!(manager.snapshot(&key).seq_files().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct FileSpaceManager {
    partitions: RwLock<BTreeMap<PartitionKey, PartitionFiles>>,
}

impl FileSpaceManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers new files in one space of a partition.
    ///
    /// Sequence files are placed by ordering key, unsequence files are
    /// appended. The batch is rejected as a whole if any file is malformed,
    /// belongs to the other space, or reuses an id of the partition.
    pub fn add_all(&self, key: &PartitionKey, files: Vec<FileResource>, is_sequence: bool) -> Result<()> {
        let expected = if is_sequence {
            SpaceKind::Sequence
        } else {
            SpaceKind::Unsequence
        };

        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let existing = partitions.get(key);

        let mut batch_ids = HashSet::new();
        for file in &files {
            file.validate()?;
            if file.space() != expected {
                return Err(SpaceError::invariant(file.id(), InvariantKind::WrongSpace));
            }
            let registered = existing.map_or(false, |p| p.get(file.id()).is_some());
            if !batch_ids.insert(file.id()) || registered {
                return Err(SpaceError::invariant(file.id(), InvariantKind::DuplicateFile));
            }
        }

        let partition = partitions.entry(key.clone()).or_default();
        for file in files {
            partition.insert(Arc::new(file));
        }
        Ok(())
    }

    /// Takes an immutable snapshot of a partition. Unknown partitions
    /// yield an empty snapshot.
    pub fn snapshot(&self, key: &PartitionKey) -> SpaceSnapshot {
        let partitions = self.partitions.read().unwrap_or_else(|err| err.into_inner());
        let (seq_files, unseq_files) = partitions
            .get(key)
            .map(|p| (p.seq.clone(), p.unseq.clone()))
            .unwrap_or_default();
        SpaceSnapshot {
            key: key.clone(),
            seq_files,
            unseq_files,
        }
    }

    /// Returns the keys of all registered partitions.
    pub fn partitions(&self) -> Vec<PartitionKey> {
        let partitions = self.partitions.read().unwrap_or_else(|err| err.into_inner());
        partitions.keys().cloned().collect()
    }

    /// Returns the current view of one file.
    pub fn get(&self, key: &PartitionKey, id: FileId) -> Result<FileResourceRef> {
        let partitions = self.partitions.read().unwrap_or_else(|err| err.into_inner());
        let partition = lookup(&partitions, key)?;
        partition
            .get(id)
            .cloned()
            .ok_or(SpaceError::FileNotFound(id))
    }

    /// Extends a device range of a file that ingestion is still writing.
    pub fn record_write(&self, key: &PartitionKey, id: FileId, device: &str, ts: Timestamp) -> Result<()> {
        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let partition = lookup_mut(&mut partitions, key)?;
        partition.update(id, |file| {
            if file.status() != FileStatus::Unclosed {
                return Err(SpaceError::FileSealed(id));
            }
            file.record(device, ts);
            Ok(())
        })?;
        Ok(())
    }

    /// Seals an unclosed file, closing every open range with the supplied
    /// end time.
    ///
    /// # Errors
    ///
    /// Returns `SpaceError::InvariantViolation` and leaves the file unclosed
    /// if an end time is missing, precedes the range start or precedes the
    /// last recorded write.
    pub fn seal(
        &self,
        key: &PartitionKey,
        id: FileId,
        end_times: &BTreeMap<DeviceId, Timestamp>,
    ) -> Result<FileResourceRef> {
        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let partition = lookup_mut(&mut partitions, key)?;
        let sealed = partition.update(id, |file| file.seal(end_times))?;
        debug!("Sealed file {} in partition {}", id, key);
        Ok(sealed)
    }

    /// Marks every member of a freshly selected candidate as claimed.
    ///
    /// Nothing changes unless every member is still registered and closed.
    ///
    /// # Errors
    ///
    /// Returns `SpaceError::ConcurrentModification` if a member vanished or
    /// changed status since the selection snapshot was taken.
    pub fn claim(&self, key: &PartitionKey, candidate: &CompactionCandidate) -> Result<()> {
        let ids = candidate.file_ids();
        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let partition = partitions
            .get_mut(key)
            .ok_or_else(|| SpaceError::PartitionNotFound(key.to_string()))?;

        for &id in &ids {
            match partition.get(id) {
                None => return Err(SpaceError::concurrent(id, "file no longer registered")),
                Some(file) if file.status() != FileStatus::Closed => {
                    return Err(SpaceError::concurrent(
                        id,
                        format!("status changed to {:?}", file.status()),
                    ))
                }
                Some(_) => {}
            }
        }

        partition.transition_all(&ids, FileStatus::CompactionCandidate)?;
        debug!("Claimed {} files in partition {}", ids.len(), key);
        Ok(())
    }

    /// Gives a claimed candidate back without running it.
    pub fn release(&self, key: &PartitionKey, candidate: &CompactionCandidate) -> Result<()> {
        self.move_members(key, candidate, FileStatus::CompactionCandidate, FileStatus::Closed)
    }

    /// Marks a claimed candidate as being rewritten.
    pub fn start_compaction(&self, key: &PartitionKey, candidate: &CompactionCandidate) -> Result<()> {
        self.move_members(key, candidate, FileStatus::CompactionCandidate, FileStatus::Compacting)
    }

    /// Returns the members of a failed compaction to the closed state.
    pub fn abort_compaction(&self, key: &PartitionKey, candidate: &CompactionCandidate) -> Result<()> {
        self.move_members(key, candidate, FileStatus::Compacting, FileStatus::Closed)
    }

    /// Replaces the members of a finished compaction with its output files.
    ///
    /// Members move to `Deleted` and leave the partition; `new_seq_files`
    /// join the sequence list in ordering key order. Returns the removed
    /// resources so the caller can unlink their data files.
    pub fn finish_compaction(
        &self,
        key: &PartitionKey,
        candidate: &CompactionCandidate,
        new_seq_files: Vec<FileResource>,
    ) -> Result<Vec<FileResourceRef>> {
        let ids = candidate.file_ids();
        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let partition = lookup_mut(&mut partitions, key)?;
        partition.expect_status(&ids, FileStatus::Compacting, FileStatus::Deleted)?;

        let mut new_ids = HashSet::new();
        for file in &new_seq_files {
            file.validate()?;
            if file.space() != SpaceKind::Sequence {
                return Err(SpaceError::invariant(file.id(), InvariantKind::WrongSpace));
            }
            let reused = partition.get(file.id()).is_some() && !ids.contains(&file.id());
            if !new_ids.insert(file.id()) || reused {
                return Err(SpaceError::invariant(file.id(), InvariantKind::DuplicateFile));
            }
        }

        partition.transition_all(&ids, FileStatus::Deleted)?;
        let removed: Vec<FileResourceRef> = ids.iter().filter_map(|&id| partition.remove(id)).collect();
        let added = new_seq_files.len();
        for file in new_seq_files {
            partition.insert(Arc::new(file));
        }

        info!(
            "Finished cross-space compaction in partition {}: {} files replaced by {}",
            key,
            removed.len(),
            added
        );
        Ok(removed)
    }

    /// Finishes a compaction and records the swap in the resource sidecars.
    ///
    /// Output sidecars are written first, then every input sidecar is
    /// rewritten as `Deleted` so [`FileSpaceManager::recover`] skips it.
    /// A crash between both steps leaves inputs and outputs on disk.
    pub fn finish_and_persist(
        &self,
        layout: &SpaceLayout,
        key: &PartitionKey,
        candidate: &CompactionCandidate,
        new_seq_files: Vec<FileResource>,
    ) -> Result<Vec<FileResourceRef>> {
        let new_ids: Vec<FileId> = new_seq_files.iter().map(|file| file.id()).collect();
        let removed = self.finish_compaction(key, candidate, new_seq_files)?;

        let mut written = HashSet::new();
        for id in new_ids {
            let file = self.get(key, id)?;
            written.insert(layout.resource_path(key, &file));
            self.persist(layout, key, id)?;
        }
        for file in &removed {
            if !written.contains(&layout.resource_path(key, file)) {
                Self::persist_deleted(layout, key, file)?;
            }
        }
        Ok(removed)
    }

    /// Deletes a closed file outside of compaction, e.g. on TTL expiry.
    pub fn delete(&self, key: &PartitionKey, id: FileId) -> Result<FileResourceRef> {
        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let partition = lookup_mut(&mut partitions, key)?;
        partition.update(id, |file| file.transition(FileStatus::Deleted))?;
        partition.remove(id).ok_or(SpaceError::FileNotFound(id))
    }

    /// Rebuilds a manager from the resource sidecars under `layout`.
    ///
    /// Files left claimed or compacting by a crash are returned to
    /// `Closed`; deleted files are skipped.
    pub fn recover(layout: &SpaceLayout) -> Result<Self> {
        let manager = Self::new();
        {
            let mut partitions = manager.partitions.write().unwrap_or_else(|err| err.into_inner());
            for key in layout.list_partitions()? {
                let mut files = PartitionFiles::default();
                let mut restored = 0usize;
                for space in [SpaceKind::Sequence, SpaceKind::Unsequence] {
                    for (name, path) in layout.list_resources(space, &key)? {
                        let mut resource = read_resource(&path)?;
                        if resource.space() != space || resource.id() != name.file_id {
                            return Err(SpaceError::Corrupted(format!(
                                "resource {} does not match its location",
                                path.display()
                            )));
                        }
                        if resource.status() == FileStatus::Deleted {
                            debug!("Skipping deleted resource: {}", path.display());
                            continue;
                        }
                        if resource.status().is_claimed() {
                            resource.transition(FileStatus::Closed)?;
                            restored += 1;
                        }
                        resource.validate()?;
                        if files.get(resource.id()).is_some() {
                            return Err(SpaceError::invariant(resource.id(), InvariantKind::DuplicateFile));
                        }
                        files.insert(Arc::new(resource));
                    }
                }
                info!(
                    "Recovered partition {}: {} sequence, {} unsequence files ({} restored to closed)",
                    key,
                    files.seq.len(),
                    files.unseq.len(),
                    restored
                );
                partitions.insert(key, files);
            }
        }
        Ok(manager)
    }

    /// Writes the resource sidecar of one file.
    pub fn persist(&self, layout: &SpaceLayout, key: &PartitionKey, id: FileId) -> Result<()> {
        let file = self.get(key, id)?;
        fs::create_dir_all(layout.partition_dir(file.space(), key))?;
        write_resource(&layout.resource_path(key, &file), &file)
    }

    /// Writes the sidecar of a file that already left the manager, as
    /// returned by [`FileSpaceManager::delete`] or
    /// [`FileSpaceManager::finish_compaction`].
    ///
    /// # Errors
    ///
    /// Returns `SpaceError::IllegalTransition` if the file is not `Deleted`.
    pub fn persist_deleted(layout: &SpaceLayout, key: &PartitionKey, file: &FileResource) -> Result<()> {
        if file.status() != FileStatus::Deleted {
            return Err(SpaceError::IllegalTransition {
                file_id: file.id(),
                from: file.status(),
                to: FileStatus::Deleted,
            });
        }
        let path = layout.resource_path(key, file);
        fs::create_dir_all(layout.partition_dir(file.space(), key))?;
        write_resource(&path, file)?;
        debug!("Persisted deleted resource: {}", path.display());
        Ok(())
    }

    fn move_members(
        &self,
        key: &PartitionKey,
        candidate: &CompactionCandidate,
        from: FileStatus,
        to: FileStatus,
    ) -> Result<()> {
        let ids = candidate.file_ids();
        let mut partitions = self.partitions.write().unwrap_or_else(|err| err.into_inner());
        let partition = lookup_mut(&mut partitions, key)?;
        partition.expect_status(&ids, from, to)?;
        partition.transition_all(&ids, to)?;
        debug!("Moved {} files in partition {} to {:?}", ids.len(), key, to);
        Ok(())
    }
}

fn lookup<'a>(
    partitions: &'a BTreeMap<PartitionKey, PartitionFiles>,
    key: &PartitionKey,
) -> Result<&'a PartitionFiles> {
    partitions
        .get(key)
        .ok_or_else(|| SpaceError::PartitionNotFound(key.to_string()))
}

fn lookup_mut<'a>(
    partitions: &'a mut BTreeMap<PartitionKey, PartitionFiles>,
    key: &PartitionKey,
) -> Result<&'a mut PartitionFiles> {
    partitions
        .get_mut(key)
        .ok_or_else(|| SpaceError::PartitionNotFound(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PartitionKey {
        PartitionKey::new("root.sg", 0)
    }

    fn seq(id: FileId, ordering_key: u64) -> FileResource {
        FileResource::new(id, SpaceKind::Sequence, ordering_key).with_device("d1", 0, 10)
    }

    #[test]
    fn test_add_all_orders_sequence_files() {
        let manager = FileSpaceManager::new();
        manager
            .add_all(&key(), vec![seq(1, 5), seq(2, 1)], true)
            .unwrap();
        manager.add_all(&key(), vec![seq(3, 3)], true).unwrap();

        let snapshot = manager.snapshot(&key());
        let order: Vec<FileId> = snapshot.seq_files().iter().map(|f| f.id()).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_add_all_rejects_batch_atomically() {
        let manager = FileSpaceManager::new();
        let unseq = FileResource::new(9, SpaceKind::Unsequence, 9);
        let err = manager
            .add_all(&key(), vec![seq(1, 1), unseq], true)
            .unwrap_err();
        assert!(matches!(
            err,
            SpaceError::InvariantViolation {
                kind: InvariantKind::WrongSpace,
                ..
            }
        ));
        assert!(manager.snapshot(&key()).is_empty());

        manager.add_all(&key(), vec![seq(1, 1)], true).unwrap();
        let dup = FileResource::new(1, SpaceKind::Unsequence, 2);
        assert!(matches!(
            manager.add_all(&key(), vec![dup], false),
            Err(SpaceError::InvariantViolation {
                kind: InvariantKind::DuplicateFile,
                ..
            })
        ));
    }

    #[test]
    fn test_snapshot_is_isolated_from_writes() {
        let manager = FileSpaceManager::new();
        let file = FileResource::unclosed(1, SpaceKind::Sequence, 1).with_open_device("d1", 100);
        manager.add_all(&key(), vec![file], true).unwrap();

        let before = manager.snapshot(&key());
        manager.record_write(&key(), 1, "d2", 50).unwrap();
        let mut ends = BTreeMap::new();
        ends.insert("d1".to_string(), 200);
        ends.insert("d2".to_string(), 60);
        manager.seal(&key(), 1, &ends).unwrap();

        let old = before.find(1).unwrap();
        assert_eq!(old.status(), FileStatus::Unclosed);
        assert_eq!(old.device_count(), 1);

        let now = manager.get(&key(), 1).unwrap();
        assert_eq!(now.status(), FileStatus::Closed);
        assert_eq!(now.device_count(), 2);
    }

    #[test]
    fn test_record_write_on_sealed_file() {
        let manager = FileSpaceManager::new();
        manager.add_all(&key(), vec![seq(1, 1)], true).unwrap();
        assert!(matches!(
            manager.record_write(&key(), 1, "d1", 5),
            Err(SpaceError::FileSealed(1))
        ));
        assert!(matches!(
            manager.record_write(&PartitionKey::new("root.other", 0), 1, "d1", 5),
            Err(SpaceError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn test_delete_removes_closed_file() {
        let manager = FileSpaceManager::new();
        manager.add_all(&key(), vec![seq(1, 1)], true).unwrap();
        let deleted = manager.delete(&key(), 1).unwrap();
        assert_eq!(deleted.status(), FileStatus::Deleted);
        assert!(matches!(
            manager.get(&key(), 1),
            Err(SpaceError::FileNotFound(1))
        ));
        assert_eq!(manager.partitions(), vec![key()]);
    }

    #[test]
    fn test_delete_rejects_unclosed_file() {
        let manager = FileSpaceManager::new();
        let file = FileResource::unclosed(1, SpaceKind::Sequence, 1);
        manager.add_all(&key(), vec![file], true).unwrap();
        assert!(matches!(
            manager.delete(&key(), 1),
            Err(SpaceError::IllegalTransition { .. })
        ));
        assert_eq!(manager.get(&key(), 1).unwrap().status(), FileStatus::Unclosed);
    }
}
