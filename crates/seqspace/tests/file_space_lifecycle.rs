//! Integration tests for the file lifecycle around compaction and recovery.

use alopex_seqspace::compaction::{select_and_claim, CrossCompactionConfig, RewriteCrossSpaceSelector};
use alopex_seqspace::resource::codec::{read_resource, write_resource};
use alopex_seqspace::resource::{DeviceTimeRange, FileResource, FileStatus, SpaceKind};
use alopex_seqspace::space::{FileSpaceManager, PartitionKey, SpaceLayout, TsFileName};
use alopex_seqspace::{run_selection_round, InvariantKind, SpaceError};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn key() -> PartitionKey {
    PartitionKey::new("root.sg", 3)
}

fn populated_manager() -> FileSpaceManager {
    let manager = FileSpaceManager::new();
    manager
        .add_all(
            &key(),
            vec![
                FileResource::new(1, SpaceKind::Sequence, 1)
                    .with_device("root.sg.d1", 0, 100)
                    .with_size(1000),
                FileResource::new(2, SpaceKind::Sequence, 2)
                    .with_device("root.sg.d1", 200, 300)
                    .with_size(1000),
            ],
            true,
        )
        .unwrap();
    manager
        .add_all(
            &key(),
            vec![FileResource::new(10, SpaceKind::Unsequence, 10)
                .with_device("root.sg.d1", 50, 250)
                .with_size(500)],
            false,
        )
        .unwrap();
    manager
}

#[test]
fn test_compaction_end_to_end() {
    let manager = populated_manager();
    let config = CrossCompactionConfig::default();

    let candidates = select_and_claim(&manager, &key(), &config).unwrap();
    assert_eq!(candidates.len(), 1);
    let candidate = &candidates[0];
    assert_eq!(candidate.file_ids(), vec![1, 2, 10]);
    assert_eq!(candidate.total_file_size(), 2500);

    manager.start_compaction(&key(), candidate).unwrap();
    assert_eq!(manager.get(&key(), 10).unwrap().status(), FileStatus::Compacting);

    let merged = FileResource::new(20, SpaceKind::Sequence, 3)
        .with_device("root.sg.d1", 0, 300)
        .with_size(2400)
        .with_levels(0, 1);
    let removed = manager.finish_compaction(&key(), candidate, vec![merged]).unwrap();
    assert_eq!(removed.len(), 3);
    assert!(removed.iter().all(|file| file.status() == FileStatus::Deleted));

    let snapshot = manager.snapshot(&key());
    let seq: Vec<u64> = snapshot.seq_files().iter().map(|file| file.id()).collect();
    assert_eq!(seq, vec![20]);
    assert!(snapshot.unseq_files().is_empty());
}

#[test]
fn test_abort_returns_files_to_closed() {
    let manager = populated_manager();
    let candidates = select_and_claim(&manager, &key(), &CrossCompactionConfig::default()).unwrap();
    let candidate = &candidates[0];

    manager.start_compaction(&key(), candidate).unwrap();
    manager.abort_compaction(&key(), candidate).unwrap();
    for id in candidate.file_ids() {
        assert_eq!(manager.get(&key(), id).unwrap().status(), FileStatus::Closed);
    }

    let again = select_and_claim(&manager, &key(), &CrossCompactionConfig::default()).unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].file_ids(), candidate.file_ids());
}

#[test]
fn test_release_and_illegal_moves() {
    let manager = populated_manager();
    let candidates = select_and_claim(&manager, &key(), &CrossCompactionConfig::default()).unwrap();
    let candidate = &candidates[0];

    assert!(matches!(
        manager.abort_compaction(&key(), candidate),
        Err(SpaceError::IllegalTransition {
            from: FileStatus::CompactionCandidate,
            to: FileStatus::Closed,
            ..
        })
    ));
    assert!(matches!(
        manager.finish_compaction(&key(), candidate, Vec::new()),
        Err(SpaceError::IllegalTransition { .. })
    ));

    manager.release(&key(), candidate).unwrap();
    assert!(manager
        .snapshot(&key())
        .seq_files()
        .iter()
        .all(|file| file.status() == FileStatus::Closed));
}

#[test]
fn test_claim_detects_stale_selection() {
    let manager = populated_manager();
    let selector = RewriteCrossSpaceSelector::new("root.sg", 3, CrossCompactionConfig::default(), &manager);
    let candidates = selector.select().unwrap();
    let candidate = &candidates[0];

    manager.delete(&key(), 2).unwrap();
    let err = manager.claim(&key(), candidate).unwrap_err();
    assert!(matches!(err, SpaceError::ConcurrentModification { file_id: 2, .. }));

    // Nothing was claimed.
    assert_eq!(manager.get(&key(), 1).unwrap().status(), FileStatus::Closed);
    assert_eq!(manager.get(&key(), 10).unwrap().status(), FileStatus::Closed);
}

#[test]
fn test_second_claim_of_same_candidate_fails() {
    let manager = populated_manager();
    let selector = RewriteCrossSpaceSelector::new("root.sg", 3, CrossCompactionConfig::default(), &manager);
    let candidates = selector.select().unwrap();

    manager.claim(&key(), &candidates[0]).unwrap();
    assert!(manager.claim(&key(), &candidates[0]).unwrap_err().is_retryable());
}

#[test]
fn test_round_reports_stale_and_claimed_partitions() {
    let manager = populated_manager();
    let round = run_selection_round(&manager, &CrossCompactionConfig::default());
    assert_eq!(round.candidate_count(), 1);
    assert_eq!(round.claimed[0].0, key());

    let second = run_selection_round(&manager, &CrossCompactionConfig::default());
    assert_eq!(second.candidate_count(), 0);
    assert!(second.retry.is_empty());
    assert!(second.failed.is_empty());
}

#[test]
fn test_ingestion_then_selection() {
    let manager = FileSpaceManager::new();
    manager
        .add_all(
            &key(),
            vec![FileResource::unclosed(1, SpaceKind::Sequence, 1)],
            true,
        )
        .unwrap();
    manager
        .add_all(
            &key(),
            vec![FileResource::new(10, SpaceKind::Unsequence, 10).with_device("root.sg.d1", 40, 60)],
            false,
        )
        .unwrap();

    manager.record_write(&key(), 1, "root.sg.d1", 10).unwrap();
    manager.record_write(&key(), 1, "root.sg.d1", 90).unwrap();

    let config = CrossCompactionConfig::default();
    let selector = RewriteCrossSpaceSelector::new("root.sg", 3, config.clone(), &manager);
    assert!(selector.select().unwrap().is_empty());

    let mut ends = BTreeMap::new();
    ends.insert("root.sg.d1".to_string(), 100);
    let sealed = manager.seal(&key(), 1, &ends).unwrap();
    assert_eq!(sealed.status(), FileStatus::Closed);

    let selector = RewriteCrossSpaceSelector::new("root.sg", 3, config, &manager);
    let candidates = selector.select().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].file_ids(), vec![1, 10]);
}

#[test]
fn test_persist_and_recover() {
    let temp_dir = TempDir::new().unwrap();
    let layout = SpaceLayout::new(temp_dir.path());
    let manager = populated_manager();
    manager
        .add_all(
            &key(),
            vec![FileResource::unclosed(3, SpaceKind::Sequence, 3).with_open_device("root.sg.d2", 500)],
            true,
        )
        .unwrap();

    let candidates = select_and_claim(&manager, &key(), &CrossCompactionConfig::default()).unwrap();
    manager.start_compaction(&key(), &candidates[0]).unwrap();
    for id in [1, 2, 3, 10] {
        manager.persist(&layout, &key(), id).unwrap();
    }

    let recovered = FileSpaceManager::recover(&layout).unwrap();
    assert_eq!(recovered.partitions(), vec![key()]);

    let snapshot = recovered.snapshot(&key());
    let seq: Vec<(u64, FileStatus)> = snapshot
        .seq_files()
        .iter()
        .map(|file| (file.id(), file.status()))
        .collect();
    assert_eq!(
        seq,
        vec![
            (1, FileStatus::Closed),
            (2, FileStatus::Closed),
            (3, FileStatus::Unclosed),
        ]
    );
    assert_eq!(snapshot.unseq_files()[0].status(), FileStatus::Closed);
    assert_eq!(
        recovered.get(&key(), 3).unwrap().device_range("root.sg.d2").unwrap().end(),
        None
    );
}

#[test]
fn test_recover_skips_deleted_resources() {
    let temp_dir = TempDir::new().unwrap();
    let layout = SpaceLayout::new(temp_dir.path());
    let deleted = FileResource::new(7, SpaceKind::Unsequence, 7)
        .with_device("root.sg.d1", 0, 1)
        .with_status(FileStatus::Deleted);

    let dir = layout.partition_dir(SpaceKind::Unsequence, &key());
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(TsFileName::of(&deleted).resource_file_name());
    write_resource(&path, &deleted).unwrap();
    assert_eq!(read_resource(&path).unwrap().status(), FileStatus::Deleted);

    let recovered = FileSpaceManager::recover(&layout).unwrap();
    assert!(recovered.snapshot(&key()).is_empty());
}

#[test]
fn test_recover_rejects_misplaced_resource() {
    let temp_dir = TempDir::new().unwrap();
    let layout = SpaceLayout::new(temp_dir.path());
    let seq = FileResource::new(4, SpaceKind::Sequence, 4).with_device("root.sg.d1", 0, 1);

    let dir = layout.partition_dir(SpaceKind::Unsequence, &key());
    std::fs::create_dir_all(&dir).unwrap();
    write_resource(&dir.join(TsFileName::of(&seq).resource_file_name()), &seq).unwrap();

    assert!(matches!(
        FileSpaceManager::recover(&layout),
        Err(SpaceError::Corrupted(_))
    ));
}

#[test]
fn test_bad_seal_keeps_file_unclosed_and_partition_selectable() {
    let manager = FileSpaceManager::new();
    manager
        .add_all(
            &key(),
            vec![FileResource::unclosed(1, SpaceKind::Sequence, 1).with_open_device("root.sg.d1", 500)],
            true,
        )
        .unwrap();
    manager
        .add_all(
            &key(),
            vec![FileResource::new(10, SpaceKind::Unsequence, 10).with_device("root.sg.d1", 550, 560)],
            false,
        )
        .unwrap();

    let mut ends = BTreeMap::new();
    ends.insert("root.sg.d1".to_string(), 100);
    assert!(matches!(
        manager.seal(&key(), 1, &ends),
        Err(SpaceError::InvariantViolation {
            file_id: 1,
            kind: InvariantKind::InvertedRange { start: 500, end: 100, .. },
        })
    ));
    assert_eq!(manager.get(&key(), 1).unwrap().status(), FileStatus::Unclosed);

    let config = CrossCompactionConfig::default();
    let selector = RewriteCrossSpaceSelector::new("root.sg", 3, config.clone(), &manager);
    assert!(selector.select().unwrap().is_empty());

    ends.insert("root.sg.d1".to_string(), 600);
    manager.seal(&key(), 1, &ends).unwrap();
    let selector = RewriteCrossSpaceSelector::new("root.sg", 3, config, &manager);
    assert_eq!(selector.select().unwrap()[0].file_ids(), vec![1, 10]);
}

#[test]
fn test_seal_cannot_drop_recorded_points() {
    let manager = FileSpaceManager::new();
    manager
        .add_all(&key(), vec![FileResource::unclosed(1, SpaceKind::Sequence, 1)], true)
        .unwrap();
    manager.record_write(&key(), 1, "root.sg.d1", 10).unwrap();
    manager.record_write(&key(), 1, "root.sg.d1", 900).unwrap();

    let mut ends = BTreeMap::new();
    ends.insert("root.sg.d1".to_string(), 50);
    assert!(matches!(
        manager.seal(&key(), 1, &ends),
        Err(SpaceError::InvariantViolation {
            kind: InvariantKind::EndBeforeLastWrite { last_write: 900, end: 50, .. },
            ..
        })
    ));
    assert_eq!(
        manager.get(&key(), 1).unwrap().device_range("root.sg.d1"),
        Some(&DeviceTimeRange::open_until(10, 900))
    );

    ends.insert("root.sg.d1".to_string(), 900);
    let sealed = manager.seal(&key(), 1, &ends).unwrap();
    assert_eq!(sealed.device_range("root.sg.d1"), Some(&DeviceTimeRange::closed(10, 900)));
}

#[test]
fn test_recover_after_finished_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let layout = SpaceLayout::new(temp_dir.path());
    let manager = populated_manager();
    for id in [1, 2, 10] {
        manager.persist(&layout, &key(), id).unwrap();
    }

    let candidates = select_and_claim(&manager, &key(), &CrossCompactionConfig::default()).unwrap();
    manager.start_compaction(&key(), &candidates[0]).unwrap();
    let merged = FileResource::new(20, SpaceKind::Sequence, 3)
        .with_device("root.sg.d1", 0, 300)
        .with_size(2400)
        .with_levels(0, 1);
    let removed = manager
        .finish_and_persist(&layout, &key(), &candidates[0], vec![merged])
        .unwrap();
    assert_eq!(removed.len(), 3);

    for file in &removed {
        let on_disk = read_resource(&layout.resource_path(&key(), file)).unwrap();
        assert_eq!(on_disk.status(), FileStatus::Deleted);
    }

    let recovered = FileSpaceManager::recover(&layout).unwrap();
    let snapshot = recovered.snapshot(&key());
    let seq: Vec<(u64, FileStatus)> = snapshot
        .seq_files()
        .iter()
        .map(|file| (file.id(), file.status()))
        .collect();
    assert_eq!(seq, vec![(20, FileStatus::Closed)]);
    assert!(snapshot.unseq_files().is_empty());
}

#[test]
fn test_recover_skips_file_deleted_out_of_band() {
    let temp_dir = TempDir::new().unwrap();
    let layout = SpaceLayout::new(temp_dir.path());
    let manager = populated_manager();
    manager.persist(&layout, &key(), 2).unwrap();
    manager.persist(&layout, &key(), 10).unwrap();

    let deleted = manager.delete(&key(), 10).unwrap();
    FileSpaceManager::persist_deleted(&layout, &key(), &deleted).unwrap();

    let live = manager.get(&key(), 2).unwrap();
    assert!(matches!(
        FileSpaceManager::persist_deleted(&layout, &key(), &live),
        Err(SpaceError::IllegalTransition { file_id: 2, .. })
    ));

    let recovered = FileSpaceManager::recover(&layout).unwrap();
    let snapshot = recovered.snapshot(&key());
    assert_eq!(snapshot.seq_files().len(), 1);
    assert!(snapshot.unseq_files().is_empty());
}
