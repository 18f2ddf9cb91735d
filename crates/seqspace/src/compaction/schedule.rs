//! Selection rounds: snapshot, select and claim across partitions.

use crate::compaction::{CompactionCandidate, CrossCompactionConfig, RewriteCrossSpaceSelector};
use crate::error::{Result, SpaceError};
use crate::space::{FileSpaceManager, PartitionKey};
use std::thread;
use tracing::{debug, error, warn};

/// Outcome of one selection round over all partitions.
#[derive(Debug, Default)]
pub struct SelectionRound {
    /// Claimed candidates per partition, in partition order.
    pub claimed: Vec<(PartitionKey, Vec<CompactionCandidate>)>,
    /// Partitions whose snapshot went stale; retried on the next round.
    pub retry: Vec<PartitionKey>,
    /// Partitions skipped because of malformed metadata.
    pub failed: Vec<PartitionKey>,
}

impl SelectionRound {
    /// Total number of claimed candidates.
    pub fn candidate_count(&self) -> usize {
        self.claimed.iter().map(|(_, candidates)| candidates.len()).sum()
    }
}

/// Selects candidates for one partition and claims them.
///
/// Claims are all-or-nothing: if any candidate cannot be claimed, the ones
/// already claimed are released and the error is returned.
pub fn select_and_claim(
    manager: &FileSpaceManager,
    key: &PartitionKey,
    config: &CrossCompactionConfig,
) -> Result<Vec<CompactionCandidate>> {
    let selector = RewriteCrossSpaceSelector::new(
        key.storage_group.clone(),
        key.time_partition,
        config.clone(),
        manager,
    );
    let candidates = selector.select()?;

    for (claimed, candidate) in candidates.iter().enumerate() {
        if let Err(err) = manager.claim(key, candidate) {
            for earlier in &candidates[..claimed] {
                if let Err(release_err) = manager.release(key, earlier) {
                    warn!(
                        "Failed to release candidate in partition {}: {:?}",
                        key, release_err
                    );
                }
            }
            return Err(err);
        }
    }

    Ok(candidates)
}

/// Runs one selection round over every partition of the manager.
///
/// Partitions are independent and selected on scoped threads, at most
/// `config.selection_threads` at a time. A stale snapshot is logged at
/// `warn` and the partition retried next round; malformed metadata is
/// logged at `error` and the partition skipped.
pub fn run_selection_round(manager: &FileSpaceManager, config: &CrossCompactionConfig) -> SelectionRound {
    let keys = manager.partitions();
    let threads = config.selection_threads.max(1);

    let mut results: Vec<(PartitionKey, Option<Result<Vec<CompactionCandidate>>>)> =
        Vec::with_capacity(keys.len());
    for chunk in keys.chunks(threads) {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|key| (key, scope.spawn(move || select_and_claim(manager, key, config))))
                .collect();

            for (key, handle) in handles {
                results.push((key.clone(), handle.join().ok()));
            }
        });
    }

    let mut round = SelectionRound::default();
    for (key, result) in results {
        match result {
            Some(Ok(candidates)) if candidates.is_empty() => {
                debug!("No cross-space candidates in partition {}", key);
            }
            Some(Ok(candidates)) => {
                debug!("Claimed {} cross-space candidates in partition {}", candidates.len(), key);
                round.claimed.push((key, candidates));
            }
            Some(Err(err @ SpaceError::ConcurrentModification { .. })) => {
                warn!("Cross-space selection in partition {} raced with a writer: {}", key, err);
                round.retry.push(key);
            }
            Some(Err(err)) => {
                error!("Cross-space selection failed for partition {}: {:?}", key, err);
                round.failed.push(key);
            }
            None => {
                error!("Cross-space selection panicked for partition {}", key);
                round.failed.push(key);
            }
        }
    }
    round
}
