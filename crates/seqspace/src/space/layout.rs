//! On-disk layout of data files and their resource sidecars.
//!
//! ```text
//! {data_dir}/
//!   sequence/{storage_group}/{time_partition}/{ordering_key}-{file_id}-{inner}-{cross}.tsfile.resource
//!   unsequence/{storage_group}/{time_partition}/...
//! ```

use crate::error::Result;
use crate::resource::{FileId, FileResource, SpaceKind, Timestamp};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Data file extension.
pub const DATA_FILE_SUFFIX: &str = ".tsfile";

/// Resource sidecar extension, appended to the data file name.
pub const RESOURCE_FILE_SUFFIX: &str = ".tsfile.resource";

/// Identifies one (storage group, time partition) pair.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::space::PartitionKey;
///
/// let key = PartitionKey::for_timestamp("root.sg", -1, 604_800_000);
/// assert_eq!(key.time_partition, -1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    /// Storage group (database) name.
    pub storage_group: String,
    /// Time partition index.
    pub time_partition: i64,
}

impl PartitionKey {
    /// Creates a new key.
    pub fn new(storage_group: impl Into<String>, time_partition: i64) -> Self {
        Self {
            storage_group: storage_group.into(),
            time_partition,
        }
    }

    /// Returns the key of the partition holding `timestamp` for a partition
    /// interval of `interval` time units. Pre-epoch timestamps floor towards
    /// negative partitions.
    pub fn for_timestamp(storage_group: impl Into<String>, timestamp: Timestamp, interval: i64) -> Self {
        Self::new(storage_group, div_floor(timestamp, interval.max(1)))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.storage_group, self.time_partition)
    }
}

/// Information parsed from a data file name.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::space::TsFileName;
///
/// let name = TsFileName::new(12, 3, 1, 0);
/// assert_eq!(name.file_name(), "12-3-1-0.tsfile");
/// assert_eq!(TsFileName::parse_file_name("12-3-1-0.tsfile.resource"), Some(name));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsFileName {
    /// Generation used to order sequence files.
    pub ordering_key: u64,
    /// File id.
    pub file_id: FileId,
    /// Inner-space compaction level.
    pub inner_level: u32,
    /// Cross-space compaction level.
    pub cross_level: u32,
}

impl TsFileName {
    /// Creates a new name.
    pub fn new(ordering_key: u64, file_id: FileId, inner_level: u32, cross_level: u32) -> Self {
        Self {
            ordering_key,
            file_id,
            inner_level,
            cross_level,
        }
    }

    /// Builds the name of a resource's data file.
    pub fn of(resource: &FileResource) -> Self {
        Self::new(
            resource.ordering_key(),
            resource.id(),
            resource.inner_level(),
            resource.cross_level(),
        )
    }

    /// Builds the data file name `{ordering_key}-{file_id}-{inner}-{cross}.tsfile`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}{}",
            self.ordering_key, self.file_id, self.inner_level, self.cross_level, DATA_FILE_SUFFIX
        )
    }

    /// Builds the resource sidecar file name.
    pub fn resource_file_name(&self) -> String {
        format!("{}.resource", self.file_name())
    }

    /// Parses a data file or resource sidecar name.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name
            .strip_suffix(RESOURCE_FILE_SUFFIX)
            .or_else(|| name.strip_suffix(DATA_FILE_SUFFIX))?;
        let mut parts = stem.split('-');
        let ordering_key = parts.next()?.parse::<u64>().ok()?;
        let file_id = parts.next()?.parse::<FileId>().ok()?;
        let inner_level = parts.next()?.parse::<u32>().ok()?;
        let cross_level = parts.next()?.parse::<u32>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(ordering_key, file_id, inner_level, cross_level))
    }
}

/// Provides filesystem paths for partitions and resource sidecars.
///
/// # Examples
/// ```rust
/// use alopex_seqspace::resource::SpaceKind;
/// use alopex_seqspace::space::{PartitionKey, SpaceLayout};
/// use std::path::PathBuf;
///
/// let layout = SpaceLayout::new("/data");
/// let key = PartitionKey::new("root.sg", 0);
/// assert_eq!(
///     layout.partition_dir(SpaceKind::Unsequence, &key),
///     PathBuf::from("/data/unsequence/root.sg/0")
/// );
/// ```
#[derive(Debug, Clone)]
pub struct SpaceLayout {
    data_dir: PathBuf,
}

impl SpaceLayout {
    /// Creates a layout rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the root data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the directory of one partition in one space.
    pub fn partition_dir(&self, space: SpaceKind, key: &PartitionKey) -> PathBuf {
        self.data_dir
            .join(space.dir_name())
            .join(&key.storage_group)
            .join(key.time_partition.to_string())
    }

    /// Returns the sidecar path of a resource.
    pub fn resource_path(&self, key: &PartitionKey, resource: &FileResource) -> PathBuf {
        self.partition_dir(resource.space(), key)
            .join(TsFileName::of(resource).resource_file_name())
    }

    /// Lists every partition that has a directory in either space.
    pub fn list_partitions(&self) -> Result<Vec<PartitionKey>> {
        let mut keys = BTreeSet::new();
        for space in [SpaceKind::Sequence, SpaceKind::Unsequence] {
            for storage_group in list_dirs(&self.data_dir.join(space.dir_name()))? {
                let Some(group_name) = dir_name(&storage_group) else {
                    continue;
                };
                for partition_dir in list_dirs(&storage_group)? {
                    let partition = dir_name(&partition_dir).and_then(|name| name.parse::<i64>().ok());
                    if let Some(time_partition) = partition {
                        keys.insert(PartitionKey::new(group_name.clone(), time_partition));
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Lists resource sidecars of one partition, ordered by ordering key.
    /// Files with foreign names and leftover temp files are ignored.
    pub fn list_resources(&self, space: SpaceKind, key: &PartitionKey) -> Result<Vec<(TsFileName, PathBuf)>> {
        let dir = self.partition_dir(space, key);
        let mut files = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) if name.ends_with(RESOURCE_FILE_SUFFIX) => name,
                _ => continue,
            };
            if let Some(name) = TsFileName::parse_file_name(file_name) {
                files.push((name, path));
            }
        }

        files.sort_by_key(|(name, _)| (name.ordering_key, name.file_id));
        Ok(files)
    }
}

fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn div_floor(value: i64, divisor: i64) -> i64 {
    let mut quotient = value / divisor;
    if value % divisor < 0 {
        quotient -= 1;
    }
    quotient
}
