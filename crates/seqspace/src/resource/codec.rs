//! Resource sidecar format.
//!
//! Every data file has a small `.resource` sidecar holding its metadata so
//! the file space can be rebuilt on startup without opening the data files.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header (44 bytes)                                           │
//! │  - Magic: "SRES" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 1                                │
//! │  - Space: u8, Status: u8                                     │
//! │  - File id: u64, Ordering key: u64, Size: u64                │
//! │  - Inner level: u32, Cross level: u32                        │
//! │  - Device count: u32                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Device entries (repeated)                                   │
//! │  - Name length: u16, Name: UTF-8 bytes                       │
//! │  - Kind: u8 (0 = closed, 1 = open)                           │
//! │  - Start: i64, End: i64 (last write when open)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer (8 bytes)                                            │
//! │  - CRC32 of everything above (4 bytes)                       │
//! │  - Reverse magic: "SERS" (4 bytes)                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use crate::error::{InvariantKind, Result, SpaceError};
use crate::resource::{DeviceTimeRange, FileResource, FileStatus, SpaceKind};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Magic bytes for the resource header: "SRES"
pub const RESOURCE_MAGIC: [u8; 4] = *b"SRES";

/// Reverse magic bytes for the resource footer: "SERS"
pub const RESOURCE_MAGIC_REVERSE: [u8; 4] = *b"SERS";

/// Current resource format version.
pub const RESOURCE_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 44;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 8;

const DEVICE_CLOSED: u8 = 0;
const DEVICE_OPEN: u8 = 1;

/// Encodes a resource into its sidecar representation.
///
/// # Errors
///
/// Returns `SpaceError::InvariantViolation` if a device name is longer than
/// `u16::MAX` bytes.
pub fn encode(resource: &FileResource) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + FOOTER_SIZE + resource.device_count() * 32);

    buf.extend_from_slice(&RESOURCE_MAGIC);
    buf.extend_from_slice(&RESOURCE_VERSION.to_le_bytes());
    buf.push(resource.space() as u8);
    buf.push(resource.status() as u8);
    buf.extend_from_slice(&resource.id().to_le_bytes());
    buf.extend_from_slice(&resource.ordering_key().to_le_bytes());
    buf.extend_from_slice(&resource.size().to_le_bytes());
    buf.extend_from_slice(&resource.inner_level().to_le_bytes());
    buf.extend_from_slice(&resource.cross_level().to_le_bytes());
    buf.extend_from_slice(&(resource.device_count() as u32).to_le_bytes());

    for (device, range) in resource.devices() {
        let name = device.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| {
            SpaceError::invariant(
                resource.id(),
                InvariantKind::DeviceNameTooLong { len: name.len() },
            )
        })?;
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name);
        match range {
            DeviceTimeRange::Closed(range) => {
                buf.push(DEVICE_CLOSED);
                buf.extend_from_slice(&range.start.to_le_bytes());
                buf.extend_from_slice(&range.end.to_le_bytes());
            }
            DeviceTimeRange::Open { start, last_write } => {
                buf.push(DEVICE_OPEN);
                buf.extend_from_slice(&start.to_le_bytes());
                buf.extend_from_slice(&last_write.to_le_bytes());
            }
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&RESOURCE_MAGIC_REVERSE);
    Ok(buf)
}

/// Decodes a resource from its sidecar representation.
///
/// # Errors
///
/// Returns `SpaceError::InvalidMagic`, `SpaceError::UnsupportedVersion` or
/// `SpaceError::ChecksumMismatch` for foreign or damaged input, and
/// `SpaceError::Corrupted` if the content cannot be parsed.
pub fn decode(bytes: &[u8]) -> Result<FileResource> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(SpaceError::Corrupted(format!(
            "resource too short: {} bytes",
            bytes.len()
        )));
    }

    let (body, footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let magic_reverse = array4(&footer[4..8]);
    if magic_reverse != RESOURCE_MAGIC_REVERSE {
        return Err(SpaceError::InvalidMagic(magic_reverse));
    }
    let expected = u32::from_le_bytes(array4(&footer[0..4]));
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(SpaceError::ChecksumMismatch { expected, actual });
    }

    let mut cursor = Cursor::new(body);
    let magic = array4(cursor.take(4)?);
    if magic != RESOURCE_MAGIC {
        return Err(SpaceError::InvalidMagic(magic));
    }
    let version = cursor.u16()?;
    if version != RESOURCE_VERSION {
        return Err(SpaceError::UnsupportedVersion(version));
    }

    let space_byte = cursor.u8()?;
    let space = SpaceKind::from_u8(space_byte)
        .ok_or_else(|| SpaceError::Corrupted(format!("unknown space {}", space_byte)))?;
    let status_byte = cursor.u8()?;
    let status = FileStatus::from_u8(status_byte)
        .ok_or_else(|| SpaceError::Corrupted(format!("unknown status {}", status_byte)))?;
    let file_id = cursor.u64()?;
    let ordering_key = cursor.u64()?;
    let size = cursor.u64()?;
    let inner_level = cursor.u32()?;
    let cross_level = cursor.u32()?;
    let device_count = cursor.u32()?;

    let mut resource = FileResource::new(file_id, space, ordering_key)
        .with_status(status)
        .with_size(size)
        .with_levels(inner_level, cross_level);

    for _ in 0..device_count {
        let name_len = cursor.u16()? as usize;
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|err| SpaceError::Corrupted(format!("device name: {}", err)))?
            .to_string();
        let kind = cursor.u8()?;
        let start = cursor.i64()?;
        let end = cursor.i64()?;
        resource = match kind {
            DEVICE_CLOSED => resource.with_device(name, start, end),
            DEVICE_OPEN => resource.with_device_range(name, DeviceTimeRange::open_until(start, end)),
            other => {
                return Err(SpaceError::Corrupted(format!(
                    "unknown device range kind {}",
                    other
                )))
            }
        };
    }

    if cursor.remaining() != 0 {
        return Err(SpaceError::Corrupted(format!(
            "{} trailing bytes",
            cursor.remaining()
        )));
    }

    Ok(resource)
}

/// Writes a resource sidecar using the atomic write pattern:
/// temp file, fsync, rename, fsync of the parent directory.
pub fn write_resource(path: &Path, resource: &FileResource) -> Result<()> {
    let bytes = encode(resource)?;
    let tmp_path = path.with_extension("resource.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

/// Reads and decodes a resource sidecar.
pub fn read_resource(path: &Path) -> Result<FileResource> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SpaceError::Corrupted(format!(
                "unexpected end of resource at offset {}",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let mut out = [0u8; 2];
        out.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(out))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(array4(self.take(4)?)))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(out))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(out))
    }
}
