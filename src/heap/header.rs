//! File header encode/decode
//!
//! The 32-byte header at offset 0 of every database file. All integers are
//! little-endian.

use crate::error::{MapStoreError, Result};

use super::{FORMAT_VERSION, HEADER_SIZE, MAGIC};

// Field offsets within the header
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_TOTAL_SIZE: usize = 8;
const OFF_DATA_START: usize = 16;
const OFF_ROOT: usize = 24;

/// In-memory view of the on-disk file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version
    pub version: u32,
    /// Total mapped size recorded at the last growth event
    pub total_size: u64,
    /// Next free append position (monotonically non-decreasing)
    pub data_start: u64,
    /// Offset of the B+tree root node (NULL_OFFSET until initialized)
    pub root: u64,
}

impl FileHeader {
    /// Header for a freshly created file of the given size
    pub fn new(total_size: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            total_size,
            data_start: HEADER_SIZE,
            root: super::NULL_OFFSET,
        }
    }

    /// Serialize the header into the first `HEADER_SIZE` bytes of `buf`
    pub fn encode(&self, buf: &mut [u8]) {
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(MAGIC);
        buf[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version.to_le_bytes());
        buf[OFF_TOTAL_SIZE..OFF_TOTAL_SIZE + 8].copy_from_slice(&self.total_size.to_le_bytes());
        buf[OFF_DATA_START..OFF_DATA_START + 8].copy_from_slice(&self.data_start.to_le_bytes());
        buf[OFF_ROOT..OFF_ROOT + 8].copy_from_slice(&self.root.to_le_bytes());
    }

    /// Parse and validate a header from the start of the mapping
    ///
    /// Fails with `CorruptFormat` on a magic or version mismatch.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(MapStoreError::CorruptFormat(format!(
                "file too small for header: {} bytes",
                buf.len()
            )));
        }

        if &buf[OFF_MAGIC..OFF_MAGIC + 4] != MAGIC {
            return Err(MapStoreError::CorruptFormat(format!(
                "invalid magic: expected MSTR, got {:?}",
                &buf[OFF_MAGIC..OFF_MAGIC + 4]
            )));
        }

        let version = u32::from_le_bytes(buf[OFF_VERSION..OFF_VERSION + 4].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(MapStoreError::CorruptFormat(format!(
                "unsupported format version: {}",
                version
            )));
        }

        let total_size =
            u64::from_le_bytes(buf[OFF_TOTAL_SIZE..OFF_TOTAL_SIZE + 8].try_into().unwrap());
        let data_start =
            u64::from_le_bytes(buf[OFF_DATA_START..OFF_DATA_START + 8].try_into().unwrap());
        let root = u64::from_le_bytes(buf[OFF_ROOT..OFF_ROOT + 8].try_into().unwrap());

        if data_start < HEADER_SIZE || data_start > total_size {
            return Err(MapStoreError::CorruptFormat(format!(
                "data_start {} outside [{}, {}]",
                data_start, HEADER_SIZE, total_size
            )));
        }

        Ok(Self {
            version,
            total_size,
            data_start,
            root,
        })
    }

    /// Write just the `data_start` field into the mapped header bytes
    pub fn write_data_start(buf: &mut [u8], data_start: u64) {
        buf[OFF_DATA_START..OFF_DATA_START + 8].copy_from_slice(&data_start.to_le_bytes());
    }

    /// Write just the `total_size` field into the mapped header bytes
    pub fn write_total_size(buf: &mut [u8], total_size: u64) {
        buf[OFF_TOTAL_SIZE..OFF_TOTAL_SIZE + 8].copy_from_slice(&total_size.to_le_bytes());
    }

    /// Write just the `root` field into the mapped header bytes
    pub fn write_root(buf: &mut [u8], root: u64) {
        buf[OFF_ROOT..OFF_ROOT + 8].copy_from_slice(&root.to_le_bytes());
    }

    /// Read the `data_start` field from the mapped header bytes
    pub fn read_data_start(buf: &[u8]) -> u64 {
        u64::from_le_bytes(buf[OFF_DATA_START..OFF_DATA_START + 8].try_into().unwrap())
    }

    /// Read the `root` field from the mapped header bytes
    pub fn read_root(buf: &[u8]) -> u64 {
        u64::from_le_bytes(buf[OFF_ROOT..OFF_ROOT + 8].try_into().unwrap())
    }
}
