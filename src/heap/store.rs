//! Heap Store
//!
//! Owns the backing file and its memory mapping; frames variable-length
//! records, grows the mapping by doubling when space runs out, and exposes
//! offset-addressed write/read/delete.
//!
//! ## Growth discipline
//!
//! The mapped base address may change on every growth event, so no raw
//! address is ever retained across an operation boundary. The mapping
//! lives behind a `RwLock` and every access recomputes addresses from the
//! current base; only offsets are stored or handed out.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;

use crate::error::{MapStoreError, Result};

use super::{FileHeader, FLAG_DELETED, FRAME_HEADER_SIZE, HEADER_SIZE};

/// The current mapping and its length. Replaced wholesale on growth.
struct Mapping {
    mmap: MmapMut,
    len: u64,
}

/// Append-only, offset-addressed record heap over a growable mapping
///
/// ## Concurrency:
/// - `mapping`: RwLock — shared for reads, exclusive for append/delete/grow
/// - All methods take `&self`; growth happens inside the write path
pub struct HeapStore {
    /// Backing file handle (kept open for `set_len` during growth)
    file: File,

    /// File path (diagnostics only)
    path: PathBuf,

    /// Current memory mapping, source of truth for all persisted bytes
    mapping: RwLock<Mapping>,
}

impl HeapStore {
    /// Open or create the backing file at `path`
    ///
    /// A new file is sized to `initial_size` (at least one header) and gets
    /// an initialized header. An existing file is mapped as-is and its
    /// header validated — magic mismatch fails with `CorruptFormat`.
    pub fn open(path: &Path, initial_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| MapStoreError::OpenFailure(format!("{}: {}", path.display(), e)))?;

        let file_len = file
            .metadata()
            .map_err(|e| MapStoreError::OpenFailure(format!("{}: {}", path.display(), e)))?
            .len();
        let is_new = file_len == 0;

        let map_len = if is_new {
            let len = initial_size.max(HEADER_SIZE);
            file.set_len(len)
                .map_err(|e| MapStoreError::OpenFailure(format!("cannot size file: {}", e)))?;
            len
        } else {
            if file_len < HEADER_SIZE {
                return Err(MapStoreError::CorruptFormat(format!(
                    "file too small for header: {} bytes",
                    file_len
                )));
            }
            file_len
        };

        let mut mmap = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| MapStoreError::MapFailure(e.to_string()))?;

        if is_new {
            FileHeader::new(map_len).encode(&mut mmap[..HEADER_SIZE as usize]);
            tracing::debug!(path = %path.display(), size = map_len, "created database file");
        } else {
            FileHeader::decode(&mmap[..HEADER_SIZE as usize])?;
            tracing::debug!(path = %path.display(), size = map_len, "opened database file");
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mapping: RwLock::new(Mapping {
                mmap,
                len: map_len,
            }),
        })
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Append a record frame, returning its permanent offset
    ///
    /// Frame layout: [Size: u32][Flags: u32][Next: u64][CRC: u32][payload].
    /// `Next` links to the byte just past this frame. Grows the mapping
    /// first when the frame does not fit.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let frame_size = FRAME_HEADER_SIZE + payload.len() as u64;

        let mut m = self.mapping.write();
        let offset = FileHeader::read_data_start(&m.mmap);

        let required = offset + frame_size;
        if required > m.len {
            self.grow_locked(&mut m, required)?;
        }

        let crc = crc32fast::hash(payload);
        let next = offset + frame_size;

        let base = offset as usize;
        m.mmap[base..base + 4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        m.mmap[base + 4..base + 8].copy_from_slice(&0u32.to_le_bytes());
        m.mmap[base + 8..base + 16].copy_from_slice(&next.to_le_bytes());
        m.mmap[base + 16..base + 20].copy_from_slice(&crc.to_le_bytes());
        m.mmap[base + 20..base + 20 + payload.len()].copy_from_slice(payload);

        FileHeader::write_data_start(&mut m.mmap, next);

        Ok(offset)
    }

    /// Read the payload at `offset` into `out`, returning its size
    ///
    /// Fails with `InvalidOffset` for offsets outside the written region,
    /// `Deleted` for tombstoned records, and `CorruptFormat` when the
    /// stored CRC does not match the payload bytes.
    pub fn read(&self, offset: u64, out: &mut Vec<u8>) -> Result<usize> {
        let m = self.mapping.read();
        let (payload_len, flags, crc) = Self::frame_at(&m, offset)?;

        if flags & FLAG_DELETED != 0 {
            return Err(MapStoreError::Deleted(offset));
        }

        let start = (offset + FRAME_HEADER_SIZE) as usize;
        let payload = &m.mmap[start..start + payload_len];
        if crc32fast::hash(payload) != crc {
            return Err(MapStoreError::CorruptFormat(format!(
                "payload CRC mismatch at offset {}",
                offset
            )));
        }

        out.clear();
        out.extend_from_slice(payload);
        Ok(payload_len)
    }

    /// Read the payload at `offset` into a fresh buffer
    pub fn read_alloc(&self, offset: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read(offset, &mut out)?;
        Ok(out)
    }

    /// Mark the record at `offset` deleted (tombstone)
    ///
    /// Returns `false` for an invalid offset or an already-deleted record;
    /// a second delete reports failure, not success.
    pub fn delete(&self, offset: u64) -> bool {
        let mut m = self.mapping.write();
        let (_, flags, _) = match Self::frame_at(&m, offset) {
            Ok(frame) => frame,
            Err(_) => return false,
        };

        if flags & FLAG_DELETED != 0 {
            return false;
        }

        let base = (offset + 4) as usize;
        m.mmap[base..base + 4].copy_from_slice(&(flags | FLAG_DELETED).to_le_bytes());
        true
    }

    // =========================================================================
    // Raw Region Access (index nodes)
    // =========================================================================

    /// Allocate `size` raw bytes from the append path, returning the offset
    ///
    /// Used for index nodes, which share the record heap's offset space and
    /// are likewise never freed. The region starts zeroed.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        let mut m = self.mapping.write();
        let offset = FileHeader::read_data_start(&m.mmap);

        let required = offset + size;
        if required > m.len {
            self.grow_locked(&mut m, required)?;
        }

        // A cached page may have scribbled past the old data_start; the
        // zeroed-region contract holds regardless.
        m.mmap[offset as usize..required as usize].fill(0);

        FileHeader::write_data_start(&mut m.mmap, required);
        Ok(offset)
    }

    /// Copy an already-allocated region into `out`
    pub fn read_raw(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let m = self.mapping.read();
        let end = offset
            .checked_add(out.len() as u64)
            .ok_or(MapStoreError::InvalidOffset(offset))?;
        if offset < HEADER_SIZE || end > FileHeader::read_data_start(&m.mmap) {
            return Err(MapStoreError::InvalidOffset(offset));
        }

        out.copy_from_slice(&m.mmap[offset as usize..end as usize]);
        Ok(())
    }

    /// Overwrite an already-allocated region
    pub fn write_raw(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut m = self.mapping.write();
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(MapStoreError::InvalidOffset(offset))?;
        if offset < HEADER_SIZE || end > FileHeader::read_data_start(&m.mmap) {
            return Err(MapStoreError::InvalidOffset(offset));
        }

        m.mmap[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Write back page bytes from a cached copy, clamped to the mapped
    /// length. Unlike `write_raw`, the region may straddle `data_start`:
    /// a cached page can cover bytes not yet allocated.
    ///
    /// The header is never written from a cached copy. `data_start` and
    /// `root` advance in the live header while a copy of page 0 sits in
    /// the cache, so replaying its first bytes would revert them.
    pub(crate) fn write_region(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut m = self.mapping.write();

        let skip = HEADER_SIZE.saturating_sub(offset).min(data.len() as u64);
        let offset = offset + skip;
        let data = &data[skip as usize..];
        if offset >= m.len || data.is_empty() {
            return Ok(());
        }

        let avail = ((m.len - offset) as usize).min(data.len());
        m.mmap[offset as usize..offset as usize + avail].copy_from_slice(&data[..avail]);
        Ok(())
    }

    /// Copy a region into `buf`, zero-filling past the end of the mapping
    ///
    /// Used by the page cache to load page-sized slices; the trailing page
    /// may extend past the mapped length.
    pub fn copy_region(&self, offset: u64, buf: &mut [u8]) -> usize {
        let m = self.mapping.read();
        if offset >= m.len {
            buf.fill(0);
            return 0;
        }

        let avail = ((m.len - offset) as usize).min(buf.len());
        buf[..avail].copy_from_slice(&m.mmap[offset as usize..offset as usize + avail]);
        buf[avail..].fill(0);
        avail
    }

    // =========================================================================
    // Header Accessors
    // =========================================================================

    /// Current next-free-append position
    pub fn data_start(&self) -> u64 {
        FileHeader::read_data_start(&self.mapping.read().mmap)
    }

    /// Persisted B+tree root offset (NULL_OFFSET when unset)
    pub fn root(&self) -> u64 {
        FileHeader::read_root(&self.mapping.read().mmap)
    }

    /// Persist a new B+tree root offset
    ///
    /// Root changes are the only path that rewrites the recorded root and
    /// must survive a crash, so the header range is synced immediately.
    pub fn set_root(&self, root: u64) -> Result<()> {
        let mut m = self.mapping.write();
        FileHeader::write_root(&mut m.mmap, root);
        m.mmap.flush_range(0, HEADER_SIZE as usize)?;
        Ok(())
    }

    /// Current mapped length in bytes
    pub fn mapped_len(&self) -> u64 {
        self.mapping.read().len
    }

    /// File path of this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Blocking sync of the whole mapping to the backing file
    pub fn sync_all(&self) -> Result<()> {
        self.mapping.read().mmap.flush()?;
        Ok(())
    }

    /// Non-blocking sync of a byte range (clamped to the mapped length)
    pub fn sync_range_async(&self, offset: u64, len: u64) -> Result<()> {
        let m = self.mapping.read();
        if offset >= m.len {
            return Ok(());
        }
        let len = len.min(m.len - offset);
        m.mmap.flush_async_range(offset as usize, len as usize)?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Parse the frame header at `offset`, bounds-checked against the
    /// written region. Returns (payload_len, flags, crc).
    fn frame_at(m: &Mapping, offset: u64) -> Result<(usize, u32, u32)> {
        let data_start = FileHeader::read_data_start(&m.mmap);
        let header_end = offset
            .checked_add(FRAME_HEADER_SIZE)
            .ok_or(MapStoreError::InvalidOffset(offset))?;
        if offset < HEADER_SIZE || header_end > data_start {
            return Err(MapStoreError::InvalidOffset(offset));
        }

        let (payload_len, flags, crc) = parse_frame(&m.mmap[offset as usize..]);

        // An offset pointing into an index node or mid-frame parses as
        // garbage; the frame-bounds check rejects most of those.
        let frame_end = header_end
            .checked_add(payload_len as u64)
            .ok_or(MapStoreError::InvalidOffset(offset))?;
        if frame_end > data_start {
            return Err(MapStoreError::InvalidOffset(offset));
        }

        Ok((payload_len, flags, crc))
    }

    /// Grow the mapping to cover `required` bytes by repeated doubling
    ///
    /// Extends the file, then re-establishes the mapping. The old base
    /// address is dead after this returns; callers hold the write lock and
    /// recompute all addresses from the new base.
    fn grow_locked(&self, m: &mut Mapping, required: u64) -> Result<()> {
        let mut new_len = m.len;
        while new_len < required {
            new_len = new_len.checked_mul(2).ok_or_else(|| {
                MapStoreError::GrowthFailure(format!("size overflow growing to {}", required))
            })?;
        }

        // Flush before dropping the old mapping so no written bytes are
        // lost if the remap fails partway.
        m.mmap
            .flush()
            .map_err(|e| MapStoreError::GrowthFailure(format!("pre-grow flush: {}", e)))?;

        self.file
            .set_len(new_len)
            .map_err(|e| MapStoreError::GrowthFailure(format!("cannot extend file: {}", e)))?;

        let new_mmap = unsafe { MmapOptions::new().map_mut(&self.file) }
            .map_err(|e| MapStoreError::GrowthFailure(format!("cannot remap: {}", e)))?;

        m.mmap = new_mmap;
        m.len = new_len;
        FileHeader::write_total_size(&mut m.mmap, new_len);

        tracing::debug!(path = %self.path.display(), size = new_len, "grew mapping");
        Ok(())
    }
}

/// Parse a frame header from a slice beginning at the frame start.
/// Returns (payload_len, flags, crc). Bounds checking is the caller's job.
pub(crate) fn parse_frame(bytes: &[u8]) -> (usize, u32, u32) {
    let payload_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let flags = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let crc = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    (payload_len, flags, crc)
}
