//! Page Cache & Write Buffer
//!
//! Caches page-sized copies of the mapping with strict LRU eviction, and
//! buffers the durability work for appended records: each write lands in
//! the mapping immediately but is only synced to stable storage by a
//! batched flush — triggered by a pending-count threshold or by the
//! background flush cycle.
//!
//! ## Responsibilities
//! - Serve reads from resident pages, falling through to the mapping
//! - Evict the least-recently-accessed page at capacity (write back dirty)
//! - Record pending write ranges and sync them in batches
//! - Run the background flush cycle; drain everything at shutdown

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{MapStoreError, Result};
use crate::heap::{parse_frame, HeapStore, FLAG_DELETED, FRAME_HEADER_SIZE};

use super::{Page, PAGE_SIZE};

/// A written range awaiting its durability sync
#[derive(Debug, Clone, Copy)]
pub struct PendingWrite {
    /// Frame offset in the heap
    pub offset: u64,
    /// Frame size in bytes (header + payload)
    pub size: u64,
}

/// Handle to the background flush thread
struct Flusher {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Page cache and write buffer over a Heap Store
///
/// ## Concurrency:
/// - `pages`: Mutex'd map, page-number → resident page
/// - `pending`: Mutex'd list of un-synced write ranges
/// - each `Page` carries its own data lock
///
/// Lock order is always map → page data; the only path holding both is
/// the eviction write-back, and no path acquires them in reverse.
pub struct PageCache {
    /// The heap this cache wraps
    heap: Arc<HeapStore>,

    /// Resident pages by page number
    pages: Mutex<HashMap<u64, Arc<Page>>>,

    /// Writes whose durability sync has not happened yet
    pending: Mutex<Vec<PendingWrite>>,

    /// Max resident pages before eviction
    capacity: usize,

    /// Pending-list length that triggers an early flush
    batch_threshold: usize,

    /// Monotonic access clock for LRU stamps
    clock: std::sync::atomic::AtomicU64,

    /// Background flush thread, present while running
    flusher: Mutex<Option<Flusher>>,
}

impl PageCache {
    /// Create a cache over `heap`. The background flush cycle is not
    /// started here; call [`PageCache::start`] on the `Arc`.
    pub fn new(heap: Arc<HeapStore>, config: &Config) -> Self {
        Self {
            heap,
            pages: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            capacity: config.cache_capacity.max(1),
            batch_threshold: config.flush_batch_threshold.max(1),
            clock: std::sync::atomic::AtomicU64::new(0),
            flusher: Mutex::new(None),
        }
    }

    /// Start the background flush cycle
    ///
    /// The thread sleeps on a channel receive with timeout: a timeout means
    /// "flush now", a message (or a dropped sender) means "stop". Stopping
    /// is cooperative, checked once per cycle.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let cache = Arc::clone(self);

        let handle = std::thread::Builder::new()
            .name("mapstore-flush".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => cache.flush(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        *self.flusher.lock() = Some(Flusher { stop_tx, handle });
        Ok(())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append a record through the heap, buffering its durability sync
    ///
    /// The bytes land in the mapping immediately (reads see them); only the
    /// sync to stable storage is deferred.
    pub fn write(&self, data: &[u8]) -> Result<u64> {
        let offset = self.heap.append(data)?;
        let size = FRAME_HEADER_SIZE + data.len() as u64;

        self.invalidate_range(offset, size);

        let should_flush = {
            let mut pending = self.pending.lock();
            pending.push(PendingWrite { offset, size });
            pending.len() >= self.batch_threshold
        };

        if should_flush {
            self.flush();
        }

        Ok(offset)
    }

    /// Append several records under one critical section
    ///
    /// Offsets are returned in input order and are contiguous in the heap.
    pub fn batch_write(&self, records: &[&[u8]]) -> Result<Vec<u64>> {
        let mut offsets = Vec::with_capacity(records.len());
        let mut ranges = Vec::with_capacity(records.len());

        let should_flush = {
            let mut pending = self.pending.lock();
            for record in records {
                let offset = self.heap.append(record)?;
                let size = FRAME_HEADER_SIZE + record.len() as u64;
                pending.push(PendingWrite { offset, size });
                offsets.push(offset);
                ranges.push((offset, size));
            }
            pending.len() >= self.batch_threshold
        };

        for (offset, size) in ranges {
            self.invalidate_range(offset, size);
        }

        if should_flush {
            self.flush();
        }

        Ok(offsets)
    }

    /// Delete a record, dropping any resident copy of its page
    pub fn delete(&self, offset: u64) -> bool {
        let deleted = self.heap.delete(offset);
        if deleted {
            self.invalidate_range(offset, FRAME_HEADER_SIZE);
        }
        deleted
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read the payload at `offset` into `out`
    ///
    /// Served from the resident page under that page's lock when the whole
    /// frame fits inside it; otherwise falls through to the heap's direct
    /// read. Cache and mapping observe the same bytes: writes go directly
    /// through the mapping and invalidate overlapping resident copies.
    pub fn read(&self, offset: u64, out: &mut Vec<u8>) -> Result<usize> {
        let page_no = offset / PAGE_SIZE;
        let resident = self.pages.lock().get(&page_no).cloned();

        if let Some(page) = resident {
            page.touch(self.tick());
            if let Some(n) = self.read_from_page(&page, offset, out)? {
                return Ok(n);
            }
        }

        self.heap.read(offset, out)
    }

    /// Fetch the page containing byte offset `page_no * PAGE_SIZE`
    ///
    /// Resident pages are returned directly (access stamp updated). On a
    /// miss at capacity, the least-recently-accessed page is evicted —
    /// written back first if dirty — and a fresh copy is loaded from the
    /// mapping.
    pub fn get_page(&self, page_no: u64) -> Result<Arc<Page>> {
        let stamp = self.tick();

        if let Some(page) = self.pages.lock().get(&page_no).cloned() {
            page.touch(stamp);
            return Ok(page);
        }

        // Load outside the map lock
        let mut buf = vec![0u8; PAGE_SIZE as usize].into_boxed_slice();
        self.heap.copy_region(page_no * PAGE_SIZE, &mut buf);
        let fresh = Arc::new(Page::new(page_no, buf, stamp));

        let mut pages = self.pages.lock();

        if pages.len() >= self.capacity && !pages.contains_key(&page_no) {
            if let Some(victim_no) = Self::pick_victim(&pages) {
                // Write back before removing from the map: a concurrent
                // miss on the victim page must never load pre-write-back
                // bytes from the mapping
                if let Some(victim) = pages.get(&victim_no) {
                    if victim.is_dirty() {
                        self.write_back(victim)?;
                    }
                }
                pages.remove(&victim_no);
                tracing::trace!(page = victim_no, "evicted page");
            }
        }

        let page = match pages.entry(page_no) {
            // Another thread loaded it while we copied; keep theirs
            Entry::Occupied(entry) => {
                let page = Arc::clone(entry.get());
                page.touch(stamp);
                page
            }
            Entry::Vacant(entry) => Arc::clone(entry.insert(fresh)),
        };

        Ok(page)
    }

    // =========================================================================
    // Raw Region Access (index nodes)
    // =========================================================================

    /// Allocate a raw region from the shared append path
    pub fn allocate(&self, size: u64) -> Result<u64> {
        self.heap.allocate(size)
    }

    /// Read an already-allocated raw region
    pub fn read_raw(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.heap.read_raw(offset, out)
    }

    /// Overwrite an already-allocated raw region
    ///
    /// Drops resident copies of the touched pages so cached reads never see
    /// the old bytes.
    pub fn write_raw(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.heap.write_raw(offset, data)?;
        self.invalidate_range(offset, data.len() as u64);
        Ok(())
    }

    // =========================================================================
    // Flush & Shutdown
    // =========================================================================

    /// Sync pending writes to durable storage and clear the pending list
    ///
    /// A sync failure is logged and the un-synced entries are re-queued for
    /// the next cycle; writers never see flush errors.
    pub fn flush(&self) {
        let drained: Vec<PendingWrite> = std::mem::take(&mut *self.pending.lock());
        if drained.is_empty() {
            return;
        }

        let total = drained.len();
        for (i, w) in drained.iter().enumerate() {
            if let Err(e) = self.heap.sync_range_async(w.offset, w.size) {
                tracing::warn!(
                    error = %e,
                    remaining = total - i,
                    "flush sync failed, re-queueing for next cycle"
                );
                self.pending.lock().extend_from_slice(&drained[i..]);
                return;
            }
        }

        tracing::trace!(count = total, "flushed pending writes");
    }

    /// Stop the flush cycle and drain everything
    ///
    /// Ordering is mandatory: stop the thread, final flush of pending
    /// writes, write back every dirty page, then a blocking full-mapping
    /// sync — all before the mapping is released.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(flusher) = self.flusher.lock().take() {
            let _ = flusher.stop_tx.send(());
            let _ = flusher.handle.join();
        }

        self.flush();

        let pages: Vec<Arc<Page>> = self.pages.lock().drain().map(|(_, p)| p).collect();
        for page in pages {
            if page.is_dirty() {
                self.write_back(&page)?;
            }
        }

        self.heap.sync_all()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Number of writes awaiting their durability sync
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of resident pages
    pub fn resident_pages(&self) -> usize {
        self.pages.lock().len()
    }

    /// Whether the page is currently resident
    pub fn is_resident(&self, page_no: u64) -> bool {
        self.pages.lock().contains_key(&page_no)
    }

    /// The heap this cache wraps
    pub fn heap(&self) -> &Arc<HeapStore> {
        &self.heap
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn tick(&self) -> u64 {
        self.clock
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1
    }

    /// Strict LRU victim: minimum access stamp. Stamps come from a
    /// monotonic counter, so there are no ties.
    fn pick_victim(pages: &HashMap<u64, Arc<Page>>) -> Option<u64> {
        pages
            .iter()
            .min_by_key(|(_, page)| page.stamp())
            .map(|(&number, _)| number)
    }

    /// Try to serve a framed read entirely from one resident page.
    /// Returns Ok(None) when the frame is not fully inside the page and
    /// the caller should fall through to the direct read.
    fn read_from_page(&self, page: &Page, offset: u64, out: &mut Vec<u8>) -> Result<Option<usize>> {
        let local = (offset % PAGE_SIZE) as usize;
        if local as u64 + FRAME_HEADER_SIZE > PAGE_SIZE {
            return Ok(None);
        }

        let data_start = self.heap.data_start();
        let header_end = offset
            .checked_add(FRAME_HEADER_SIZE)
            .ok_or(MapStoreError::InvalidOffset(offset))?;
        if offset < crate::heap::HEADER_SIZE || header_end > data_start {
            return Err(MapStoreError::InvalidOffset(offset));
        }

        let data = page.lock_data();
        let (payload_len, flags, crc) = parse_frame(&data[local..]);

        let frame_end = header_end
            .checked_add(payload_len as u64)
            .ok_or(MapStoreError::InvalidOffset(offset))?;
        if frame_end > data_start {
            return Err(MapStoreError::InvalidOffset(offset));
        }
        if frame_end > (page.number() + 1) * PAGE_SIZE {
            // Frame straddles a page boundary; direct read handles it
            return Ok(None);
        }

        if flags & FLAG_DELETED != 0 {
            return Err(MapStoreError::Deleted(offset));
        }

        let start = local + FRAME_HEADER_SIZE as usize;
        let payload = &data[start..start + payload_len];
        if crc32fast::hash(payload) != crc {
            return Err(MapStoreError::CorruptFormat(format!(
                "payload CRC mismatch at offset {}",
                offset
            )));
        }

        out.clear();
        out.extend_from_slice(payload);
        Ok(Some(payload_len))
    }

    /// Write a dirty page's bytes back into the mapping and mark it clean
    fn write_back(&self, page: &Page) -> Result<()> {
        let data = page.lock_data();
        self.heap.write_region(page.number() * PAGE_SIZE, &data)?;
        page.clear_dirty();
        Ok(())
    }

    /// Drop resident copies of every page overlapping `[offset, offset+len)`
    ///
    /// Keeps cache and mapping in agreement after a write lands directly in
    /// the mapping. A dirty copy dropped here loses its buffered patch; the
    /// append that triggered the invalidation is the newer data.
    fn invalidate_range(&self, offset: u64, len: u64) {
        let first = offset / PAGE_SIZE;
        let last = (offset + len.max(1) - 1) / PAGE_SIZE;

        let mut pages = self.pages.lock();
        for page_no in first..=last {
            if let Some(page) = pages.remove(&page_no) {
                if page.is_dirty() {
                    tracing::warn!(page = page_no, "invalidated a dirty page copy");
                }
            }
        }
    }
}
