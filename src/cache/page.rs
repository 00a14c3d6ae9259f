//! Cached page
//!
//! An in-memory copy of one page-sized aligned slice of the mapping. The
//! cache owns the copy; the mapping remains the source of truth for clean
//! pages. Each page carries its own lock so a read racing a flush on the
//! same page is serialized without touching the cache-map lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// One cached page: data copy, dirty tag, last-access stamp
pub struct Page {
    /// Page number (offset / PAGE_SIZE)
    number: u64,

    /// The cached copy of the page bytes
    data: Mutex<Box<[u8]>>,

    /// True when the copy has modifications not yet written back
    dirty: AtomicBool,

    /// Last-access stamp from the cache's monotonic clock (LRU ordering)
    last_access: AtomicU64,
}

impl Page {
    pub(crate) fn new(number: u64, data: Box<[u8]>, stamp: u64) -> Self {
        Self {
            number,
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
            last_access: AtomicU64::new(stamp),
        }
    }

    /// Page number within the mapping
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Whether the copy holds un-written-back modifications
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Overwrite page bytes starting at `local`, marking the page dirty
    ///
    /// The modification lives only in the cached copy until the page is
    /// written back on eviction or shutdown.
    pub fn write_at(&self, local: usize, bytes: &[u8]) {
        let mut data = self.data.lock();
        data[local..local + bytes.len()].copy_from_slice(bytes);
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn touch(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Release);
    }

    pub(crate) fn stamp(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    pub(crate) fn lock_data(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.data.lock()
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}
