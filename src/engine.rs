//! Engine Module
//!
//! The composition root: the index holds a reference to the cache, the
//! cache holds a reference to the heap, and the engine owns all three.
//! Each layer exposes a narrow capability interface — there is no
//! inheritance-style layering and no process-wide state; every engine
//! instance carries its own header, cache, and tree.
//!
//! ## Responsibilities
//! - Open/create the single backing file and wire the layers together
//! - Expose the operational surface: write/read/delete by offset,
//!   put/find/range by key
//! - Tear everything down in the mandatory shutdown order

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::PageCache;
use crate::config::Config;
use crate::error::Result;
use crate::heap::HeapStore;
use crate::index::BTreeIndex;

/// The main storage engine
///
/// ## Concurrency Model
///
/// - Record reads/appends: safe under concurrent use via the heap's single
///   growth path and the cache's three independent lock domains
/// - Index operations: serialized by the tree-wide readers-writer lock
///   (readers share, writers exclusive)
/// - The only scheduled wait anywhere is the background flush thread's
///   sleep; no operation blocks indefinitely
///
/// ## Durability
///
/// Writes are durable-ordered only up to the last completed flush; a crash
/// between writes can lose anything issued after the most recent flush
/// boundary. `close` performs the final flush, dirty-page write-back, and
/// a blocking full-mapping sync before the mapping is released.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Append-only record heap over the growable mapping
    heap: Arc<HeapStore>,

    /// Page cache and write buffer wrapping the heap
    cache: Arc<PageCache>,

    /// Ordered key → offset index wrapping the cache
    index: BTreeIndex,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create and map the backing file (header validated)
    /// 2. Wrap it in the page cache and start the background flush cycle
    /// 3. Load the persisted index root, or initialize an empty one
    pub fn open(config: Config) -> Result<Self> {
        let heap = Arc::new(HeapStore::open(&config.path, config.initial_size)?);

        let cache = Arc::new(PageCache::new(Arc::clone(&heap), &config));
        cache.start(Duration::from_millis(config.flush_interval_ms))?;

        let index = BTreeIndex::open(Arc::clone(&cache))?;

        tracing::info!(
            path = %config.path.display(),
            size = heap.mapped_len(),
            "engine opened"
        );

        Ok(Self {
            config,
            heap,
            cache,
            index,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified backing file
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().path(path).build();
        Self::open(config)
    }

    // =========================================================================
    // Offset-Addressed Record Operations
    // =========================================================================

    /// Append a record, returning its permanent offset
    pub fn write(&self, data: &[u8]) -> Result<u64> {
        self.cache.write(data)
    }

    /// Append several records under one critical section, offsets in
    /// input order
    pub fn batch_write(&self, records: &[&[u8]]) -> Result<Vec<u64>> {
        self.cache.batch_write(records)
    }

    /// Read the record at `offset`
    ///
    /// Errors: `InvalidOffset` outside the written region, `Deleted` for
    /// tombstoned records.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.cache.read(offset, &mut out)?;
        Ok(out)
    }

    /// Read the record at `offset` into a caller-supplied buffer,
    /// returning the payload size
    pub fn read_into(&self, offset: u64, out: &mut Vec<u8>) -> Result<usize> {
        self.cache.read(offset, out)
    }

    /// Tombstone the record at `offset`
    ///
    /// Returns `false` for an invalid or already-deleted offset. The index
    /// is deliberately left untouched: entries for deleted records stay
    /// resolvable, and reading them reports `Deleted`.
    pub fn delete(&self, offset: u64) -> bool {
        self.cache.delete(offset)
    }

    // =========================================================================
    // Keyed Operations (B+tree)
    // =========================================================================

    /// Write a record and index it under `key`, returning the offset
    pub fn put(&self, key: u64, data: &[u8]) -> Result<u64> {
        let offset = self.cache.write(data)?;
        self.index.insert(key, offset)?;
        Ok(offset)
    }

    /// Index an existing record offset under `key`
    ///
    /// Duplicate keys are permitted; no uniqueness check is made.
    pub fn insert(&self, key: u64, offset: u64) -> Result<()> {
        self.index.insert(key, offset)
    }

    /// Exact lookup of `key`, returning the indexed offset
    pub fn find(&self, key: u64) -> Result<Option<u64>> {
        self.index.find(key)
    }

    /// Resolve `key` through the index and read the record it points to
    ///
    /// Returns `Ok(None)` when the key is absent. A key whose record was
    /// deleted still resolves and the read reports `Deleted`.
    pub fn read_by_key(&self, key: u64) -> Result<Option<Vec<u8>>> {
        match self.index.find(key)? {
            Some(offset) => Ok(Some(self.read(offset)?)),
            None => Ok(None),
        }
    }

    /// Ordered entries with keys in `[start, end]` inclusive
    pub fn range_query(&self, start: u64, end: u64) -> Result<Vec<(u64, u64)>> {
        self.index.range(start, end)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Force a flush of the pending-write buffer
    pub fn flush(&self) {
        self.cache.flush()
    }

    /// Close the engine gracefully
    ///
    /// Stops the background flush cycle, flushes pending writes, writes
    /// back dirty pages, and performs a blocking full-mapping sync before
    /// the mapping is released.
    pub fn close(self) -> Result<()> {
        self.cache.shutdown()?;
        tracing::info!(path = %self.config.path.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The heap store backing this engine
    pub fn heap(&self) -> &Arc<HeapStore> {
        &self.heap
    }

    /// The page cache layer
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// The B+tree index
    pub fn index(&self) -> &BTreeIndex {
        &self.index
    }
}
