//! Configuration for mapstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a mapstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the single backing file for this database instance
    pub path: PathBuf,

    /// Initial file/mapping size for a freshly created database (bytes).
    /// The mapping grows by repeated doubling from here.
    pub initial_size: u64,

    // -------------------------------------------------------------------------
    // Page Cache Configuration
    // -------------------------------------------------------------------------
    /// Max number of pages resident in the cache before LRU eviction
    pub cache_capacity: usize,

    /// Number of buffered pending writes that triggers an early flush
    pub flush_batch_threshold: usize,

    /// Background flush interval (milliseconds)
    pub flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./mapstore.db"),
            initial_size: 64 * 1024, // 64 KB, doubles as needed
            cache_capacity: 128,
            flush_batch_threshold: 64,
            flush_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the initial file size (in bytes)
    pub fn initial_size(mut self, size: u64) -> Self {
        self.config.initial_size = size;
        self
    }

    /// Set the page cache capacity (in pages)
    pub fn cache_capacity(mut self, pages: usize) -> Self {
        self.config.cache_capacity = pages;
        self
    }

    /// Set the pending-write count that triggers an early flush
    pub fn flush_batch_threshold(mut self, count: usize) -> Self {
        self.config.flush_batch_threshold = count;
        self
    }

    /// Set the background flush interval (in milliseconds)
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
