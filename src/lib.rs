//! # mapstore
//!
//! An embedded, single-file, memory-mapped storage engine with:
//! - An append-style record heap over a growable memory mapping
//! - A page cache with LRU eviction and a deferred-durability write buffer
//! - A B+tree secondary index for ordered point and range lookup by key
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │     open / write / read / delete / put / range_query         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ BTreeIndex  │─────────▶│  PageCache  │
//!   │  (RwLock)   │          │ (LRU+flush) │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  HeapStore  │
//!                           │   (mmap)    │
//!                           └─────────────┘
//! ```
//!
//! All persistent state lives in one file: a fixed header, followed by an
//! append-only interleaving of record frames and index nodes. Offsets
//! returned from a write are permanent handles; records are never moved
//! or reclaimed, and deletion only sets a tombstone flag.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod heap;
pub mod cache;
pub mod index;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{MapStoreError, Result};
pub use config::Config;
pub use engine::Engine;
pub use heap::HeapStore;
pub use cache::PageCache;
pub use index::BTreeIndex;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mapstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
