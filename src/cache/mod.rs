//! Page Cache & Write Buffer Module
//!
//! Wraps the Heap Store with two concerns:
//! - a cache of fixed-size pages copied out of the mapping, evicted
//!   least-recently-used, written back when dirty
//! - a write buffer that records appended ranges and syncs them to durable
//!   storage in batches, on a background interval rather than per write
//!
//! ## Lock Domains
//!
//! Three lock domains:
//! - the page-number → page map lock
//! - the pending-write list lock
//! - one lock per cached page
//!
//! The pending-list lock is never held with either of the others. The map
//! lock and a page lock are held together only on the eviction write-back
//! path, always map first. The Heap Store's internal mapping lock sits
//! below all three and never acquires any of them, so there is no ordering
//! cycle.

mod buffer;
mod page;

pub use buffer::{PageCache, PendingWrite};
pub use page::Page;

// =============================================================================
// Shared Constants
// =============================================================================

/// Size of one cached page (bytes). Pages are aligned slices of the
/// mapping: page `n` covers `[n * PAGE_SIZE, (n + 1) * PAGE_SIZE)`.
pub const PAGE_SIZE: u64 = 4096;
