//! Heap Store Module
//!
//! The append-only, offset-addressed byte region backing all records and
//! index nodes, stored in a single memory-mapped file.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ File Header (32 bytes, offset 0)                        │
//! │   Magic: "MSTR" (4) | Version: u32 (4)                  │
//! │   TotalSize: u64 (8) | DataStart: u64 (8) | Root: u64   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record frames and index nodes, interleaved in           │
//! │ write order, each self-describing:                      │
//! │                                                         │
//! │   Record frame (20-byte header + payload)               │
//! │   [Size: u32][Flags: u32][Next: u64][CRC: u32][payload] │
//! │   (Flags bit 0 = tombstone)                             │
//! │                                                         │
//! │   Index node: fixed-size block, see `index::node`       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are never moved, reused, or reclaimed; an offset returned from
//! an append is valid for the lifetime of the file. Deletion sets the
//! tombstone flag and nothing else.

mod header;
mod store;

pub use header::FileHeader;
pub use store::HeapStore;

pub(crate) use store::parse_frame;

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying a mapstore database file
pub(crate) const MAGIC: &[u8; 4] = b"MSTR";

/// Current file format version
pub(crate) const FORMAT_VERSION: u32 = 1;

/// File header size: Magic (4) + Version (4) + TotalSize (8) +
/// DataStart (8) + Root (8) = 32 bytes
pub const HEADER_SIZE: u64 = 32;

/// Record frame header size: Size (4) + Flags (4) + Next (8) + CRC (4)
pub const FRAME_HEADER_SIZE: u64 = 20;

/// Flags bit 0: record is deleted (tombstone)
pub(crate) const FLAG_DELETED: u32 = 1;

/// Null offset sentinel. Offset 0 is the file header, so it can never be
/// a record or node; it doubles as "no root" and "no next leaf".
pub const NULL_OFFSET: u64 = 0;
