//! B+Tree Index Module
//!
//! Ordered index from integer key to heap offset: insert-on-write, exact
//! lookup, and range scan via a forward-linked chain of leaves.
//!
//! ## Node Format (fixed size, little-endian)
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ IsLeaf: u8 | Pad: u8 | Count: u16                        │
//! ├──────────────────────────────────────────────────────────┤
//! │ Keys: 64 × u64                                           │
//! ├──────────────────────────────────────────────────────────┤
//! │ Children: 65 × u64                                       │
//! │   internal: child offsets (Count + 1 in use)             │
//! │   leaf: value offsets (Count in use)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │ NextLeaf: u64 (0 = rightmost leaf; leaves only)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Nodes are allocated from the same append-and-grow offset space as
//! records and are never freed. All leaves sit at equal depth; within a
//! node keys are strictly ordered; an internal node's child `i` holds keys
//! below separator `i`, the rightmost child holds keys at or above the
//! last separator.

mod node;
mod tree;

pub use tree::BTreeIndex;

pub(crate) use node::Node;

// =============================================================================
// Shared Constants
// =============================================================================

/// Max keys per node (order of the tree)
pub const ORDER: usize = 64;

/// Serialized node size:
/// header (4) + keys (64 × 8) + children (65 × 8) + next leaf (8)
pub const NODE_SIZE: usize = 4 + ORDER * 8 + (ORDER + 1) * 8 + 8;
