//! On-disk index node encode/decode
//!
//! Nodes are mutated in place: read into memory, edited, written back to
//! the same offset. Only allocation is append-only.

use crate::error::{MapStoreError, Result};
use crate::heap::NULL_OFFSET;

use super::{NODE_SIZE, ORDER};

const OFF_KEYS: usize = 4;
const OFF_CHILDREN: usize = OFF_KEYS + ORDER * 8;
const OFF_NEXT_LEAF: usize = OFF_CHILDREN + (ORDER + 1) * 8;

/// In-memory copy of one B+tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Node {
    /// Heap offset this node lives at
    pub offset: u64,

    /// Leaf or internal
    pub is_leaf: bool,

    /// Separator keys (internal) or entry keys (leaf), strictly ordered
    /// within the node; duplicates may span nodes
    pub keys: Vec<u64>,

    /// Internal: `keys.len() + 1` child offsets.
    /// Leaf: `keys.len()` value offsets.
    pub children: Vec<u64>,

    /// Forward link to the next leaf in key order (leaves only;
    /// NULL_OFFSET at the rightmost leaf)
    pub next_leaf: u64,
}

impl Node {
    pub fn new_leaf(offset: u64) -> Self {
        Self {
            offset,
            is_leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            next_leaf: NULL_OFFSET,
        }
    }

    pub fn new_internal(offset: u64) -> Self {
        Self {
            offset,
            is_leaf: false,
            keys: Vec::new(),
            children: Vec::new(),
            next_leaf: NULL_OFFSET,
        }
    }

    /// Node holds the maximum key count and must split before it can
    /// accept another key
    pub fn is_full(&self) -> bool {
        self.keys.len() >= ORDER
    }

    /// Serialize into a fixed-size buffer
    pub fn encode(&self) -> [u8; NODE_SIZE] {
        let mut buf = [0u8; NODE_SIZE];
        buf[0] = self.is_leaf as u8;
        buf[2..4].copy_from_slice(&(self.keys.len() as u16).to_le_bytes());

        for (i, key) in self.keys.iter().enumerate() {
            let at = OFF_KEYS + i * 8;
            buf[at..at + 8].copy_from_slice(&key.to_le_bytes());
        }
        for (i, child) in self.children.iter().enumerate() {
            let at = OFF_CHILDREN + i * 8;
            buf[at..at + 8].copy_from_slice(&child.to_le_bytes());
        }
        buf[OFF_NEXT_LEAF..OFF_NEXT_LEAF + 8].copy_from_slice(&self.next_leaf.to_le_bytes());

        buf
    }

    /// Parse a node read from `offset`
    pub fn decode(offset: u64, buf: &[u8]) -> Result<Self> {
        if buf.len() < NODE_SIZE {
            return Err(MapStoreError::CorruptFormat(format!(
                "short node at offset {}: {} bytes",
                offset,
                buf.len()
            )));
        }

        let is_leaf = match buf[0] {
            0 => false,
            1 => true,
            other => {
                return Err(MapStoreError::CorruptFormat(format!(
                    "bad node tag {} at offset {}",
                    other, offset
                )))
            }
        };

        let count = u16::from_le_bytes(buf[2..4].try_into().unwrap()) as usize;
        if count > ORDER {
            return Err(MapStoreError::CorruptFormat(format!(
                "node key count {} exceeds order {} at offset {}",
                count, ORDER, offset
            )));
        }

        let read_u64 = |at: usize| u64::from_le_bytes(buf[at..at + 8].try_into().unwrap());

        let keys = (0..count).map(|i| read_u64(OFF_KEYS + i * 8)).collect();
        let child_count = if is_leaf {
            count
        } else if count > 0 {
            count + 1
        } else {
            0
        };
        let children = (0..child_count)
            .map(|i| read_u64(OFF_CHILDREN + i * 8))
            .collect();
        let next_leaf = read_u64(OFF_NEXT_LEAF);

        Ok(Self {
            offset,
            is_leaf,
            keys,
            children,
            next_leaf,
        })
    }
}
