//! B+Tree Index
//!
//! Ordered key → heap-offset index over the cache layer. Inserts take a
//! single downward pass with preemptive splits; range scans walk the
//! forward-linked leaf chain.
//!
//! ## Concurrency
//!
//! The tree itself carries a tree-wide readers-writer lock: `find`/`range`
//! share it, `insert` holds it exclusively. Readers run concurrently with
//! each other but never with a writer, so no traversal can observe a node
//! mid-mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::PageCache;
use crate::error::Result;
use crate::heap::NULL_OFFSET;

use super::{Node, NODE_SIZE};

/// B+tree index from u64 key to heap offset
///
/// Duplicate keys are permitted by construction: insert never checks for
/// uniqueness, and `find` returns the first match in leaf scan order —
/// which match that is for duplicates is unspecified, not a guarantee.
pub struct BTreeIndex {
    /// Cache layer all node I/O goes through
    cache: Arc<PageCache>,

    /// Current root offset (mirrors the header's root field)
    root: AtomicU64,

    /// Tree-wide readers-writer exclusion for all entry points
    guard: RwLock<()>,
}

impl BTreeIndex {
    /// Load the persisted tree, or create an empty one on first open
    ///
    /// A fresh database gets a single empty leaf as root; its offset is
    /// written into the header's root field. Reopening an existing file
    /// loads the recorded root instead.
    pub fn open(cache: Arc<PageCache>) -> Result<Self> {
        let mut root = cache.heap().root();

        if root == NULL_OFFSET {
            let offset = cache.allocate(NODE_SIZE as u64)?;
            let leaf = Node::new_leaf(offset);
            cache.write_raw(offset, &leaf.encode())?;
            cache.heap().set_root(offset)?;
            root = offset;
            tracing::debug!(root = offset, "initialized empty index");
        }

        Ok(Self {
            cache,
            root: AtomicU64::new(root),
            guard: RwLock::new(()),
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Insert a key → value-offset entry
    ///
    /// Preemptive split: a full child is split before descent, so the pass
    /// never propagates a split back upward. A full root is handled first:
    /// a new root is allocated with the old root as its only child, the old
    /// root is split, and the new root offset is persisted to the header
    /// immediately — the only path that changes the recorded root.
    pub fn insert(&self, key: u64, value: u64) -> Result<()> {
        let _guard = self.guard.write();

        let mut node = self.read_node(self.root.load(Ordering::Acquire))?;

        if node.is_full() {
            let offset = self.cache.allocate(NODE_SIZE as u64)?;
            let mut new_root = Node::new_internal(offset);
            new_root.children.push(node.offset);

            self.split_child(&mut new_root, 0, &mut node)?;
            self.write_node(&new_root)?;

            self.cache.heap().set_root(offset)?;
            self.root.store(offset, Ordering::Release);
            tracing::debug!(root = offset, "root split, tree grew a level");

            node = new_root;
        }

        loop {
            if node.is_leaf {
                // Duplicates land after existing equal keys
                let pos = node.keys.partition_point(|&k| k <= key);
                node.keys.insert(pos, key);
                node.children.insert(pos, value);
                return self.write_node(&node);
            }

            let idx = node.keys.partition_point(|&k| k <= key);
            let mut child = self.read_node(node.children[idx])?;

            if child.is_full() {
                self.split_child(&mut node, idx, &mut child)?;
                self.write_node(&node)?;

                // The separator at idx decides which half to descend into
                if key >= node.keys[idx] {
                    child = self.read_node(node.children[idx + 1])?;
                }
            }

            node = child;
        }
    }

    /// Exact lookup, returning the stored value offset if the key exists
    pub fn find(&self, key: u64) -> Result<Option<u64>> {
        let _guard = self.guard.read();

        let leaf = self.descend_to_leaf(key)?;
        for (i, &k) in leaf.keys.iter().enumerate() {
            if k == key {
                return Ok(Some(leaf.children[i]));
            }
        }
        Ok(None)
    }

    /// Ordered scan of all entries with keys in `[start, end]` inclusive
    ///
    /// Locates the leaf for `start`, then walks the forward chain. Keys
    /// within a leaf ascend and the chain preserves global order, so the
    /// scan exits as soon as a key exceeds `end`.
    pub fn range(&self, start: u64, end: u64) -> Result<Vec<(u64, u64)>> {
        let _guard = self.guard.read();

        let mut out = Vec::new();
        if start > end {
            return Ok(out);
        }

        let mut leaf = self.lower_bound_leaf(start)?;
        loop {
            for (i, &k) in leaf.keys.iter().enumerate() {
                if k < start {
                    continue;
                }
                if k > end {
                    return Ok(out);
                }
                out.push((k, leaf.children[i]));
            }

            if leaf.next_leaf == NULL_OFFSET {
                return Ok(out);
            }
            leaf = self.read_node(leaf.next_leaf)?;
        }
    }

    /// Current root offset
    pub fn root_offset(&self) -> u64 {
        self.root.load(Ordering::Acquire)
    }

    /// Tree height (levels from root to leaf), for inspection
    pub fn height(&self) -> Result<usize> {
        let _guard = self.guard.read();

        let mut height = 1;
        let mut node = self.read_node(self.root.load(Ordering::Acquire))?;
        while !node.is_leaf {
            node = self.read_node(node.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Descend to the leaf that would hold `key`: at each internal node,
    /// take the first child whose separator is strictly greater than the
    /// key (leftmost when below all separators, rightmost when above all).
    fn descend_to_leaf(&self, key: u64) -> Result<Node> {
        let mut node = self.read_node(self.root.load(Ordering::Acquire))?;
        while !node.is_leaf {
            let idx = node.keys.partition_point(|&k| k <= key);
            node = self.read_node(node.children[idx])?;
        }
        Ok(node)
    }

    /// Descend to the leftmost leaf that can hold `key`, breaking
    /// separator ties to the left. A leaf split of duplicate keys leaves
    /// some of them under a separator equal to the key; a range scan must
    /// start at that left sibling and let the forward chain cover the
    /// rest, where `descend_to_leaf` may land past them.
    fn lower_bound_leaf(&self, key: u64) -> Result<Node> {
        let mut node = self.read_node(self.root.load(Ordering::Acquire))?;
        while !node.is_leaf {
            let idx = node.keys.partition_point(|&k| k < key);
            node = self.read_node(node.children[idx])?;
        }
        Ok(node)
    }

    /// Split the full `child` at `parent.children[idx]` at its midpoint
    ///
    /// Leaf: the sibling takes the upper half of the pairs and inherits the
    /// forward link; the original repoints to the sibling, preserving the
    /// leaf chain; the sibling's first key is promoted as separator.
    /// Internal: the midpoint key is promoted, the sibling takes the keys
    /// and children above it.
    ///
    /// Writes `child` and the sibling; the caller writes `parent`.
    fn split_child(&self, parent: &mut Node, idx: usize, child: &mut Node) -> Result<()> {
        let offset = self.cache.allocate(NODE_SIZE as u64)?;
        let mid = child.keys.len() / 2;

        let separator;
        let mut sibling;

        if child.is_leaf {
            sibling = Node::new_leaf(offset);
            sibling.keys = child.keys.split_off(mid);
            sibling.children = child.children.split_off(mid);
            sibling.next_leaf = child.next_leaf;
            child.next_leaf = offset;
            separator = sibling.keys[0];
        } else {
            sibling = Node::new_internal(offset);
            separator = child.keys[mid];
            sibling.keys = child.keys.split_off(mid + 1);
            sibling.children = child.children.split_off(mid + 1);
            child.keys.truncate(mid);
        }

        parent.keys.insert(idx, separator);
        parent.children.insert(idx + 1, offset);

        self.write_node(child)?;
        self.write_node(&sibling)?;
        Ok(())
    }

    fn read_node(&self, offset: u64) -> Result<Node> {
        let mut buf = [0u8; NODE_SIZE];
        self.cache.read_raw(offset, &mut buf)?;
        Node::decode(offset, &buf)
    }

    fn write_node(&self, node: &Node) -> Result<()> {
        self.cache.write_raw(node.offset, &node.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::heap::HeapStore;
    use tempfile::tempdir;

    fn open_tree(dir: &tempfile::TempDir) -> BTreeIndex {
        let heap = Arc::new(HeapStore::open(&dir.path().join("tree.db"), 4096).unwrap());
        let cache = Arc::new(PageCache::new(heap, &Config::default()));
        BTreeIndex::open(cache).unwrap()
    }

    #[test]
    fn insert_then_find() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.insert(42, 1000).unwrap();
        tree.insert(7, 2000).unwrap();

        assert_eq!(tree.find(42).unwrap(), Some(1000));
        assert_eq!(tree.find(7).unwrap(), Some(2000));
        assert_eq!(tree.find(99).unwrap(), None);
    }

    #[test]
    fn splits_keep_everything_findable() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        // Enough keys for several levels of splits, inserted out of order
        let keys: Vec<u64> = (0..2000).map(|i| (i * 7919) % 20011).collect();
        for &k in &keys {
            tree.insert(k, k * 10).unwrap();
        }
        assert!(tree.height().unwrap() >= 2);

        for &k in &keys {
            assert_eq!(tree.find(k).unwrap(), Some(k * 10), "key {}", k);
        }
    }

    #[test]
    fn range_is_sorted_inclusive_and_complete() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        for k in (0..500).rev() {
            tree.insert(k * 2, k).unwrap(); // even keys only
        }

        let hits = tree.range(100, 200).unwrap();
        let keys: Vec<u64> = hits.iter().map(|&(k, _)| k).collect();
        let expected: Vec<u64> = (50..=100).map(|k| k * 2).collect();
        assert_eq!(keys, expected);

        for (k, v) in hits {
            assert_eq!(v, k / 2);
        }

        // Inverted and empty ranges
        assert!(tree.range(200, 100).unwrap().is_empty());
        assert!(tree.range(1001, 1001).unwrap().is_empty());
    }

    #[test]
    fn range_spans_leaf_chain() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        for k in 0..1000u64 {
            tree.insert(k, k).unwrap();
        }

        let all = tree.range(0, u64::MAX).unwrap();
        assert_eq!(all.len(), 1000);
        assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn duplicate_keys_are_permitted() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        tree.insert(5, 100).unwrap();
        tree.insert(5, 200).unwrap();
        tree.insert(5, 300).unwrap();

        // find returns one of the stored offsets; which one is unspecified
        let found = tree.find(5).unwrap().unwrap();
        assert!([100, 200, 300].contains(&found));

        let hits = tree.range(5, 5).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|&(k, _)| k == 5));
    }

    #[test]
    fn range_returns_all_duplicates_across_splits() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);

        // More duplicates than fit in one leaf, so splits push some of
        // them under separators equal to the key, with neighbors on both
        // sides to anchor the bounds
        tree.insert(6, 60).unwrap();
        tree.insert(8, 80).unwrap();
        for i in 0..150u64 {
            tree.insert(7, 1000 + i).unwrap();
        }

        let hits = tree.range(7, 7).unwrap();
        assert_eq!(hits.len(), 150, "every duplicate must be returned");
        assert!(hits.iter().all(|&(k, _)| k == 7));

        let mut values: Vec<u64> = hits.iter().map(|&(_, v)| v).collect();
        values.sort_unstable();
        assert_eq!(values, (1000..1150).collect::<Vec<u64>>());

        assert_eq!(tree.range(6, 8).unwrap().len(), 152);
        assert_eq!(tree.range(0, 6).unwrap(), vec![(6, 60)]);
    }

    #[test]
    fn root_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.db");

        {
            let heap = Arc::new(HeapStore::open(&path, 4096).unwrap());
            let cache = Arc::new(PageCache::new(heap, &Config::default()));
            let tree = BTreeIndex::open(cache.clone()).unwrap();
            for k in 0..300u64 {
                tree.insert(k, k + 1).unwrap();
            }
            cache.shutdown().unwrap();
        }

        let heap = Arc::new(HeapStore::open(&path, 4096).unwrap());
        let cache = Arc::new(PageCache::new(heap, &Config::default()));
        let tree = BTreeIndex::open(cache).unwrap();

        for k in 0..300u64 {
            assert_eq!(tree.find(k).unwrap(), Some(k + 1));
        }
    }
}
