//! Introspection and teardown walks: invariant verification, node and
//! entry counting, level dumps, and whole-tree destruction.

use serde::Serialize;
use tracing::info;

use crate::config::BtreeConfig;
use crate::error::{BtreeError, Result};
use crate::kv::{Key, Value};
use crate::node::NodeId;
use crate::store::NodeStore;
use crate::tree::{write_ref, Btree, LockType};

/// Point-in-time summary of a tree's shape, serializable for logs and
/// admin surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct TreeStatus {
    /// Nodes reachable from the root.
    pub nodes: usize,
    /// Key/value entries stored in leaves.
    pub entries: usize,
    /// Levels from the root down to the leaves, inclusive.
    pub depth: usize,
    /// Sizing policy the tree was built with.
    pub config: BtreeConfig,
}

impl<K: Key, V: Value, S: NodeStore> Btree<K, V, S> {
    /// Snapshot of the tree's node count, entry count, depth, and config.
    pub fn status(&self) -> Result<TreeStatus> {
        let _tl = self.tree_lock_shared();
        let (nodes, entries) = self.count_subtree(self.root_id())?;
        Ok(TreeStatus {
            nodes,
            entries,
            depth: self.depth_locked()?,
            config: self.config().clone(),
        })
    }

    /// Leftmost descent depth; the caller holds the shared tree lock.
    fn depth_locked(&self) -> Result<usize> {
        let Some(mut cur) = self.lock_node(self.root_id(), LockType::Read)? else {
            return Err(BtreeError::Corruption("root node unavailable"));
        };
        let mut depth = 1usize;
        while !cur.node().is_leaf() {
            let child_id = cur.node().child_at(0)?;
            let Some(child) = self.lock_node(child_id, LockType::Read)? else {
                return Err(BtreeError::Corruption("child vanished during coupled descent"));
            };
            cur = child;
            depth += 1;
        }
        Ok(depth)
    }
    /// Free every node and consume the tree. Returns the number of nodes
    /// freed.
    pub fn destroy(self) -> Result<usize> {
        let _tx = self.tree_lock_exclusive();
        let mut freed = 0usize;
        self.destroy_subtree(self.root_id(), &mut freed)?;
        Ok(freed)
    }

    fn destroy_subtree(&self, id: NodeId, freed: &mut usize) -> Result<()> {
        let Some(mut cur) = self.lock_node(id, LockType::Write)? else {
            return Ok(());
        };
        if !cur.node().is_leaf() {
            let total = cur.node().entry_count();
            let mut children = Vec::with_capacity(total + 1);
            for idx in 0..total {
                children.push(cur.node().child_at(idx)?);
            }
            if cur.node().has_valid_edge() {
                children.push(cur.node().edge_child());
            }
            for child in children {
                self.destroy_subtree(child, freed)?;
            }
        }
        write_ref(&mut cur)?.invalidate();
        drop(cur);
        self.store().free_node(id);
        *freed += 1;
        Ok(())
    }

    /// Number of nodes reachable from the root.
    pub fn count_nodes(&self) -> Result<usize> {
        let _tl = self.tree_lock_shared();
        let (nodes, _) = self.count_subtree(self.root_id())?;
        Ok(nodes)
    }

    /// Number of key/value entries stored in leaves.
    pub fn count_entries(&self) -> Result<usize> {
        let _tl = self.tree_lock_shared();
        let (_, entries) = self.count_subtree(self.root_id())?;
        Ok(entries)
    }

    fn count_subtree(&self, id: NodeId) -> Result<(usize, usize)> {
        let Some(cur) = self.lock_node(id, LockType::Read)? else {
            return Err(BtreeError::Corruption("unreachable node during walk"));
        };
        if cur.node().is_leaf() {
            return Ok((1, cur.node().entry_count()));
        }
        let mut nodes = 1usize;
        let mut entries = 0usize;
        let total = cur.node().entry_count();
        for idx in 0..total {
            let (n, e) = self.count_subtree(cur.node().child_at(idx)?)?;
            nodes += n;
            entries += e;
        }
        if cur.node().has_valid_edge() {
            let (n, e) = self.count_subtree(cur.node().edge_child())?;
            nodes += n;
            entries += e;
        }
        Ok((nodes, entries))
    }

    /// Full-tree invariant check: per-node checksums and key order,
    /// separator bounds between parents and children, and the leaf chain
    /// against global key order. Meaningful on a quiescent tree.
    pub fn verify_tree(&self) -> Result<()> {
        let _tl = self.tree_lock_shared();
        let mut leaves: Vec<(NodeId, NodeId)> = Vec::new();
        self.verify_subtree(self.root_id(), None, None, &mut leaves)?;
        for pair in leaves.windows(2) {
            if pair[0].1 != pair[1].0 {
                return Err(BtreeError::Corruption("leaf chain does not match key order"));
            }
        }
        if let Some(last) = leaves.last() {
            if last.1.is_valid() {
                return Err(BtreeError::Corruption("last leaf has a dangling next link"));
            }
        }
        Ok(())
    }

    /// Check one subtree against `(lower, upper]` key bounds, collecting
    /// `(leaf, next)` link pairs in key order.
    fn verify_subtree(
        &self,
        id: NodeId,
        lower: Option<&K>,
        upper: Option<&K>,
        leaves: &mut Vec<(NodeId, NodeId)>,
    ) -> Result<()> {
        let Some(cur) = self.lock_node(id, LockType::Read)? else {
            return Err(BtreeError::Corruption("unreachable node during verification"));
        };
        let node = cur.node();
        if !node.checksum_ok() {
            return Err(BtreeError::Corruption("node checksum mismatch"));
        }
        node.verify_order::<K>()?;
        let total = node.entry_count();
        for idx in 0..total {
            let key: K = node.key_at(idx)?;
            if let Some(lo) = lower {
                if key <= *lo {
                    return Err(BtreeError::Corruption("key at or below the subtree lower bound"));
                }
            }
            if let Some(hi) = upper {
                if key > *hi {
                    return Err(BtreeError::Corruption("key above the subtree separator"));
                }
            }
        }
        if node.is_leaf() {
            leaves.push((id, node.next_node()));
            return Ok(());
        }
        if total == 0 && !node.has_valid_edge() {
            return Err(BtreeError::Corruption("interior node routes nowhere"));
        }
        let mut prev: Option<K> = lower.cloned();
        for idx in 0..total {
            let sep: K = node.key_at(idx)?;
            self.verify_subtree(node.child_at(idx)?, prev.as_ref(), Some(&sep), leaves)?;
            prev = Some(sep);
        }
        if node.has_valid_edge() {
            self.verify_subtree(node.edge_child(), prev.as_ref(), upper, leaves)?;
        }
        Ok(())
    }

    /// Log and return a level-by-level dump of the tree.
    pub fn print_tree(&self) -> Result<String> {
        let _tl = self.tree_lock_shared();
        let mut out = String::new();
        let mut level: Vec<NodeId> = vec![self.root_id()];
        let mut depth = 0usize;
        while !level.is_empty() {
            let mut next_level = Vec::new();
            let mut line = format!("L{}:", depth);
            for id in &level {
                let Some(cur) = self.lock_node(*id, LockType::Read)? else {
                    return Err(BtreeError::Corruption("unreachable node during walk"));
                };
                let node = cur.node();
                line.push_str("  ");
                line.push_str(&node.describe::<K, V>());
                if !node.is_leaf() {
                    for idx in 0..node.entry_count() {
                        next_level.push(node.child_at(idx)?);
                    }
                    if node.has_valid_edge() {
                        next_level.push(node.edge_child());
                    }
                }
            }
            info!("{}", line);
            out.push_str(&line);
            out.push('\n');
            level = next_level;
            depth += 1;
        }
        Ok(out)
    }
}
