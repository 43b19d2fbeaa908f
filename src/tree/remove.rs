//! Removal paths: point and any-match deletes, merge rebalancing of
//! under-filled children, and root collapse.
//!
//! Merges never allocate. A window of adjacent children is write-locked
//! under the parent and entries flow leftward until each target reaches
//! the ideal fill; fully drained children are freed and their parent
//! separators removed.

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{BtreeError, Result, Status};
use crate::kv::{Key, KeyRange, Value};
use crate::node::NodeId;
use crate::request::RemoveRequest;
use crate::store::NodeStore;
use crate::tree::search::closest_below;
use crate::tree::{write_ref, Btree, LockType, LockedNode, OpContext};

impl<K: Key, V: Value, S: NodeStore> Btree<K, V, S> {
    /// Execute a removal request.
    pub fn remove(&self, req: &mut RemoveRequest<K, V>) -> Result<()> {
        let mut ctx = OpContext::default();
        loop {
            match self.remove_once(req)? {
                Status::Retry => self.note_retry(&mut ctx, "remove"),
                other => return other.into_result(),
            }
        }
    }

    /// Remove `key`, returning its value or `None` when absent.
    pub fn remove_key(&self, key: &K) -> Result<Option<V>> {
        let mut req = RemoveRequest::single(key.clone());
        match self.remove(&mut req) {
            Ok(()) => Ok(match req {
                RemoveRequest::Single { removed, .. } => removed,
                RemoveRequest::Any { removed, .. } => removed,
            }),
            Err(BtreeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_once(&self, req: &mut RemoveRequest<K, V>) -> Result<Status> {
        {
            let _tl = self.tree_lock_shared();
            let Some(root) = self.lock_node(self.root_id(), LockType::Read)? else {
                return Err(BtreeError::Corruption("root node unavailable"));
            };
            let collapse = !root.node().is_leaf()
                && root.node().entry_count() == 0
                && root.node().has_valid_edge();
            if !collapse {
                return self.do_remove(root, req);
            }
            // A single-edge interior root shrinks the tree by one level.
        }
        self.check_collapse_root()?;
        Ok(Status::Retry)
    }

    /// Lock-coupled descent that rebalances thin children on the way down.
    fn do_remove(&self, mut cur: LockedNode, req: &mut RemoveRequest<K, V>) -> Result<Status> {
        let range = match req {
            RemoveRequest::Single { key, .. } => KeyRange::single(key.clone()),
            RemoveRequest::Any { range, .. } => range.clone(),
        };
        // A child the merge pass could not feed; descend into it as-is
        // instead of re-detecting it forever.
        let mut merge_exempt: Option<NodeId> = None;
        loop {
            if cur.node().is_leaf() {
                let Some(mut leaf) = self.relock_write(cur)? else {
                    return Ok(Status::Retry);
                };
                return self.remove_from_leaf(&mut leaf, &range, req);
            }
            let idx = self.descent_index(cur.node(), &range)?;
            let child_id = cur.node().child_at(idx)?;
            let Some(child) = self.lock_node(child_id, LockType::Read)? else {
                return Err(BtreeError::Corruption("child vanished during coupled descent"));
            };
            if child.node().is_merge_needed(self.config())? && merge_exempt != Some(child_id) {
                drop(child);
                let Some(mut parent) = self.upgrade(cur)? else {
                    return Ok(Status::Retry);
                };
                match self.merge_window(&mut parent, idx)? {
                    Status::Success => {
                        // Child boundaries moved; re-route from the parent.
                        cur = parent;
                        continue;
                    }
                    Status::MergeNotRequired => {
                        merge_exempt = Some(child_id);
                        cur = parent;
                        continue;
                    }
                    other => return Ok(other),
                }
            }
            if child.node().is_leaf() {
                // Take the leaf's write lock before letting go of the
                // parent so the leaf cannot move structurally in between.
                let Some(childw) = self.relock_write(child)? else {
                    return Err(BtreeError::Corruption("leaf invalidated under parent lock"));
                };
                cur = childw;
            } else {
                cur = child;
            }
        }
    }

    fn remove_from_leaf(
        &self,
        leaf: &mut LockedNode,
        range: &KeyRange<K>,
        req: &mut RemoveRequest<K, V>,
    ) -> Result<Status> {
        let node = write_ref(leaf)?;
        let (found, idx) = node.find(range)?;
        if !found && !closest_below::<K>(node, range, idx)? {
            return Ok(Status::NotFound);
        }
        let key: K = node.key_at(idx)?;
        let value: V = node.value_at(idx)?;
        node.remove_range(idx, idx)?;
        self.store().write_node(node, None);
        match req {
            RemoveRequest::Single { removed, .. } => *removed = Some(value),
            RemoveRequest::Any {
                key: out_key,
                removed,
                ..
            } => {
                *out_key = Some(key);
                *removed = Some(value);
            }
        }
        Ok(Status::Success)
    }

    /// Rebalance the window of children starting at parent slot `start`.
    ///
    /// The window spans at most `max_nodes_to_rebalance` adjacent children
    /// (the edge included). Returns `MergeNotRequired` when there is
    /// nothing to pull, `Success` after the parent and survivors were
    /// rewritten.
    fn merge_window(&self, parent: &mut LockedNode, start: usize) -> Result<Status> {
        let entries0 = parent.node().entry_count();
        let last_idx = if parent.node().has_valid_edge() {
            entries0
        } else {
            entries0.saturating_sub(1)
        };
        let end = (start + self.config().max_nodes_to_rebalance - 1).min(last_idx);
        if end <= start {
            return Ok(Status::MergeNotRequired);
        }
        // Lock the whole window left to right.
        let mut children: Vec<LockedNode> = Vec::with_capacity(end - start + 1);
        for idx in start..=end {
            let child_id = parent.node().child_at(idx)?;
            let Some(child) = self.lock_node(child_id, LockType::Write)? else {
                return Ok(Status::Retry);
            };
            children.push(child);
        }
        let balanced = self.config().ideal_fill_size();
        if children[0].node().occupied_size()? > balanced {
            return Ok(Status::MergeNotRequired);
        }
        // When the window stops short of the edge, the original separator
        // at its right boundary still bounds the last survivor's subtree
        // and must be preserved verbatim.
        let last_pkey: Option<K> = if end < entries0 {
            Some(parent.node().key_at(end)?)
        } else {
            None
        };
        let tail_next = children[children.len() - 1].node().next_node();

        // Pull phase: each target fills toward the balance point from the
        // nodes to its right; a node left non-empty becomes the next
        // target.
        let mut survivors: Vec<usize> = vec![0];
        let mut target = 0usize;
        let mut moved_bytes = 0usize;
        for i in 1..children.len() {
            let occupied = children[target].node().occupied_size()?;
            if occupied < balanced {
                let (left, right) = children.split_at_mut(i);
                let tgt = write_ref(&mut left[target])?;
                let src = write_ref(&mut right[0])?;
                moved_bytes += tgt.move_in_from_right_by_size(src, balanced - occupied)?;
            }
            let node = children[i].node();
            if node.entry_count() > 0 || node.has_valid_edge() {
                survivors.push(i);
                target = i;
            }
        }
        let m = survivors.len();
        let freed_count = children.len() - m;
        if freed_count == 0 && moved_bytes == 0 {
            return Ok(Status::MergeNotRequired);
        }

        // Rewrite the parent: drop defunct separators first so growing
        // separator rewrites have room, then repoint each surviving slot.
        let pnode = write_ref(parent)?;
        if freed_count > 0 {
            pnode.remove_range(start + m, end)?;
        }
        let entries_now = pnode.entry_count();
        for (j, &ci) in survivors.iter().enumerate() {
            let slot = start + j;
            let mut idb: Vec<u8> = Vec::with_capacity(8);
            children[ci].id.serialize_into(&mut idb);
            if slot == entries_now {
                // Last survivor becomes the parent's edge child.
                pnode.update_at(slot, None, &idb)?;
            } else {
                let sep: K = if j + 1 == m {
                    match &last_pkey {
                        Some(k) => k.clone(),
                        None => {
                            return Err(BtreeError::Corruption("merge lost its trailing separator"))
                        }
                    }
                } else {
                    children[ci].node().last_key()?
                };
                let mut kb: Vec<u8> = Vec::with_capacity(sep.serialized_size());
                sep.serialize_into(&mut kb);
                if !pnode.update_at(slot, Some(&kb), &idb)? {
                    debug_assert!(false, "separator rewrite rejected during merge");
                    return Err(BtreeError::Corruption("merge separator rewrite did not fit"));
                }
            }
        }

        // Rewire the sibling chain across the freed nodes.
        for w in survivors.windows(2) {
            let next_id = children[w[1]].id;
            write_ref(&mut children[w[0]])?.set_next_node(next_id);
        }
        let last_survivor = survivors[m - 1];
        if last_survivor != children.len() - 1 {
            write_ref(&mut children[last_survivor])?.set_next_node(tail_next);
        }

        let mut freed_ids: SmallVec<[NodeId; 4]> = SmallVec::new();
        for i in 1..children.len() {
            if !survivors.contains(&i) {
                freed_ids.push(children[i].id);
            }
        }
        self.store().on_merge(pnode, children[survivors[0]].node(), &freed_ids);

        // Persist right to left, parent last.
        for &ci in survivors.iter().rev() {
            let node = write_ref(&mut children[ci])?;
            self.store().write_node(node, None);
        }
        self.store().write_node(pnode, None);
        for i in 1..children.len() {
            if survivors.contains(&i) {
                continue;
            }
            write_ref(&mut children[i])?.invalidate();
            self.store().free_node(children[i].id);
        }
        trace!(
            parent = %parent.id,
            window = children.len(),
            freed = freed_count,
            moved_bytes,
            "rebalanced children"
        );
        Ok(Status::Success)
    }

    /// Shrink the tree by one level: an interior root whose only child is
    /// its edge swaps contents with that child and frees the husk. Runs
    /// under the exclusive tree lock so the root id never changes.
    fn check_collapse_root(&self) -> Result<()> {
        let _tx = self.tree_lock_exclusive();
        let Some(mut root) = self.lock_node(self.root_id(), LockType::Write)? else {
            return Err(BtreeError::Corruption("root node unavailable"));
        };
        if root.node().is_leaf()
            || root.node().entry_count() != 0
            || !root.node().has_valid_edge()
        {
            // A racer collapsed (or refilled) the root first.
            return Ok(());
        }
        let child_id = root.node().edge_child();
        let Some(mut child) = self.lock_node(child_id, LockType::Write)? else {
            return Ok(());
        };
        let rnode = write_ref(&mut root)?;
        let cnode = write_ref(&mut child)?;
        self.store().swap_node(rnode, cnode);
        // The root now carries the child's contents one level down; the
        // husk left in the child slot is discarded.
        cnode.invalidate();
        self.store().write_node(rnode, None);
        drop(child);
        self.store().free_node(child_id);
        trace!(root = %self.root_id(), freed = %child_id, "collapsed root level");
        Ok(())
    }
}
