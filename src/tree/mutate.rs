//! Write paths: puts, node splits, root splits, and in-place range
//! updates.
//!
//! Splits follow an insert-first convention: the promoted separator is
//! inserted for the left node before the old slot is repointed at the
//! right node. A failed promotion then needs only the entry move undone
//! before the operation restarts with the parent flagged to split.

use tracing::trace;

use crate::error::{BtreeError, Result, Status};
use crate::kv::{Key, KeyRange, PutType, Value};
use crate::node::{NodeBuf, NodeShape};
use crate::request::{PutRequest, RangeUpdate, SinglePut};
use crate::store::NodeStore;
use crate::tree::{write_ref, Btree, LockType, LockedNode, OpContext};

impl<K: Key, V: Value, S: NodeStore> Btree<K, V, S> {
    /// Execute a mutation request.
    pub fn put(&self, req: &mut PutRequest<K, V>) -> Result<()> {
        match req {
            PutRequest::Single(single) => self.put_single(single),
            PutRequest::Range(update) => self.update_range(update),
        }
    }

    /// Insert `key`, failing when it already exists.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut req = SinglePut::new(key, value, PutType::InsertOnlyIfNotExists);
        self.put_single(&mut req)
    }

    /// Insert or overwrite `key`, returning the prior value if any.
    pub fn upsert(&self, key: K, value: V) -> Result<Option<V>> {
        let mut req = SinglePut::new(key, value, PutType::ReplaceIfExistsElseInsert);
        self.put_single(&mut req)?;
        Ok(req.existing.take())
    }

    fn put_single(&self, req: &mut SinglePut<K, V>) -> Result<()> {
        let mut ctx = OpContext::default();
        loop {
            match self.put_once(req, &mut ctx)? {
                Status::Retry => self.note_retry(&mut ctx, "put"),
                other => return other.into_result(),
            }
        }
    }

    /// One attempt at a single put. `Retry` restarts from the root.
    fn put_once(&self, req: &mut SinglePut<K, V>, ctx: &mut OpContext) -> Result<Status> {
        let ksz = req.key.serialized_size();
        let vsz = req.value.serialized_size();
        {
            let _tl = self.tree_lock_shared();
            let Some(root) = self.lock_node(self.root_id(), LockType::Read)? else {
                return Err(BtreeError::Corruption("root node unavailable"));
            };
            if !self.is_split_needed(root.node(), ksz, vsz, ctx)? {
                return self.do_put(root, req, ctx);
            }
            // Root is full. Release everything and come back with the
            // exclusive tree lock.
        }
        self.check_split_root(ksz, vsz, ctx)?;
        Ok(Status::Retry)
    }

    /// Lock-coupled descent that splits full children on the way down.
    /// `cur` is the root, already locked and known to have room.
    fn do_put(
        &self,
        mut cur: LockedNode,
        req: &mut SinglePut<K, V>,
        ctx: &mut OpContext,
    ) -> Result<Status> {
        let ksz = req.key.serialized_size();
        let vsz = req.value.serialized_size();
        let range = KeyRange::single(req.key.clone());
        loop {
            if cur.node().is_leaf() {
                // Only the root-as-leaf arrives read-locked; deeper leaves
                // are write-locked before their parent is released.
                let was_read = !cur.is_write();
                let Some(mut leaf) = self.relock_write(cur)? else {
                    return Ok(Status::Retry);
                };
                if was_read && self.is_split_needed(leaf.node(), ksz, vsz, ctx)? {
                    // Filled up across the relock window.
                    return Ok(Status::Retry);
                }
                let node = write_ref(&mut leaf)?;
                let st = node.put(&req.key, &req.value, req.put_type, &mut req.existing)?;
                if st == Status::Success {
                    self.store().write_node(node, None);
                }
                return Ok(st);
            }
            let idx = self.descent_index(cur.node(), &range)?;
            let child_id = cur.node().child_at(idx)?;
            let Some(child) = self.lock_node(child_id, LockType::Read)? else {
                return Err(BtreeError::Corruption("child vanished during coupled descent"));
            };
            if self.is_split_needed(child.node(), ksz, vsz, ctx)? {
                drop(child);
                let Some(mut parent) = self.upgrade(cur)? else {
                    return Ok(Status::Retry);
                };
                let Some(mut childw) = self.lock_node(child_id, LockType::Write)? else {
                    return Ok(Status::Retry);
                };
                // A racer may have split this child before our upgrade
                // landed.
                if self.is_split_needed(childw.node(), ksz, vsz, ctx)? {
                    let st = {
                        let pnode = write_ref(&mut parent)?;
                        let cnode = write_ref(&mut childw)?;
                        self.split_node(pnode, cnode, idx, false, ctx)?
                    };
                    if st != Status::Success {
                        return Ok(st);
                    }
                }
                drop(childw);
                // Separators shifted; re-route from the same parent.
                cur = parent;
                continue;
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

    /// Split `child1` under `parent`'s write lock. `parent_idx` is the
    /// slot (possibly the edge) currently routing to `child1`.
    ///
    /// On `Retry` the split was fully undone and the parent is flagged to
    /// split first.
    fn split_node(
        &self,
        parent: &mut NodeBuf,
        child1: &mut NodeBuf,
        parent_idx: usize,
        root_split: bool,
        ctx: &mut OpContext,
    ) -> Result<Status> {
        let (c2_id, c2_cell) = self.alloc_like(child1)?;
        let mut child2 = c2_cell.write_arc();
        child2.set_next_node(child1.next_node());
        child1.set_next_node(c2_id);
        let filled = child1.occupied_size()?;
        let moved = child1.move_out_to_right_by_size(&mut child2, self.config().split_size(filled))?;
        if moved == 0 {
            // A single entry larger than the split budget cannot move.
            child1.set_next_node(child2.next_node());
            child2.invalidate();
            drop(child2);
            self.store().free_node(c2_id);
            return Ok(Status::SpaceNotAvail);
        }
        let split_key: K = child1.last_key()?;
        let mut kb: Vec<u8> = Vec::with_capacity(split_key.serialized_size());
        split_key.serialize_into(&mut kb);
        let mut c1b: Vec<u8> = Vec::with_capacity(8);
        child1.node_id().serialize_into(&mut c1b);
        if !parent.insert_at(parent_idx, &kb, &c1b)? {
            // Undo: the promoted separator does not fit, so the parent
            // itself must split before this child can.
            let pulled = child1.move_in_from_right_by_size(&mut child2, moved)?;
            debug_assert_eq!(pulled, moved);
            child1.set_next_node(child2.next_node());
            child2.invalidate();
            drop(child2);
            self.store().free_node(c2_id);
            ctx.force_split = Some(parent.node_id());
            trace!(parent = %parent.node_id(), "separator promotion failed, splitting parent first");
            return Ok(Status::Retry);
        }
        // The slot that used to route to child1 (possibly the edge) now
        // routes to the new right sibling.
        let mut c2b: Vec<u8> = Vec::with_capacity(8);
        c2_id.serialize_into(&mut c2b);
        parent.update_at(parent_idx + 1, None, &c2b)?;
        if ctx.force_split == Some(child1.node_id()) {
            ctx.force_split = None;
        }
        self.store().on_split(parent, child1, &child2, root_split);
        self.store().write_node(&mut child2, None);
        self.store().write_node(child1, Some(&child2));
        self.store().write_node(parent, Some(child1));
        trace!(
            parent = %parent.node_id(),
            left = %child1.node_id(),
            right = %c2_id,
            root_split,
            "split node"
        );
        Ok(Status::Success)
    }

    /// Grow the tree by one level. The root keeps its id: its contents are
    /// swapped into a fresh child, the root is reborn as an interior node
    /// over that child, and the overfull child is split in place.
    fn check_split_root(&self, key_size: usize, val_size: usize, ctx: &mut OpContext) -> Result<()> {
        let _tx = self.tree_lock_exclusive();
        let Some(mut root) = self.lock_node(self.root_id(), LockType::Write)? else {
            return Err(BtreeError::Corruption("root node unavailable"));
        };
        if !self.is_split_needed(root.node(), key_size, val_size, ctx)? {
            // A racer grew the tree first.
            return Ok(());
        }
        let rnode = write_ref(&mut root)?;
        let (child_id, child_cell) = self.alloc_like(rnode)?;
        let mut child = child_cell.write_arc();
        self.store().swap_node(rnode, &mut child);
        rnode.reinit(false, NodeShape::for_interior::<K>());
        rnode.set_edge_child(child_id);
        let st = self.split_node(rnode, &mut child, 0, true, ctx)?;
        if st != Status::Success {
            return st.into_result();
        }
        if ctx.force_split == Some(rnode.node_id()) {
            ctx.force_split = None;
        }
        trace!(root = %rnode.node_id(), child = %child_id, "split root");
        Ok(())
    }

    /// Overwrite the value of every entry in the request's range, walking
    /// the leaf chain under per-leaf write locks.
    ///
    /// Values are rewritten in place; no entry changes size class enough
    /// to force a split, so a growing value that no longer fits its leaf
    /// fails the request.
    fn update_range(&self, req: &mut RangeUpdate<K, V>) -> Result<()> {
        let mut vb: Vec<u8> = Vec::with_capacity(req.value.serialized_size());
        req.value.serialize_into(&mut vb);
        let working = req.range.clone();
        let _tl = self.tree_lock_shared();
        let Some(mut leaf) = self.descend_to_leaf(&working, LockType::Write)? else {
            return Ok(());
        };
        loop {
            let node = write_ref(&mut leaf)?;
            let (start, count) = node.get_all(&working, usize::MAX)?;
            for idx in start..start + count {
                if !node.update_at(idx, None, &vb)? {
                    return Err(BtreeError::PutFailed("range update value does not fit"));
                }
                req.updated += 1;
            }
            if count > 0 {
                self.store().write_node(node, None);
            }
            // An entry past the matched run means the range end falls
            // inside this leaf.
            if start + count < node.entry_count() {
                return Ok(());
            }
            let next = node.next_node();
            if !next.is_valid() {
                return Ok(());
            }
            // Chain coupling: the held lock keeps the next leaf from being
            // merged away before we reach it.
            let Some(nextw) = self.lock_node(next, LockType::Write)? else {
                return Err(BtreeError::Corruption("leaf chain link vanished mid-walk"));
            };
            leaf = nextw;
        }
    }
}
