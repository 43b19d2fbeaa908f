//! Range queries: leaf-chain sweeps and root-fanned traversals, paginated
//! through a resumable cursor.

use std::cmp::Ordering;

use crate::error::{BtreeError, Result, Status};
use crate::kv::{Key, KeyRange, MatchSelect, Value};
use crate::node::NodeBuf;
use crate::request::{QueryRequest, QueryType};
use crate::store::NodeStore;
use crate::tree::{Btree, LockType, LockedNode};

/// Outcome of scanning one leaf.
enum LeafScan {
    /// An entry beyond the range end was seen; the query is complete.
    RangeDone,
    /// The leaf ran out with the range still open.
    LeafDone,
    /// The batch filled while another match was in sight.
    BatchFull,
}

impl<K: Key, V: Value, S: NodeStore> Btree<K, V, S> {
    /// Run (or resume) a range query, appending up to `batch_size` entries
    /// to `out`. Returns `true` when more matches remain past this batch;
    /// call again with the same request to continue.
    pub fn query(&self, req: &mut QueryRequest<K>, out: &mut Vec<(K, V)>) -> Result<bool> {
        self.query_with(req, |k: &K, v: &V| Some((k.clone(), v.clone())), out)
    }

    /// [`Btree::query`] with a per-entry transform. An entry the transform
    /// maps to `None` is skipped and does not count toward the batch.
    pub fn query_with<F, T>(
        &self,
        req: &mut QueryRequest<K>,
        transform: F,
        out: &mut Vec<T>,
    ) -> Result<bool>
    where
        F: Fn(&K, &V) -> Option<T>,
    {
        if req.batch_size == 0 {
            return Err(BtreeError::InvalidArgument(
                "batch_size must be at least 1".into(),
            ));
        }
        let mut added = 0usize;
        loop {
            let st = match req.query_type {
                QueryType::SweepNonIntrusive | QueryType::SweepIntrusive => {
                    self.sweep_query(req, &transform, out, &mut added)?
                }
                QueryType::TreeTraversal => self.traversal_query(req, &transform, out, &mut added)?,
            };
            match st {
                // The cursor and batch count survive a restart, so nothing
                // is re-emitted and the call never exceeds `batch_size`.
                Status::Retry => continue,
                Status::HasMore => return Ok(true),
                other => return other.into_result().map(|_| false),
            }
        }
    }

    /// Descend once to the first overlapping leaf, then follow the sibling
    /// chain under read-lock coupling.
    fn sweep_query<F, T>(
        &self,
        req: &mut QueryRequest<K>,
        transform: &F,
        out: &mut Vec<T>,
        added: &mut usize,
    ) -> Result<Status>
    where
        F: Fn(&K, &V) -> Option<T>,
    {
        let _tl = self.tree_lock_shared();
        let working = req.working_range();
        let Some(mut leaf) = self.descend_to_leaf(&working, LockType::Read)? else {
            return Ok(Status::Success);
        };
        loop {
            match self.scan_leaf(leaf.node(), &working, req, transform, out, added)? {
                LeafScan::RangeDone => return Ok(Status::Success),
                LeafScan::BatchFull => return Ok(Status::HasMore),
                LeafScan::LeafDone => {}
            }
            let next = leaf.node().next_node();
            if !next.is_valid() {
                return Ok(Status::Success);
            }
            let Some(next_leaf) = self.lock_node(next, LockType::Read)? else {
                // The link raced a rebalance; resume from the cursor.
                return Ok(Status::Retry);
            };
            leaf = next_leaf;
        }
    }

    /// Re-descend from the root and fan out child by child. Holds the
    /// read-locked path from the root while visiting, so it never relies
    /// on the sibling chain.
    fn traversal_query<F, T>(
        &self,
        req: &mut QueryRequest<K>,
        transform: &F,
        out: &mut Vec<T>,
        added: &mut usize,
    ) -> Result<Status>
    where
        F: Fn(&K, &V) -> Option<T>,
    {
        let _tl = self.tree_lock_shared();
        let working = req.working_range();
        let Some(root) = self.lock_node(self.root_id(), LockType::Read)? else {
            return Err(BtreeError::Corruption("root node unavailable"));
        };
        self.traverse_node(root, &working, req, transform, out, added)
    }

    fn traverse_node<F, T>(
        &self,
        cur: LockedNode,
        range: &KeyRange<K>,
        req: &mut QueryRequest<K>,
        transform: &F,
        out: &mut Vec<T>,
        added: &mut usize,
    ) -> Result<Status>
    where
        F: Fn(&K, &V) -> Option<T>,
    {
        if cur.node().is_leaf() {
            return Ok(
                match self.scan_leaf(cur.node(), range, req, transform, out, added)? {
                    LeafScan::BatchFull => Status::HasMore,
                    LeafScan::RangeDone | LeafScan::LeafDone => Status::Success,
                },
            );
        }
        let entries = cur.node().entry_count();
        let last_idx = if cur.node().has_valid_edge() {
            entries
        } else {
            entries.saturating_sub(1)
        };
        let start_idx = self.descent_index(cur.node(), range)?;
        // Children past the one owning the range end cannot overlap.
        let end_idx = match range.end_key() {
            None => last_idx,
            Some(end) => {
                let probe = KeyRange::single(end.clone());
                let (_, idx) = cur.node().find(&probe)?;
                idx.min(last_idx)
            }
        };
        for idx in start_idx..=end_idx {
            let child_id = cur.node().child_at(idx)?;
            let Some(child) = self.lock_node(child_id, LockType::Read)? else {
                return Err(BtreeError::Corruption("child vanished during coupled descent"));
            };
            if self.traverse_node(child, range, req, transform, out, added)? == Status::HasMore {
                return Ok(Status::HasMore);
            }
        }
        Ok(Status::Success)
    }

    /// Emit a leaf's in-range entries, advancing the cursor per entry.
    /// The batch limit is checked before consuming, so `BatchFull` always
    /// means a real match was left behind.
    fn scan_leaf<F, T>(
        &self,
        node: &NodeBuf,
        range: &KeyRange<K>,
        req: &mut QueryRequest<K>,
        transform: &F,
        out: &mut Vec<T>,
        added: &mut usize,
    ) -> Result<LeafScan>
    where
        F: Fn(&K, &V) -> Option<T>,
    {
        let total = node.entry_count();
        let probe = range.clone().with_select(MatchSelect::LeftMost);
        let (_, start) = node.find(&probe)?;
        for idx in start..total {
            let key: K = node.key_at(idx)?;
            match key.compare_range(range) {
                Ordering::Less => continue,
                Ordering::Greater => return Ok(LeafScan::RangeDone),
                Ordering::Equal => {
                    if *added == req.batch_size {
                        return Ok(LeafScan::BatchFull);
                    }
                    let value: V = node.value_at(idx)?;
                    if let Some(item) = transform(&key, &value) {
                        out.push(item);
                        *added += 1;
                    }
                    req.cursor.last_key = Some(key);
                }
            }
        }
        Ok(LeafScan::LeafDone)
    }
}
