//! Read paths: coupled descent and point/any-match lookups.

use std::cmp::Ordering;

use crate::error::{BtreeError, Result};
use crate::kv::{Key, KeyRange, MatchSelect, Value};
use crate::node::NodeBuf;
use crate::request::GetRequest;
use crate::store::NodeStore;
use crate::tree::{Btree, LockType, LockedNode};

/// Whether a missed `ClosestFit` search still yields a usable slot: the
/// reported index must hold a key below the range, not the insertion
/// boundary above it.
pub(crate) fn closest_below<K: Key>(
    node: &NodeBuf,
    range: &KeyRange<K>,
    idx: usize,
) -> Result<bool> {
    if range.select != MatchSelect::ClosestFit || idx >= node.entry_count() {
        return Ok(false);
    }
    Ok(node.key_at::<K>(idx)?.compare_range(range) == Ordering::Less)
}

impl<K: Key, V: Value, S: NodeStore> Btree<K, V, S> {
    /// Execute a lookup request, filling its output slots.
    ///
    /// Returns `NotFound` as an error, matching the status taxonomy; use
    /// [`Btree::get_value`] for an `Option`-shaped point lookup.
    pub fn get(&self, req: &mut GetRequest<K, V>) -> Result<()> {
        let _tl = self.tree_lock_shared();
        match req {
            GetRequest::Single { key, value } => {
                let range = KeyRange::single(key.clone());
                match self.do_get(&range)? {
                    Some((_, v)) => {
                        *value = Some(v);
                        Ok(())
                    }
                    None => Err(BtreeError::NotFound("key")),
                }
            }
            GetRequest::Any { range, key, value } => match self.do_get(range)? {
                Some((k, v)) => {
                    *key = Some(k);
                    *value = Some(v);
                    Ok(())
                }
                None => Err(BtreeError::NotFound("range match")),
            },
        }
    }

    /// Point lookup returning `None` when the key is absent.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let _tl = self.tree_lock_shared();
        let range = KeyRange::single(key.clone());
        Ok(self.do_get(&range)?.map(|(_, v)| v))
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get_value(key)?.is_some())
    }

    /// Search under the shared tree lock (held by the caller).
    fn do_get(&self, range: &KeyRange<K>) -> Result<Option<(K, V)>> {
        let Some(leaf) = self.descend_to_leaf(range, LockType::Read)? else {
            return Ok(None);
        };
        let node = leaf.node();
        let (found, idx) = node.find(range)?;
        if !found && !closest_below::<K>(node, range, idx)? {
            return Ok(None);
        }
        let key: K = node.key_at(idx)?;
        let value: V = node.value_at(idx)?;
        Ok(Some((key, value)))
    }

    /// Lock-coupled walk from the root to the leaf that owns `range`'s
    /// start. The leaf comes back under `leaf_lock`; interior levels are
    /// always read-locked and released as soon as the child lock is held.
    pub(crate) fn descend_to_leaf(
        &self,
        range: &KeyRange<K>,
        leaf_lock: LockType,
    ) -> Result<Option<LockedNode>> {
        let Some(mut cur) = self.lock_node(self.root_id(), LockType::Read)? else {
            return Err(BtreeError::Corruption("root node unavailable"));
        };
        loop {
            if cur.node().is_leaf() {
                // Only the root-as-leaf reaches here read-locked; root
                // restructuring needs the exclusive tree lock, which the
                // caller's shared hold blocks.
                if leaf_lock == LockType::Write && !cur.is_write() {
                    let Some(w) = self.relock_write(cur)? else {
                        return Ok(None);
                    };
                    return Ok(Some(w));
                }
                return Ok(Some(cur));
            }
            let idx = self.descent_index(cur.node(), range)?;
            let child_id = cur.node().child_at(idx)?;
            let Some(child) = self.lock_node(child_id, LockType::Read)? else {
                return Err(BtreeError::Corruption("child vanished during coupled descent"));
            };
            if child.node().is_leaf() && leaf_lock == LockType::Write {
                // Relock the leaf for writing while the parent is still
                // held, so the leaf cannot be split or merged in between.
                let Some(childw) = self.relock_write(child)? else {
                    return Err(BtreeError::Corruption("leaf invalidated under parent lock"));
                };
                cur = childw;
            } else {
                cur = child;
            }
        }
    }
}
