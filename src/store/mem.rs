//! Pure-memory node store: an arena of owned slots addressed by
//! generation-checked handles.
//!
//! A [`NodeId`] packs the arena index in its low 32 bits and the slot's
//! reuse generation in its high 32 bits. Freeing a slot bumps the
//! generation, so a handle minted before the free can never resolve to
//! the slot's next occupant.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::error::{BtreeError, Result, Status};
use crate::node::{NodeBuf, NodeId, NodeShape};
use crate::store::{NodeRef, NodeStore, PrecommitHooks};

struct Slot {
    reuse_gen: u32,
    cell: Option<NodeRef>,
}

struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

/// In-memory reference implementation of the node-store contract.
pub struct MemStore {
    node_size: usize,
    max_nodes: Option<usize>,
    arena: Mutex<Arena>,
}

impl MemStore {
    /// Store handing out nodes of `node_size` bytes.
    pub fn new(node_size: usize) -> Self {
        Self {
            node_size,
            max_nodes: None,
            arena: Mutex::new(Arena {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Store that refuses allocations beyond `max_nodes` live nodes.
    pub fn with_capacity(node_size: usize, max_nodes: usize) -> Self {
        Self {
            max_nodes: Some(max_nodes),
            ..Self::new(node_size)
        }
    }

    fn encode(idx: u32, reuse_gen: u32) -> NodeId {
        NodeId(((reuse_gen as u64) << 32) | (idx as u64 + 1))
    }

    fn decode(id: NodeId) -> Option<(u32, u32)> {
        if !id.is_valid() {
            return None;
        }
        let low = (id.0 & 0xffff_ffff) as u32;
        if low == 0 {
            return None;
        }
        Some((low - 1, (id.0 >> 32) as u32))
    }
}

impl PrecommitHooks for MemStore {}

impl NodeStore for MemStore {
    fn alloc_node(&self, is_leaf: bool, shape: NodeShape) -> Result<(NodeId, NodeRef)> {
        let mut arena = self.arena.lock();
        if let Some(max) = self.max_nodes {
            if arena.live >= max {
                return Err(BtreeError::SpaceNotAvail);
            }
        }
        let idx = match arena.free.pop() {
            Some(idx) => idx,
            None => {
                arena.slots.push(Slot {
                    reuse_gen: 0,
                    cell: None,
                });
                (arena.slots.len() - 1) as u32
            }
        };
        let reuse_gen = arena.slots[idx as usize].reuse_gen;
        let id = Self::encode(idx, reuse_gen);
        let cell: NodeRef = Arc::new(RwLock::new(NodeBuf::new(self.node_size, id, is_leaf, shape)));
        arena.slots[idx as usize].cell = Some(Arc::clone(&cell));
        arena.live += 1;
        trace!(node = %id, is_leaf, "allocated node");
        Ok((id, cell))
    }

    fn read_node(&self, id: NodeId) -> Result<NodeRef> {
        let (idx, reuse_gen) =
            Self::decode(id).ok_or(BtreeError::Corruption("invalid node handle"))?;
        let arena = self.arena.lock();
        let slot = arena
            .slots
            .get(idx as usize)
            .ok_or(BtreeError::Corruption("node handle beyond arena"))?;
        // A freed or reused slot is a normal race during lock upgrades;
        // the engine converts it into a retry.
        if slot.reuse_gen != reuse_gen {
            return Err(BtreeError::NotFound("node"));
        }
        slot.cell
            .as_ref()
            .map(Arc::clone)
            .ok_or(BtreeError::NotFound("node"))
    }

    fn write_node(&self, node: &mut NodeBuf, _dependent: Option<&NodeBuf>) -> Status {
        node.update_checksum();
        Status::Success
    }

    fn write_node_sync(&self, node: &mut NodeBuf) -> Status {
        node.update_checksum();
        Status::Success
    }

    fn swap_node(&self, a: &mut NodeBuf, b: &mut NodeBuf) {
        a.swap_contents(b);
    }

    fn refresh_node(&self, _node: &NodeBuf, _write_modifiable: bool) -> Status {
        // Buffers are never modified behind the engine's back in memory.
        Status::Success
    }

    fn free_node(&self, id: NodeId) {
        let Some((idx, reuse_gen)) = Self::decode(id) else {
            return;
        };
        let mut arena = self.arena.lock();
        let Some(slot) = arena.slots.get_mut(idx as usize) else {
            return;
        };
        if slot.reuse_gen != reuse_gen || slot.cell.is_none() {
            return;
        }
        slot.cell = None;
        slot.reuse_gen = slot.reuse_gen.wrapping_add(1);
        arena.free.push(idx);
        arena.live -= 1;
        trace!(node = %id, "freed node");
    }

    fn node_count(&self) -> usize {
        self.arena.lock().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LayoutKind;

    fn shape() -> NodeShape {
        NodeShape {
            layout: LayoutKind::Simple,
            fixed_key_size: 8,
            fixed_val_size: 8,
        }
    }

    #[test]
    fn alloc_read_free_cycle() {
        let store = MemStore::new(512);
        let (id, cell) = store.alloc_node(true, shape()).expect("alloc");
        assert_eq!(store.node_count(), 1);
        assert_eq!(cell.read().node_id(), id);

        let again = store.read_node(id).expect("read");
        assert!(Arc::ptr_eq(&cell, &again));

        store.free_node(id);
        assert_eq!(store.node_count(), 0);
        assert!(store.read_node(id).is_err(), "freed handle must not resolve");
    }

    #[test]
    fn reused_slot_rejects_stale_handle() {
        let store = MemStore::new(512);
        let (old_id, _) = store.alloc_node(true, shape()).expect("alloc");
        store.free_node(old_id);
        let (new_id, _) = store.alloc_node(true, shape()).expect("alloc");
        assert_ne!(old_id, new_id);
        assert!(store.read_node(old_id).is_err());
        assert!(store.read_node(new_id).is_ok());
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let store = MemStore::with_capacity(512, 2);
        let (a, _) = store.alloc_node(true, shape()).expect("alloc");
        let (_b, _) = store.alloc_node(true, shape()).expect("alloc");
        assert!(matches!(
            store.alloc_node(true, shape()),
            Err(BtreeError::SpaceNotAvail)
        ));
        store.free_node(a);
        assert!(store.alloc_node(true, shape()).is_ok());
    }
}
