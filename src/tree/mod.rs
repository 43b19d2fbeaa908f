//! The tree engine: lock-coupled traversal over an abstract node store.
//!
//! Public operations run to completion on the calling thread. Structural
//! changes that require a lock upgrade can fail a generation re-check;
//! the per-operation loop then restarts from the root. The tree-level
//! lock is shared by all operations and taken exclusively only to swap
//! the root's contents (root split and collapse).

mod debug;
mod mutate;
mod query;
mod remove;
mod search;

pub use debug::TreeStatus;

use std::marker::PhantomData;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::config::BtreeConfig;
use crate::error::{BtreeError, Result};
use crate::kv::{Key, KeyRange, Value};
use crate::node::{NodeBuf, NodeId, NodeShape};
use crate::store::{MemStore, NodeReadGuard, NodeRef, NodeStore, NodeWriteGuard};

/// Which lock a traversal step takes on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockType {
    Read,
    Write,
}

pub(crate) enum Guard {
    Read(NodeReadGuard),
    Write(NodeWriteGuard),
}

/// A node pinned by its cell ref and held under one of its locks.
pub(crate) struct LockedNode {
    pub id: NodeId,
    pub cell: NodeRef,
    guard: Guard,
}

impl LockedNode {
    pub fn node(&self) -> &NodeBuf {
        match &self.guard {
            Guard::Read(g) => g,
            Guard::Write(g) => g,
        }
    }

    /// Mutable access; `None` when only a read lock is held.
    pub fn node_mut(&mut self) -> Option<&mut NodeBuf> {
        match &mut self.guard {
            Guard::Read(_) => None,
            Guard::Write(g) => Some(&mut *g),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.guard, Guard::Write(_))
    }
}

/// Mutable node access that must succeed because the caller holds the
/// node's write lock.
pub(crate) fn write_ref(locked: &mut LockedNode) -> Result<&mut NodeBuf> {
    locked
        .node_mut()
        .ok_or(BtreeError::Corruption("write access without an exclusive lock"))
}

/// Per-operation mutable state threaded down the call chain.
///
/// Replaces any notion of thread-local operation scratch; the engine is
/// reentrant because everything an operation tracks lives here.
#[derive(Debug, Default)]
pub(crate) struct OpContext {
    /// Parent that must split on the next pass because a promoted
    /// separator did not fit during a failed split.
    pub force_split: Option<NodeId>,
    /// Restarts taken so far, for tracing.
    pub retries: u32,
}

/// Generic, concurrent ordered index over a node store.
pub struct Btree<K: Key, V: Value, S: NodeStore = MemStore> {
    cfg: BtreeConfig,
    store: S,
    root_id: NodeId,
    tree_lock: RwLock<()>,
    _kv: PhantomData<fn() -> (K, V)>,
}

impl<K: Key, V: Value> Btree<K, V, MemStore> {
    /// Tree backed by a fresh in-memory store.
    pub fn new(cfg: BtreeConfig) -> Result<Self> {
        let store = MemStore::new(cfg.node_size);
        Self::with_store(cfg, store)
    }
}

impl<K: Key, V: Value, S: NodeStore> Btree<K, V, S> {
    /// Tree backed by a caller-provided store. Allocates the initial root
    /// leaf and runs the create-root precommit hook.
    pub fn with_store(cfg: BtreeConfig, store: S) -> Result<Self> {
        cfg.validate()?;
        let (root_id, cell) = store.alloc_node(true, NodeShape::for_leaf::<K, V>())?;
        {
            let mut root = cell.write_arc();
            store.on_create_root(&root);
            store.write_node(&mut root, None);
        }
        trace!(root = %root_id, "created tree");
        Ok(Self {
            cfg,
            store,
            root_id,
            tree_lock: RwLock::new(()),
            _kv: PhantomData,
        })
    }

    /// Sizing policy this tree was built with.
    pub fn config(&self) -> &BtreeConfig {
        &self.cfg
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// Shared hold that blocks root restructuring for its duration.
    pub(crate) fn tree_lock_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.tree_lock.read()
    }

    /// Exclusive hold for swapping the root's contents.
    pub(crate) fn tree_lock_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.tree_lock.write()
    }

    // ---- lock primitives ------------------------------------------------

    /// Resolve and lock a node. `Ok(None)` means the handle went stale
    /// under us (a racing free during an upgrade window) and the caller
    /// must retry from the root.
    pub(crate) fn lock_node(&self, id: NodeId, ltype: LockType) -> Result<Option<LockedNode>> {
        let cell = match self.store.read_node(id) {
            Ok(cell) => cell,
            Err(BtreeError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let guard = match ltype {
            LockType::Read => Guard::Read(cell.read_arc()),
            LockType::Write => Guard::Write(cell.write_arc()),
        };
        let locked = LockedNode { id, cell, guard };
        locked.node().check_magic()?;
        match self
            .store
            .refresh_node(locked.node(), ltype == LockType::Write)
        {
            crate::Status::Success => {}
            crate::Status::CrcMismatch => {
                return Err(BtreeError::Corruption("node checksum mismatch"))
            }
            // Checkpoint pass-throughs restart the operation.
            crate::Status::Retry
            | crate::Status::CpMismatch
            | crate::Status::FastPathNotPossible => return Ok(None),
            other => return other.into_result().map(|_| None),
        }
        if !locked.node().is_valid() {
            return Ok(None);
        }
        Ok(Some(locked))
    }

    /// Release a read lock and reacquire it as a write lock, re-checking
    /// the node's generation across the window. `Ok(None)` means the node
    /// changed (or died) in between and the operation must restart.
    pub(crate) fn upgrade(&self, locked: LockedNode) -> Result<Option<LockedNode>> {
        if locked.is_write() {
            return Ok(Some(locked));
        }
        let id = locked.id;
        let cell = locked.cell.clone();
        let gen = locked.node().generation();
        drop(locked);
        let guard = cell.write_arc();
        if !guard.is_valid() || guard.generation() != gen {
            return Ok(None);
        }
        Ok(Some(LockedNode {
            id,
            cell,
            guard: Guard::Write(guard),
        }))
    }

    /// Swap a read lock for a write lock while an ancestor's lock is still
    /// held. Structural changes to this node are blocked by the held
    /// ancestor, so no generation re-check is needed.
    pub(crate) fn relock_write(&self, locked: LockedNode) -> Result<Option<LockedNode>> {
        if locked.is_write() {
            return Ok(Some(locked));
        }
        let id = locked.id;
        let cell = locked.cell.clone();
        drop(locked);
        let guard = cell.write_arc();
        if !guard.is_valid() {
            return Ok(None);
        }
        Ok(Some(LockedNode {
            id,
            cell,
            guard: Guard::Write(guard),
        }))
    }

    // ---- shared traversal helpers ----------------------------------------

    /// Index of the child an interior node routes `range`'s start to.
    pub(crate) fn descent_index(&self, node: &NodeBuf, range: &KeyRange<K>) -> Result<usize> {
        match range.start_key() {
            None => Ok(0),
            Some(key) => {
                let probe = KeyRange::single(key.clone());
                let (_, idx) = node.find(&probe)?;
                Ok(idx)
            }
        }
    }

    /// Whether `node` lacks room for an entry of the given serialized
    /// sizes (interior nodes are checked against the worst-case
    /// separator), or was flagged to force-split by a failed promotion.
    pub(crate) fn is_split_needed(
        &self,
        node: &NodeBuf,
        key_size: usize,
        val_size: usize,
        ctx: &OpContext,
    ) -> Result<bool> {
        if ctx.force_split == Some(node.node_id()) {
            return Ok(true);
        }
        if node.is_leaf() {
            Ok(!node.has_room_for(key_size, val_size)?)
        } else {
            Ok(!node.has_room_for(self.cfg.max_key_size, 8)?)
        }
    }

    /// Allocate a sibling with the same leafness and layout as `peer`.
    pub(crate) fn alloc_like(&self, peer: &NodeBuf) -> Result<(NodeId, NodeRef)> {
        self.store.alloc_node(peer.is_leaf(), peer.shape()?)
    }

    pub(crate) fn note_retry(&self, ctx: &mut OpContext, site: &'static str) {
        ctx.retries += 1;
        trace!(retries = ctx.retries, site, "restarting operation from root");
    }
}
