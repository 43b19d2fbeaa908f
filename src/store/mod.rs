//! Backing-store contract the engine mutates nodes through.
//!
//! The engine never owns node memory; it asks the store for handles and
//! locks them through the store-issued cells. A persistent store maps
//! [`NodeId`]s to disk blocks and implements the precommit hooks to feed
//! its journal; [`MemStore`] is the reference pure-memory implementation.

mod mem;

pub use mem::MemStore;

use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::error::{Result, Status};
use crate::node::{NodeBuf, NodeId, NodeShape};

/// Shared handle to a node's buffer and its reader-writer lock.
///
/// The `Arc` count is the node's pin count: a traversal may keep a node
/// alive after releasing its lock simply by holding the ref.
pub type NodeRef = Arc<RwLock<NodeBuf>>;

/// Owned read guard over a node buffer.
pub type NodeReadGuard = ArcRwLockReadGuard<RawRwLock, NodeBuf>;

/// Owned write guard over a node buffer.
pub type NodeWriteGuard = ArcRwLockWriteGuard<RawRwLock, NodeBuf>;

/// Notification points for an external journal/checkpoint integration.
///
/// Every hook defaults to a no-op so a pure in-memory store implements
/// nothing.
pub trait PrecommitHooks {
    /// A fresh tree is about to publish `root` as its root node.
    fn on_create_root(&self, _root: &NodeBuf) {}

    /// `left` is about to split into `left`/`right` under `parent`.
    fn on_split(&self, _parent: &NodeBuf, _left: &NodeBuf, _right: &NodeBuf, _root_split: bool) {}

    /// A merge window under `parent` is about to commit; `freed` lists the
    /// nodes leaving the tree.
    fn on_merge(&self, _parent: &NodeBuf, _leftmost: &NodeBuf, _freed: &[NodeId]) {}
}

/// Node allocation, lookup, and write-out surface.
pub trait NodeStore: PrecommitHooks + Send + Sync {
    /// Allocate and initialize a node. Returns the new id and its cell.
    fn alloc_node(&self, is_leaf: bool, shape: NodeShape) -> Result<(NodeId, NodeRef)>;

    /// Resolve a node id to its cell.
    ///
    /// A stale handle (the slot was freed, or freed and reused since the
    /// id was minted) fails with `NotFound`, which the engine converts
    /// into an operation restart. Malformed handles are corruption.
    fn read_node(&self, id: NodeId) -> Result<NodeRef>;

    /// Persist a dirty node. `dependent` must reach storage no later than
    /// `node`; pure-memory stores ignore it.
    fn write_node(&self, node: &mut NodeBuf, dependent: Option<&NodeBuf>) -> Status;

    /// Persist a node and wait for durability.
    fn write_node_sync(&self, node: &mut NodeBuf) -> Status;

    /// Exchange the contents of two nodes, keeping both identities in
    /// place. Root split and collapse are built on this.
    fn swap_node(&self, a: &mut NodeBuf, b: &mut NodeBuf);

    /// Revalidate a node buffer before use; `write_modifiable` signals the
    /// caller intends to mutate it.
    fn refresh_node(&self, node: &NodeBuf, write_modifiable: bool) -> Status;

    /// Return a node to the store. The caller must have invalidated it.
    fn free_node(&self, id: NodeId);

    /// Number of live nodes.
    fn node_count(&self) -> usize;
}
