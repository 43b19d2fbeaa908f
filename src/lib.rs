//! A generic, embeddable, concurrent ordered index.
//!
//! `ordbtree` keeps serialized keys and values in fixed-size node buffers
//! arranged as a B+Tree. The engine is generic over the key and value
//! types (see [`Key`] and [`Value`]) and over the node store backing it
//! (see [`NodeStore`]); the bundled [`MemStore`] is a pure in-memory
//! arena with generation-checked handles.
//!
//! Concurrency follows lock coupling: descents hold at most a parent and
//! a child lock at a time, upgrades re-check the node's generation, and
//! any lost race restarts the operation from the root. The root node
//! never changes identity; growing or shrinking the tree swaps the
//! root's contents under a tree-wide exclusive lock.
//!
//! ```
//! use ordbtree::{Btree, BtreeConfig};
//!
//! let tree: Btree<u64, u64> = Btree::new(BtreeConfig::with_node_size(4096))?;
//! tree.insert(7, 700)?;
//! assert_eq!(tree.get_value(&7)?, Some(700));
//! assert_eq!(tree.remove_key(&7)?, Some(700));
//! # Ok::<(), ordbtree::BtreeError>(())
//! ```

pub mod config;
pub mod error;
pub mod kv;
pub mod node;
pub mod request;
pub mod store;
pub mod tree;

pub use config::BtreeConfig;
pub use error::{BtreeError, Result, Status};
pub use kv::{ExtentKey, Key, KeyRange, MatchSelect, PutType, Value};
pub use node::{LayoutKind, NodeBuf, NodeId, NodeShape};
pub use request::{
    GetRequest, PutRequest, QueryCursor, QueryRequest, QueryType, RangeUpdate, RemoveRequest,
    SinglePut,
};
pub use store::{MemStore, NodeStore, PrecommitHooks};
pub use tree::{Btree, TreeStatus};
