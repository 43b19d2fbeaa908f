//! Request and cursor types for the public tree operations.
//!
//! Each operation family is a closed union over its single-key and range
//! intents. Requests are mutable: output slots (`existing`, `removed`,
//! cursor position) are filled in by the engine.

use crate::kv::{Key, KeyRange, PutType, Value};

/// Mutation request: a single keyed put or a range-wide value update.
#[derive(Debug)]
pub enum PutRequest<K, V> {
    /// Apply `put_type` to one key.
    Single(SinglePut<K, V>),
    /// Overwrite the value of every key inside a range.
    Range(RangeUpdate<K, V>),
}

/// One-key mutation with its put-type policy.
#[derive(Debug)]
pub struct SinglePut<K, V> {
    /// Key to mutate.
    pub key: K,
    /// New (or appended) value.
    pub value: V,
    /// Presence policy.
    pub put_type: PutType,
    /// Prior value, filled in when one was overwritten or appended to.
    pub existing: Option<V>,
}

impl<K: Key, V: Value> SinglePut<K, V> {
    /// Request applying `put_type` to `key`.
    pub fn new(key: K, value: V, put_type: PutType) -> Self {
        Self {
            key,
            value,
            put_type,
            existing: None,
        }
    }
}

/// Range-wide value replacement.
#[derive(Debug)]
pub struct RangeUpdate<K, V> {
    /// Keys to update.
    pub range: KeyRange<K>,
    /// Value written over every matched entry.
    pub value: V,
    /// Number of entries updated, filled in by the engine.
    pub updated: usize,
}

impl<K: Key, V: Value> RangeUpdate<K, V> {
    /// Request replacing the value of every key in `range`.
    pub fn new(range: KeyRange<K>, value: V) -> Self {
        Self {
            range,
            value,
            updated: 0,
        }
    }
}

/// Point or any-match lookup.
#[derive(Debug)]
pub enum GetRequest<K, V> {
    /// Exact-key lookup.
    Single {
        /// Key to look up.
        key: K,
        /// Matched value, filled in on success.
        value: Option<V>,
    },
    /// First entry matching a range, honoring the range's selector.
    Any {
        /// Range to probe.
        range: KeyRange<K>,
        /// Matched key, filled in on success.
        key: Option<K>,
        /// Matched value, filled in on success.
        value: Option<V>,
    },
}

impl<K: Key, V: Value> GetRequest<K, V> {
    /// Exact-key lookup request.
    pub fn single(key: K) -> Self {
        Self::Single { key, value: None }
    }

    /// Any-match lookup request over `range`.
    pub fn any(range: KeyRange<K>) -> Self {
        Self::Any {
            range,
            key: None,
            value: None,
        }
    }
}

/// Point or any-match removal.
#[derive(Debug)]
pub enum RemoveRequest<K, V> {
    /// Exact-key removal.
    Single {
        /// Key to remove.
        key: K,
        /// Removed value, filled in on success.
        removed: Option<V>,
    },
    /// Remove one entry matching a range.
    Any {
        /// Range to probe.
        range: KeyRange<K>,
        /// Removed key, filled in on success.
        key: Option<K>,
        /// Removed value, filled in on success.
        removed: Option<V>,
    },
}

impl<K: Key, V: Value> RemoveRequest<K, V> {
    /// Exact-key removal request.
    pub fn single(key: K) -> Self {
        Self::Single { key, removed: None }
    }

    /// Any-match removal request over `range`.
    pub fn any(range: KeyRange<K>) -> Self {
        Self::Any {
            range,
            key: None,
            removed: None,
        }
    }
}

/// How a range query walks the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// Descend once, then sweep the leaf sibling chain; pagination resumes
    /// by re-descending from the cursor key.
    #[default]
    SweepNonIntrusive,
    /// Accepted for compatibility; executed as the non-intrusive sweep.
    /// Retaining leaf locks across calls invites deadlocks.
    SweepIntrusive,
    /// Re-descend from the root and fan out per child, for when the
    /// sibling chain is under suspicion.
    TreeTraversal,
}

/// Resumable position within a paginated query.
#[derive(Debug, Clone)]
pub struct QueryCursor<K> {
    /// Last key returned by the previous batch.
    pub last_key: Option<K>,
}

impl<K> Default for QueryCursor<K> {
    fn default() -> Self {
        Self { last_key: None }
    }
}

/// Paginated range query.
#[derive(Debug)]
pub struct QueryRequest<K> {
    /// Keys to return.
    pub range: KeyRange<K>,
    /// Traversal strategy.
    pub query_type: QueryType,
    /// Maximum entries returned per call.
    pub batch_size: usize,
    /// Resume position, updated by every call.
    pub cursor: QueryCursor<K>,
}

impl<K: Key> QueryRequest<K> {
    /// Sweep query over `range` returning at most `batch_size` entries per
    /// call.
    pub fn new(range: KeyRange<K>, batch_size: usize) -> Self {
        Self {
            range,
            query_type: QueryType::default(),
            batch_size,
            cursor: QueryCursor::default(),
        }
    }

    /// Same query with an explicit traversal strategy.
    pub fn with_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    /// The input range narrowed past the cursor position.
    pub(crate) fn working_range(&self) -> KeyRange<K> {
        let mut range = self.range.clone();
        if let Some(last) = &self.cursor.last_key {
            range.resume_after(last.clone());
        }
        range
    }
}
