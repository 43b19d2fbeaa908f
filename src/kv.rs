//! Key, value, and range contracts the engine is generic over.
//!
//! Nodes store serialized bytes; typed keys and values only exist at the
//! engine boundary. Callers implement [`Key`] and [`Value`] for their own
//! types; fixed-width integer impls are provided for common index shapes.

use std::cmp::Ordering;
use std::fmt::Debug;

use crate::error::{BtreeError, Result};

/// Ordered key stored in the tree.
///
/// `Ord` supplies the total order the tree maintains. Extent keys (keys
/// that are themselves ranges) must order themselves by their end bound so
/// that interior separators stay correct; see [`ExtentKey`].
pub trait Key: Clone + Ord + Debug + Send + Sync + 'static {
    /// Serialized length in bytes.
    fn serialized_size(&self) -> usize;

    /// Append the serialized form to `out`.
    fn serialize_into(&self, out: &mut Vec<u8>);

    /// Rebuild a key from its serialized form.
    fn deserialize(bytes: &[u8]) -> Result<Self>;

    /// Serialized length when every instance is the same size.
    ///
    /// Layouts use this to pick fixed-slot addressing; `None` forces a
    /// variable-key layout.
    fn fixed_size() -> Option<usize> {
        None
    }

    /// Position of this key relative to `range`.
    ///
    /// `Less` means the key sorts below the range start, `Greater` above
    /// the range end, `Equal` means the key is inside the range.
    fn compare_range(&self, range: &KeyRange<Self>) -> Ordering {
        range.position_of(self)
    }
}

/// Keys that span an interval of the key space.
///
/// Such keys compare by their end bound through `Ord`; the extra methods
/// expose the start bound for overlap checks during range updates.
pub trait ExtentKey: Key {
    /// Compare this key's start bound with `other`'s start bound.
    fn compare_start(&self, other: &Self) -> Ordering;

    /// Compare this key's end bound with `other`'s end bound.
    fn compare_end(&self, other: &Self) -> Ordering;
}

/// Value associated with a key.
pub trait Value: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Serialized length in bytes.
    fn serialized_size(&self) -> usize;

    /// Append the serialized form to `out`.
    fn serialize_into(&self, out: &mut Vec<u8>);

    /// Rebuild a value from its serialized form.
    fn deserialize(bytes: &[u8]) -> Result<Self>;

    /// Serialized length when every instance is the same size.
    fn fixed_size() -> Option<usize> {
        None
    }

    /// Extend this value with `other` for the append put types.
    ///
    /// Returns `false` when the type does not support appending, which
    /// fails the put with [`crate::Status::PutFailed`].
    fn append(&mut self, _other: &Self) -> bool {
        false
    }
}

/// Disambiguates which slot a node-local search reports when several
/// entries satisfy the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchSelect {
    /// Any matching slot is acceptable.
    #[default]
    DoNotCare,
    /// The lowest matching slot.
    LeftMost,
    /// The highest matching slot.
    RightMost,
    /// On a miss, report the nearest slot below the range end instead of
    /// the insertion boundary. Used by remove-any.
    ClosestFit,
}

/// Serialized put-type policy for mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutType {
    /// Fail with `PutFailed` when the key already exists.
    InsertOnlyIfNotExists,
    /// Fail with `NotFound` when the key does not exist.
    ReplaceOnlyIfExists,
    /// Insert or overwrite.
    ReplaceIfExistsElseInsert,
    /// Append to the existing value, fail with `NotFound` when absent.
    AppendOnlyIfExists,
    /// Append to the existing value or insert fresh.
    AppendIfExistsElseInsert,
}

/// Half-open-capable search range with a multi-match selector.
#[derive(Debug, Clone)]
pub struct KeyRange<K> {
    start: Option<K>,
    start_incl: bool,
    end: Option<K>,
    end_incl: bool,
    /// How node-local searches break ties between duplicate matches.
    pub select: MatchSelect,
}

impl<K: Key> KeyRange<K> {
    /// Range covering `[start, end]` with explicit inclusivity flags.
    pub fn new(start: K, start_incl: bool, end: K, end_incl: bool) -> Self {
        Self {
            start: Some(start),
            start_incl,
            end: Some(end),
            end_incl,
            select: MatchSelect::DoNotCare,
        }
    }

    /// Range matching exactly one key.
    pub fn single(key: K) -> Self {
        Self::new(key.clone(), true, key, true)
    }

    /// Unbounded range covering the whole key space.
    pub fn all() -> Self {
        Self {
            start: None,
            start_incl: true,
            end: None,
            end_incl: true,
            select: MatchSelect::DoNotCare,
        }
    }

    /// Same bounds with a different multi-match selector.
    pub fn with_select(mut self, select: MatchSelect) -> Self {
        self.select = select;
        self
    }

    /// Start bound, if any.
    pub fn start_key(&self) -> Option<&K> {
        self.start.as_ref()
    }

    /// End bound, if any.
    pub fn end_key(&self) -> Option<&K> {
        self.end.as_ref()
    }

    /// Whether the start bound itself is part of the range.
    pub fn is_start_inclusive(&self) -> bool {
        self.start_incl
    }

    /// Whether the end bound itself is part of the range.
    pub fn is_end_inclusive(&self) -> bool {
        self.end_incl
    }

    /// Position of `key` relative to this range.
    pub fn position_of(&self, key: &K) -> Ordering {
        if let Some(start) = &self.start {
            match key.cmp(start) {
                Ordering::Less => return Ordering::Less,
                Ordering::Equal if !self.start_incl => return Ordering::Less,
                _ => {}
            }
        }
        if let Some(end) = &self.end {
            match key.cmp(end) {
                Ordering::Greater => return Ordering::Greater,
                Ordering::Equal if !self.end_incl => return Ordering::Greater,
                _ => {}
            }
        }
        Ordering::Equal
    }

    /// Whether `key` falls inside the range.
    pub fn contains(&self, key: &K) -> bool {
        self.position_of(key) == Ordering::Equal
    }

    /// Rebase the start to resume a paginated query after `last_key`.
    pub fn resume_after(&mut self, last_key: K) {
        self.start = Some(last_key);
        self.start_incl = false;
    }
}

macro_rules! impl_fixed_uint_kv {
    ($($t:ty),*) => {$(
        impl Key for $t {
            fn serialized_size(&self) -> usize {
                std::mem::size_of::<$t>()
            }

            fn serialize_into(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn deserialize(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; std::mem::size_of::<$t>()] = bytes
                    .try_into()
                    .map_err(|_| BtreeError::Corruption("fixed key length mismatch"))?;
                Ok(<$t>::from_le_bytes(arr))
            }

            fn fixed_size() -> Option<usize> {
                Some(std::mem::size_of::<$t>())
            }
        }

        impl Value for $t {
            fn serialized_size(&self) -> usize {
                std::mem::size_of::<$t>()
            }

            fn serialize_into(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn deserialize(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; std::mem::size_of::<$t>()] = bytes
                    .try_into()
                    .map_err(|_| BtreeError::Corruption("fixed value length mismatch"))?;
                Ok(<$t>::from_le_bytes(arr))
            }

            fn fixed_size() -> Option<usize> {
                Some(std::mem::size_of::<$t>())
            }
        }
    )*};
}

impl_fixed_uint_kv!(u32, u64);

impl Key for String {
    fn serialized_size(&self) -> usize {
        self.len()
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| BtreeError::Corruption("string key is not utf-8"))
    }
}

impl Value for Vec<u8> {
    fn serialized_size(&self) -> usize {
        self.len()
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }

    fn append(&mut self, other: &Self) -> bool {
        self.extend_from_slice(other);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_positions_respect_inclusivity() {
        let range = KeyRange::new(10u64, false, 20u64, true);
        assert_eq!(range.position_of(&10), Ordering::Less);
        assert_eq!(range.position_of(&11), Ordering::Equal);
        assert_eq!(range.position_of(&20), Ordering::Equal);
        assert_eq!(range.position_of(&21), Ordering::Greater);
    }

    #[test]
    fn resume_after_excludes_the_cursor_key() {
        let mut range = KeyRange::new(0u64, true, 100u64, true);
        range.resume_after(42);
        assert!(!range.contains(&42));
        assert!(range.contains(&43));
    }

    #[test]
    fn fixed_keys_round_trip() {
        let k = 0xdead_beefu64;
        let mut buf = Vec::new();
        Key::serialize_into(&k, &mut buf);
        assert_eq!(buf.len(), Key::serialized_size(&k));
        assert_eq!(<u64 as Key>::deserialize(&buf).expect("round trip"), k);
    }

    #[test]
    fn byte_values_append() {
        let mut v = vec![1u8, 2];
        assert!(Value::append(&mut v, &vec![3u8]));
        assert_eq!(v, vec![1, 2, 3]);
    }
}
