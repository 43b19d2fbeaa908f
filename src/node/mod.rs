//! Node buffer: bit-exact header plus a layout-specific slot area.
//!
//! The header occupies the first [`NODE_HEADER_LEN`] bytes of every node
//! buffer:
//!
//! ```text
//! magic:u8 version:u8 checksum:u16 node_id:u64 next_node:u64
//! packed:u32 (entry_count:27 node_type:3 is_leaf:1 valid:1)
//! generation:u64 edge_child:u64
//! ```
//!
//! Everything after the header belongs to the active layout. The layout
//! set is closed: a fixed-slot layout and three slotted-page variants, all
//! dispatched through [`LayoutKind`].

mod simple;
mod varlen;

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::config::BtreeConfig;
use crate::error::{BtreeError, Result, Status};
use crate::kv::{Key, KeyRange, MatchSelect, PutType, Value};

/// Total header length in bytes.
pub const NODE_HEADER_LEN: usize = 40;

const MAGIC: u8 = 0xb7;
const VERSION: u8 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 1;
const CHECKSUM_OFFSET: usize = 2;
const NODE_ID_OFFSET: usize = 4;
const NEXT_NODE_OFFSET: usize = 12;
const PACKED_OFFSET: usize = 20;
const GENERATION_OFFSET: usize = 24;
const EDGE_CHILD_OFFSET: usize = 32;

const ENTRY_COUNT_MASK: u32 = (1 << 27) - 1;
const NODE_TYPE_SHIFT: u32 = 27;
const NODE_TYPE_MASK: u32 = 0x7;
const IS_LEAF_BIT: u32 = 1 << 30;
const VALID_BIT: u32 = 1 << 31;

/// Identifier of a node slot in the backing store.
///
/// The invalid id doubles as the "no edge child" and "no sibling" sentinel
/// in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Sentinel for "no node".
    pub const INVALID: NodeId = NodeId(u64::MAX);

    /// Whether this id refers to a real node.
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Value for NodeId {
    fn serialized_size(&self) -> usize {
        8
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| BtreeError::Corruption("child pointer length mismatch"))?;
        Ok(NodeId(u64::from_le_bytes(arr)))
    }

    fn fixed_size() -> Option<usize> {
        Some(8)
    }
}

/// Closed set of slot-area layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// Fixed-size key and value slots.
    Simple = 1,
    /// Variable-size key, fixed-size value.
    VarKey = 2,
    /// Fixed-size key, variable-size value.
    VarValue = 3,
    /// Both key and value variable-size.
    VarObj = 4,
}

impl LayoutKind {
    fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            1 => Ok(Self::Simple),
            2 => Ok(Self::VarKey),
            3 => Ok(Self::VarValue),
            4 => Ok(Self::VarObj),
            _ => Err(BtreeError::Corruption("unknown node layout")),
        }
    }
}

/// Layout selection plus the fixed record sizes the simple layout embeds
/// in its slot area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeShape {
    /// Which slot-area layout to initialize.
    pub layout: LayoutKind,
    /// Fixed serialized key size; unused by variable-key layouts.
    pub fixed_key_size: usize,
    /// Fixed serialized value size; unused by variable-value layouts.
    pub fixed_val_size: usize,
}

impl NodeShape {
    /// Shape for a leaf holding `K`/`V` entries.
    pub fn for_leaf<K: Key, V: Value>() -> Self {
        let (layout, ksz, vsz) = match (K::fixed_size(), V::fixed_size()) {
            (Some(k), Some(v)) => (LayoutKind::Simple, k, v),
            (None, Some(v)) => (LayoutKind::VarKey, 0, v),
            (Some(k), None) => (LayoutKind::VarValue, k, 0),
            (None, None) => (LayoutKind::VarObj, 0, 0),
        };
        Self {
            layout,
            fixed_key_size: ksz,
            fixed_val_size: vsz,
        }
    }

    /// Shape for an interior node keyed by `K` with child-id values.
    pub fn for_interior<K: Key>() -> Self {
        match K::fixed_size() {
            Some(k) => Self {
                layout: LayoutKind::Simple,
                fixed_key_size: k,
                fixed_val_size: 8,
            },
            None => Self {
                layout: LayoutKind::VarKey,
                fixed_key_size: 0,
                fixed_val_size: 8,
            },
        }
    }
}

/// Owned node buffer with typed header accessors.
///
/// All mutation happens through a store-issued write guard; the buffer
/// itself carries no synchronization.
#[derive(Debug)]
pub struct NodeBuf {
    buf: Vec<u8>,
}

impl NodeBuf {
    /// Freshly initialized node buffer of `size` bytes.
    pub fn new(size: usize, id: NodeId, is_leaf: bool, shape: NodeShape) -> Self {
        let mut node = Self {
            buf: vec![0u8; size],
        };
        node.buf[MAGIC_OFFSET] = MAGIC;
        node.buf[VERSION_OFFSET] = VERSION;
        node.set_node_id(id);
        node.set_next_node(NodeId::INVALID);
        let packed = ((shape.layout as u32) << NODE_TYPE_SHIFT)
            | if is_leaf { IS_LEAF_BIT } else { 0 }
            | VALID_BIT;
        node.set_packed(packed);
        node.set_generation(0);
        node.set_edge_child(NodeId::INVALID);
        if shape.layout == LayoutKind::Simple {
            simple::init_area(&mut node, shape.fixed_key_size, shape.fixed_val_size);
        } else {
            varlen::init_area(&mut node);
        }
        node
    }

    fn read_u16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.buf[off], self.buf[off + 1]])
    }

    fn write_u16(&mut self, off: usize, v: u16) {
        self.buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn read_u32(&self, off: usize) -> u32 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[off..off + 4]);
        u32::from_le_bytes(arr)
    }

    fn write_u32(&mut self, off: usize, v: u32) {
        self.buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn read_u64(&self, off: usize) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&self.buf[off..off + 8]);
        u64::from_le_bytes(arr)
    }

    fn write_u64(&mut self, off: usize, v: u64) {
        self.buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn packed(&self) -> u32 {
        self.read_u32(PACKED_OFFSET)
    }

    fn set_packed(&mut self, v: u32) {
        self.write_u32(PACKED_OFFSET, v);
    }

    /// Validate magic and version.
    pub fn check_magic(&self) -> Result<()> {
        if self.buf[MAGIC_OFFSET] != MAGIC {
            return Err(BtreeError::Corruption("bad node magic"));
        }
        if self.buf[VERSION_OFFSET] != VERSION {
            return Err(BtreeError::Corruption("unsupported node version"));
        }
        Ok(())
    }

    /// Stored header checksum.
    pub fn checksum(&self) -> u16 {
        self.read_u16(CHECKSUM_OFFSET)
    }

    /// Recompute and store the checksum over the slot area.
    pub fn update_checksum(&mut self) {
        let sum = self.compute_checksum();
        self.write_u16(CHECKSUM_OFFSET, sum);
    }

    /// Whether the stored checksum matches the slot area contents.
    pub fn checksum_ok(&self) -> bool {
        self.checksum() == self.compute_checksum()
    }

    fn compute_checksum(&self) -> u16 {
        let crc = crc32fast::hash(&self.buf[NODE_HEADER_LEN..]);
        ((crc >> 16) ^ (crc & 0xffff)) as u16
    }

    /// This node's own id.
    pub fn node_id(&self) -> NodeId {
        NodeId(self.read_u64(NODE_ID_OFFSET))
    }

    /// Record this node's id in the header.
    pub fn set_node_id(&mut self, id: NodeId) {
        self.write_u64(NODE_ID_OFFSET, id.0);
    }

    /// Right sibling in the leaf chain.
    pub fn next_node(&self) -> NodeId {
        NodeId(self.read_u64(NEXT_NODE_OFFSET))
    }

    /// Set the right sibling in the leaf chain.
    pub fn set_next_node(&mut self, id: NodeId) {
        self.write_u64(NEXT_NODE_OFFSET, id.0);
    }

    /// Number of entries currently stored.
    pub fn entry_count(&self) -> usize {
        (self.packed() & ENTRY_COUNT_MASK) as usize
    }

    fn set_entry_count(&mut self, count: usize) {
        debug_assert!(count as u32 <= ENTRY_COUNT_MASK);
        let packed = (self.packed() & !ENTRY_COUNT_MASK) | (count as u32 & ENTRY_COUNT_MASK);
        self.set_packed(packed);
    }

    pub(crate) fn add_entries(&mut self, n: usize) {
        self.set_entry_count(self.entry_count() + n);
    }

    pub(crate) fn sub_entries(&mut self, n: usize) {
        debug_assert!(self.entry_count() >= n);
        self.set_entry_count(self.entry_count() - n);
    }

    /// Active slot-area layout.
    pub fn layout(&self) -> Result<LayoutKind> {
        LayoutKind::from_bits((self.packed() >> NODE_TYPE_SHIFT) & NODE_TYPE_MASK)
    }

    /// Whether this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.packed() & IS_LEAF_BIT != 0
    }

    /// Whether this node is still part of the tree.
    pub fn is_valid(&self) -> bool {
        self.packed() & VALID_BIT != 0
    }

    /// Clear the valid bit ahead of physical reclamation.
    pub fn invalidate(&mut self) {
        let packed = self.packed() & !VALID_BIT;
        self.set_packed(packed);
    }

    /// Mutation counter, bumped on every slot-area change.
    pub fn generation(&self) -> u64 {
        self.read_u64(GENERATION_OFFSET)
    }

    fn set_generation(&mut self, g: u64) {
        self.write_u64(GENERATION_OFFSET, g);
    }

    pub(crate) fn inc_generation(&mut self) {
        let g = self.generation();
        self.set_generation(g + 1);
    }

    /// Implicit last child of an interior node.
    pub fn edge_child(&self) -> NodeId {
        NodeId(self.read_u64(EDGE_CHILD_OFFSET))
    }

    /// Point the implicit last child at `id`.
    pub fn set_edge_child(&mut self, id: NodeId) {
        self.write_u64(EDGE_CHILD_OFFSET, id.0);
    }

    /// Whether the edge child points at a real node.
    pub fn has_valid_edge(&self) -> bool {
        !self.is_leaf() && self.edge_child().is_valid()
    }

    pub(crate) fn invalidate_edge(&mut self) {
        self.set_edge_child(NodeId::INVALID);
    }

    /// Total buffer size, header included.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn area(&self) -> &[u8] {
        &self.buf[NODE_HEADER_LEN..]
    }

    pub(crate) fn area_mut(&mut self) -> &mut [u8] {
        &mut self.buf[NODE_HEADER_LEN..]
    }

    /// Shape descriptor matching this node's live layout.
    pub fn shape(&self) -> Result<NodeShape> {
        let layout = self.layout()?;
        match layout {
            LayoutKind::Simple => {
                let (k, v) = simple::rec_sizes(self);
                Ok(NodeShape {
                    layout,
                    fixed_key_size: k,
                    fixed_val_size: v,
                })
            }
            _ => Ok(NodeShape {
                layout,
                fixed_key_size: 0,
                fixed_val_size: 0,
            }),
        }
    }

    /// Reset this buffer to an empty node of a new shape, keeping its id
    /// and continuing its generation sequence. Root split turns the root
    /// buffer into a fresh interior node this way.
    pub fn reinit(&mut self, is_leaf: bool, shape: NodeShape) {
        let id = self.node_id();
        let gen = self.generation();
        let size = self.size();
        *self = NodeBuf::new(size, id, is_leaf, shape);
        self.set_generation(gen + 1);
    }

    /// Swap the slot areas and entry metadata of two nodes, keeping each
    /// node's identity (id) in place. Used for root split and collapse.
    pub fn swap_contents(&mut self, other: &mut NodeBuf) {
        let my_id = self.node_id();
        let other_id = other.node_id();
        std::mem::swap(&mut self.buf, &mut other.buf);
        self.set_node_id(my_id);
        other.set_node_id(other_id);
        self.inc_generation();
        other.inc_generation();
    }

    // ---- layout dispatch ----------------------------------------------

    /// Key at `idx`, deserialized.
    pub fn key_at<K: Key>(&self, idx: usize) -> Result<K> {
        K::deserialize(self.key_bytes(idx)?)
    }

    /// First key, if any.
    pub fn first_key<K: Key>(&self) -> Result<K> {
        self.key_at(0)
    }

    /// Last key, if any.
    pub fn last_key<K: Key>(&self) -> Result<K> {
        if self.entry_count() == 0 {
            return Err(BtreeError::NotFound("entry"));
        }
        self.key_at(self.entry_count() - 1)
    }

    /// Value at `idx`, deserialized.
    pub fn value_at<V: Value>(&self, idx: usize) -> Result<V> {
        V::deserialize(self.value_bytes(idx)?)
    }

    /// Child id at `idx` of an interior node; `idx == entry_count` maps to
    /// the edge child.
    pub fn child_at(&self, idx: usize) -> Result<NodeId> {
        debug_assert!(!self.is_leaf());
        if idx == self.entry_count() {
            if !self.has_valid_edge() {
                return Err(BtreeError::Corruption("interior node missing edge child"));
            }
            return Ok(self.edge_child());
        }
        self.value_at(idx)
    }

    pub(crate) fn key_bytes(&self, idx: usize) -> Result<&[u8]> {
        if idx >= self.entry_count() {
            return Err(BtreeError::Corruption("key index out of bounds"));
        }
        match self.layout()? {
            LayoutKind::Simple => Ok(simple::key_bytes(self, idx)),
            _ => Ok(varlen::key_bytes(self, idx)),
        }
    }

    pub(crate) fn value_bytes(&self, idx: usize) -> Result<&[u8]> {
        if idx >= self.entry_count() {
            return Err(BtreeError::Corruption("value index out of bounds"));
        }
        match self.layout()? {
            LayoutKind::Simple => Ok(simple::value_bytes(self, idx)),
            _ => Ok(varlen::value_bytes(self, idx)),
        }
    }

    /// Bytes consumed by live entries (records plus payload).
    pub fn occupied_size(&self) -> Result<usize> {
        match self.layout()? {
            LayoutKind::Simple => Ok(simple::occupied_size(self)),
            _ => Ok(varlen::occupied_size(self)),
        }
    }

    /// Bytes still available for new entries.
    pub fn available_size(&self) -> Result<usize> {
        match self.layout()? {
            LayoutKind::Simple => Ok(simple::available_size(self)),
            _ => Ok(varlen::available_size(self)),
        }
    }

    /// Whether an entry of the given serialized sizes fits.
    pub fn has_room_for(&self, key_size: usize, val_size: usize) -> Result<bool> {
        match self.layout()? {
            LayoutKind::Simple => Ok(simple::available_size(self) >= key_size + val_size),
            _ => Ok(varlen::available_size(self) >= varlen::RECORD_LEN + key_size + val_size),
        }
    }

    /// Whether this node has drained enough to be merge-eligible.
    pub fn is_merge_needed(&self, cfg: &BtreeConfig) -> Result<bool> {
        Ok(self.occupied_size()? < cfg.merge_suggested_size())
    }

    /// Insert serialized `key`/`val` at `idx`, shifting later slots right.
    ///
    /// Returns `false` without mutating when the node lacks room.
    pub fn insert_at(&mut self, idx: usize, key: &[u8], val: &[u8]) -> Result<bool> {
        debug_assert!(idx <= self.entry_count());
        let ok = match self.layout()? {
            LayoutKind::Simple => simple::insert_at(self, idx, key, val),
            _ => varlen::insert_at(self, idx, key, val),
        };
        if ok {
            self.add_entries(1);
            self.inc_generation();
        }
        Ok(ok)
    }

    /// Overwrite the value (and optionally the key) at `idx`.
    ///
    /// `idx == entry_count` on an interior node updates the edge child.
    /// Returns `false` when a growing update does not fit.
    pub fn update_at(&mut self, idx: usize, key: Option<&[u8]>, val: &[u8]) -> Result<bool> {
        if idx == self.entry_count() {
            if self.is_leaf() {
                return Err(BtreeError::Corruption("edge update on a leaf"));
            }
            self.set_edge_child(NodeId::deserialize(val)?);
            self.inc_generation();
            return Ok(true);
        }
        let ok = match self.layout()? {
            LayoutKind::Simple => {
                simple::update_at(self, idx, key, val);
                true
            }
            _ => varlen::update_at(self, idx, key, val),
        };
        if ok {
            self.inc_generation();
        }
        Ok(ok)
    }

    /// Remove entries `start..=end`, shifting later slots left.
    ///
    /// Removing through `entry_count` on an interior node consumes the
    /// edge: the last surviving child becomes the new edge child.
    pub fn remove_range(&mut self, start: usize, end: usize) -> Result<()> {
        let total = self.entry_count();
        debug_assert!(start <= end && end <= total);
        if end == total && !self.is_leaf() {
            if !self.has_valid_edge() {
                return Err(BtreeError::Corruption("edge removal without edge child"));
            }
            if start == 0 {
                return Err(BtreeError::Corruption("removing every child of a node"));
            }
            let new_edge = self.child_at(start - 1)?;
            match self.layout()? {
                LayoutKind::Simple => simple::remove_at(self, start - 1, total - 1),
                _ => varlen::remove_at(self, start - 1, total - 1),
            }
            self.set_edge_child(new_edge);
            self.sub_entries(total - start + 1);
        } else {
            match self.layout()? {
                LayoutKind::Simple => simple::remove_at(self, start, end),
                _ => varlen::remove_at(self, start, end),
            }
            self.sub_entries(end - start + 1);
        }
        self.inc_generation();
        Ok(())
    }

    // ---- search -------------------------------------------------------

    /// Node-local binary search honoring the range's multi-match selector.
    ///
    /// Returns `(found, idx)`; on a miss `idx` is the insertion boundary
    /// (or the closest lower slot for `ClosestFit`).
    pub fn find<K: Key>(&self, range: &KeyRange<K>) -> Result<(bool, usize)> {
        let total = self.entry_count();
        let mut lo = 0usize;
        let mut hi = total;
        let mut hit: Option<usize> = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key: K = self.key_at(mid)?;
            match key.compare_range(range) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => match range.select {
                    MatchSelect::DoNotCare => return Ok((true, mid)),
                    MatchSelect::LeftMost => {
                        hit = Some(mid);
                        hi = mid;
                    }
                    MatchSelect::RightMost => {
                        hit = Some(mid);
                        lo = mid + 1;
                    }
                    MatchSelect::ClosestFit => {
                        hit = Some(mid);
                        hi = mid;
                    }
                },
            }
        }
        match hit {
            Some(idx) => Ok((true, idx)),
            None if range.select == MatchSelect::ClosestFit && lo > 0 => Ok((false, lo - 1)),
            None => Ok((false, lo)),
        }
    }

    /// Contiguous run of entries overlapping `range`, capped at
    /// `max_count`. Returns `(start_idx, count)`.
    pub fn get_all<K: Key>(&self, range: &KeyRange<K>, max_count: usize) -> Result<(usize, usize)> {
        let total = self.entry_count();
        if total == 0 || max_count == 0 {
            return Ok((0, 0));
        }
        let start_probe = range.clone().with_select(MatchSelect::LeftMost);
        let (_, start) = self.find(&start_probe)?;
        let mut count = 0usize;
        let mut idx = start;
        while idx < total && count < max_count {
            let key: K = self.key_at(idx)?;
            if key.compare_range(range) != Ordering::Equal {
                break;
            }
            count += 1;
            idx += 1;
        }
        Ok((start, count))
    }

    // ---- leaf put dispatch --------------------------------------------

    /// Apply a put-type policy to this leaf.
    ///
    /// `existing` receives the prior value when one is overwritten or
    /// appended to. Space must have been checked by the caller; an
    /// out-of-room insert here reports `PutFailed`.
    pub fn put<K: Key, V: Value>(
        &mut self,
        key: &K,
        val: &V,
        put_type: PutType,
        existing: &mut Option<V>,
    ) -> Result<Status> {
        debug_assert!(self.is_leaf());
        let range = KeyRange::single(key.clone());
        let (found, idx) = self.find(&range)?;
        match put_type {
            PutType::InsertOnlyIfNotExists => {
                if found {
                    return Ok(Status::PutFailed);
                }
                self.insert_entry(idx, key, val)
            }
            PutType::ReplaceOnlyIfExists => {
                if !found {
                    return Ok(Status::NotFound);
                }
                *existing = Some(self.value_at(idx)?);
                self.replace_entry(idx, key, val)
            }
            PutType::ReplaceIfExistsElseInsert => {
                if found {
                    *existing = Some(self.value_at(idx)?);
                    self.replace_entry(idx, key, val)
                } else {
                    self.insert_entry(idx, key, val)
                }
            }
            PutType::AppendOnlyIfExists => {
                if !found {
                    return Ok(Status::NotFound);
                }
                self.append_entry(idx, key, val, existing)
            }
            PutType::AppendIfExistsElseInsert => {
                if found {
                    self.append_entry(idx, key, val, existing)
                } else {
                    self.insert_entry(idx, key, val)
                }
            }
        }
    }

    fn insert_entry<K: Key, V: Value>(&mut self, idx: usize, key: &K, val: &V) -> Result<Status> {
        let mut kb: Vec<u8> = Vec::with_capacity(key.serialized_size());
        key.serialize_into(&mut kb);
        let mut vb: Vec<u8> = Vec::with_capacity(val.serialized_size());
        val.serialize_into(&mut vb);
        if self.insert_at(idx, &kb, &vb)? {
            Ok(Status::Success)
        } else {
            debug_assert!(false, "leaf insert rejected after size pre-check");
            Ok(Status::PutFailed)
        }
    }

    fn replace_entry<K: Key, V: Value>(&mut self, idx: usize, key: &K, val: &V) -> Result<Status> {
        let mut kb: Vec<u8> = Vec::with_capacity(key.serialized_size());
        key.serialize_into(&mut kb);
        let mut vb: Vec<u8> = Vec::with_capacity(val.serialized_size());
        val.serialize_into(&mut vb);
        if self.update_at(idx, Some(&kb), &vb)? {
            Ok(Status::Success)
        } else {
            Ok(Status::PutFailed)
        }
    }

    fn append_entry<K: Key, V: Value>(
        &mut self,
        idx: usize,
        key: &K,
        val: &V,
        existing: &mut Option<V>,
    ) -> Result<Status> {
        let mut current: V = self.value_at(idx)?;
        *existing = Some(current.clone());
        if !current.append(val) {
            return Ok(Status::PutFailed);
        }
        self.replace_entry(idx, key, &current)
    }

    // ---- split/merge primitives ---------------------------------------

    /// Move the last `n` entries (and the edge child, when held) into the
    /// front of `other`, the right sibling. Returns entries moved.
    pub fn move_out_to_right_by_entries(&mut self, other: &mut NodeBuf, n: usize) -> Result<usize> {
        match self.layout()? {
            LayoutKind::Simple => simple::move_out_to_right(self, other, n, usize::MAX),
            _ => varlen::move_out_to_right(self, other, n, usize::MAX),
        }
    }

    /// Move a tail run of entries totalling at most `size` bytes into
    /// `other`. Returns the bytes actually moved.
    pub fn move_out_to_right_by_size(&mut self, other: &mut NodeBuf, size: usize) -> Result<usize> {
        let before = self.occupied_size()?;
        match self.layout()? {
            LayoutKind::Simple => simple::move_out_to_right(self, other, usize::MAX, size)?,
            _ => varlen::move_out_to_right(self, other, usize::MAX, size)?,
        };
        Ok(before - self.occupied_size()?)
    }

    /// Pull the first `n` entries of `other` (the right sibling) onto this
    /// node's tail. Returns entries moved.
    pub fn move_in_from_right_by_entries(
        &mut self,
        other: &mut NodeBuf,
        n: usize,
    ) -> Result<usize> {
        match self.layout()? {
            LayoutKind::Simple => simple::move_in_from_right(self, other, n, usize::MAX),
            _ => varlen::move_in_from_right(self, other, n, usize::MAX),
        }
    }

    /// Pull a front run of `other`'s entries totalling at most `size`
    /// bytes. Returns the bytes actually moved.
    pub fn move_in_from_right_by_size(
        &mut self,
        other: &mut NodeBuf,
        size: usize,
    ) -> Result<usize> {
        let before = other.occupied_size()?;
        match self.layout()? {
            LayoutKind::Simple => simple::move_in_from_right(self, other, usize::MAX, size)?,
            _ => varlen::move_in_from_right(self, other, usize::MAX, size)?,
        };
        Ok(before - other.occupied_size()?)
    }

    // ---- diagnostics --------------------------------------------------

    /// Ascending-key check over every adjacent slot pair.
    pub fn verify_order<K: Key>(&self) -> Result<()> {
        let total = self.entry_count();
        if total < 2 {
            return Ok(());
        }
        let mut prev: K = self.key_at(0)?;
        for idx in 1..total {
            let key: K = self.key_at(idx)?;
            if prev >= key {
                return Err(BtreeError::Corruption("node keys out of order"));
            }
            prev = key;
        }
        Ok(())
    }

    /// Human-readable dump of header and entries.
    pub fn describe<K: Key, V: Value>(&self) -> String {
        use std::fmt::Write;
        let mut out = format!(
            "id={} gen={} entries={} {}",
            self.node_id(),
            self.generation(),
            self.entry_count(),
            if self.is_leaf() { "LEAF" } else { "INTERIOR" },
        );
        if self.has_valid_edge() {
            let _ = write!(out, " edge={}", self.edge_child());
        }
        for idx in 0..self.entry_count() {
            match (self.key_at::<K>(idx), self.value_bytes(idx)) {
                (Ok(key), Ok(vb)) => {
                    if self.is_leaf() {
                        match V::deserialize(vb) {
                            Ok(val) => {
                                let _ = write!(out, " [{:?}={:?}]", key, val);
                            }
                            Err(_) => {
                                let _ = write!(out, " [{:?}=<bad>]", key);
                            }
                        }
                    } else {
                        let child = NodeId::deserialize(vb).unwrap_or(NodeId::INVALID);
                        let _ = write!(out, " [{:?}->{}]", key, child);
                    }
                }
                _ => {
                    let _ = write!(out, " [<bad slot {}>]", idx);
                }
            }
        }
        out
    }

    /// Serialized `(key, value)` byte pairs for a run of entries. Scratch
    /// for moves that cross layout borrow boundaries.
    pub(crate) fn collect_entries(
        &self,
        start: usize,
        count: usize,
    ) -> Result<SmallVec<[(Vec<u8>, Vec<u8>); 8]>> {
        let mut out = SmallVec::new();
        for idx in start..start + count {
            out.push((self.key_bytes(idx)?.to_vec(), self.value_bytes(idx)?.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(size: usize) -> NodeBuf {
        NodeBuf::new(
            size,
            NodeId(7),
            true,
            NodeShape {
                layout: LayoutKind::Simple,
                fixed_key_size: 8,
                fixed_val_size: 8,
            },
        )
    }

    fn ser(k: u64) -> Vec<u8> {
        let mut out = Vec::new();
        Key::serialize_into(&k, &mut out);
        out
    }

    #[test]
    fn header_fields_round_trip() {
        let mut node = leaf(512);
        assert_eq!(node.node_id(), NodeId(7));
        assert!(node.is_leaf());
        assert!(node.is_valid());
        assert_eq!(node.entry_count(), 0);
        assert_eq!(node.generation(), 0);
        assert!(!node.next_node().is_valid());

        node.set_next_node(NodeId(9));
        node.add_entries(5);
        node.inc_generation();
        assert_eq!(node.next_node(), NodeId(9));
        assert_eq!(node.entry_count(), 5);
        assert_eq!(node.generation(), 1);
        assert_eq!(node.layout().expect("layout"), LayoutKind::Simple);

        node.invalidate();
        assert!(!node.is_valid());
        assert_eq!(node.entry_count(), 5, "invalidate must not clobber count");
    }

    #[test]
    fn checksum_detects_area_change() {
        let mut node = leaf(512);
        node.insert_at(0, &ser(1), &ser(10)).expect("insert");
        node.update_checksum();
        assert!(node.checksum_ok());
        node.insert_at(1, &ser(2), &ser(20)).expect("insert");
        assert!(!node.checksum_ok());
    }

    #[test]
    fn find_selectors_disambiguate() {
        let mut node = leaf(512);
        for (i, k) in [10u64, 20, 30, 40].iter().enumerate() {
            assert!(node.insert_at(i, &ser(*k), &ser(0)).expect("insert"));
        }
        let range = KeyRange::new(15u64, true, 35u64, true);
        let (found, idx) = node
            .find(&range.clone().with_select(MatchSelect::LeftMost))
            .expect("find");
        assert!(found);
        assert_eq!(idx, 1);
        let (found, idx) = node
            .find(&range.clone().with_select(MatchSelect::RightMost))
            .expect("find");
        assert!(found);
        assert_eq!(idx, 2);

        let miss = KeyRange::single(25u64).with_select(MatchSelect::ClosestFit);
        let (found, idx) = node.find(&miss).expect("find");
        assert!(!found);
        assert_eq!(idx, 1, "closest fit lands on the slot below");
    }

    #[test]
    fn get_all_clamps_to_overlap() {
        let mut node = leaf(512);
        for (i, k) in [10u64, 20, 30, 40, 50].iter().enumerate() {
            assert!(node.insert_at(i, &ser(*k), &ser(0)).expect("insert"));
        }
        let range = KeyRange::new(20u64, true, 40u64, true);
        let (start, count) = node.get_all(&range, usize::MAX).expect("get_all");
        assert_eq!((start, count), (1, 3));
        let (start, count) = node.get_all(&range, 2).expect("get_all");
        assert_eq!((start, count), (1, 2));
    }

    #[test]
    fn swap_contents_preserves_identity() {
        let mut a = leaf(512);
        let mut b = NodeBuf::new(
            512,
            NodeId(8),
            true,
            NodeShape {
                layout: LayoutKind::Simple,
                fixed_key_size: 8,
                fixed_val_size: 8,
            },
        );
        a.insert_at(0, &ser(1), &ser(100)).expect("insert");
        a.swap_contents(&mut b);
        assert_eq!(a.node_id(), NodeId(7));
        assert_eq!(b.node_id(), NodeId(8));
        assert_eq!(a.entry_count(), 0);
        assert_eq!(b.entry_count(), 1);
        assert_eq!(b.value_at::<u64>(0).expect("value"), 100);
    }

    #[test]
    fn put_types_enforce_presence() {
        let mut node = leaf(512);
        let mut existing = None;
        let st = node
            .put(&5u64, &50u64, PutType::ReplaceOnlyIfExists, &mut existing)
            .expect("put");
        assert_eq!(st, Status::NotFound);
        assert_eq!(node.entry_count(), 0);

        let st = node
            .put(&5u64, &50u64, PutType::InsertOnlyIfNotExists, &mut existing)
            .expect("put");
        assert_eq!(st, Status::Success);
        let st = node
            .put(&5u64, &51u64, PutType::InsertOnlyIfNotExists, &mut existing)
            .expect("put");
        assert_eq!(st, Status::PutFailed);

        let st = node
            .put(&5u64, &52u64, PutType::ReplaceIfExistsElseInsert, &mut existing)
            .expect("put");
        assert_eq!(st, Status::Success);
        assert_eq!(existing, Some(50u64));
        assert_eq!(node.value_at::<u64>(0).expect("value"), 52);
    }
}
