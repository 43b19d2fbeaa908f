//! Fixed-size slot layout: constant-size records, O(1) addressing,
//! `copy_within`-based shifting.
//!
//! Slot area shape: a 4-byte sub-header `{key_size:u16, val_size:u16}`
//! followed by `entry_count` records of `key_size + val_size` bytes each.

use super::NodeBuf;

/// Sub-header length at the start of the slot area.
pub(super) const SUBHDR_LEN: usize = 4;

pub(super) fn init_area(node: &mut NodeBuf, key_size: usize, val_size: usize) {
    debug_assert!(key_size > 0 && key_size <= u16::MAX as usize);
    debug_assert!(val_size > 0 && val_size <= u16::MAX as usize);
    let area = node.area_mut();
    area[0..2].copy_from_slice(&(key_size as u16).to_le_bytes());
    area[2..4].copy_from_slice(&(val_size as u16).to_le_bytes());
}

pub(super) fn rec_sizes(node: &NodeBuf) -> (usize, usize) {
    let area = node.area();
    let k = u16::from_le_bytes([area[0], area[1]]) as usize;
    let v = u16::from_le_bytes([area[2], area[3]]) as usize;
    (k, v)
}

fn rec_len(node: &NodeBuf) -> usize {
    let (k, v) = rec_sizes(node);
    k + v
}

fn rec_offset(node: &NodeBuf, idx: usize) -> usize {
    SUBHDR_LEN + idx * rec_len(node)
}

pub(super) fn key_bytes(node: &NodeBuf, idx: usize) -> &[u8] {
    let (k, _) = rec_sizes(node);
    let off = rec_offset(node, idx);
    &node.area()[off..off + k]
}

pub(super) fn value_bytes(node: &NodeBuf, idx: usize) -> &[u8] {
    let (k, v) = rec_sizes(node);
    let off = rec_offset(node, idx) + k;
    &node.area()[off..off + v]
}

pub(super) fn occupied_size(node: &NodeBuf) -> usize {
    node.entry_count() * rec_len(node)
}

pub(super) fn available_size(node: &NodeBuf) -> usize {
    node.size() - super::NODE_HEADER_LEN - SUBHDR_LEN - occupied_size(node)
}

fn available_entries(node: &NodeBuf) -> usize {
    available_size(node) / rec_len(node)
}

/// Shift later records right and write the new one. Does not adjust the
/// entry count; the caller owns that.
pub(super) fn insert_at(node: &mut NodeBuf, idx: usize, key: &[u8], val: &[u8]) -> bool {
    let (ksz, vsz) = rec_sizes(node);
    debug_assert_eq!(key.len(), ksz, "fixed layout requires exact key size");
    debug_assert_eq!(val.len(), vsz, "fixed layout requires exact value size");
    if key.len() != ksz || val.len() != vsz {
        return false;
    }
    if available_entries(node) == 0 {
        return false;
    }
    let rec = ksz + vsz;
    let total = node.entry_count();
    let off = rec_offset(node, idx);
    let area = node.area_mut();
    if idx < total {
        let tail = (total - idx) * rec;
        area.copy_within(off..off + tail, off + rec);
    }
    area[off..off + ksz].copy_from_slice(key);
    area[off + ksz..off + rec].copy_from_slice(val);
    true
}

pub(super) fn update_at(node: &mut NodeBuf, idx: usize, key: Option<&[u8]>, val: &[u8]) {
    let (ksz, vsz) = rec_sizes(node);
    debug_assert_eq!(val.len(), vsz);
    let off = rec_offset(node, idx);
    let area = node.area_mut();
    if let Some(key) = key {
        debug_assert_eq!(key.len(), ksz);
        area[off..off + ksz].copy_from_slice(key);
    }
    area[off + ksz..off + ksz + vsz].copy_from_slice(val);
}

/// Shift records left over `start..=end` (inclusive). Entry count is
/// adjusted by the caller.
pub(super) fn remove_at(node: &mut NodeBuf, start: usize, end: usize) {
    let rec = rec_len(node);
    let total = node.entry_count();
    if end + 1 < total {
        let src = rec_offset(node, end + 1);
        let dst = rec_offset(node, start);
        let tail = (total - end - 1) * rec;
        node.area_mut().copy_within(src..src + tail, dst);
    }
}

/// Move the last records of `node` into the front of `other`, bounded by
/// count, byte budget, and room in `other`. Returns entries moved.
pub(super) fn move_out_to_right(
    node: &mut NodeBuf,
    other: &mut NodeBuf,
    max_entries: usize,
    max_size: usize,
) -> crate::error::Result<usize> {
    let rec = rec_len(node);
    let n = max_entries
        .min(node.entry_count())
        .min(available_entries(other))
        .min(max_size / rec);
    if n > 0 {
        let src = rec_offset(node, node.entry_count() - n);
        let moved = node.area()[src..src + n * rec].to_vec();
        let other_total = other.entry_count();
        let dst_area = other.area_mut();
        if other_total > 0 {
            let existing = SUBHDR_LEN + other_total * rec;
            dst_area.copy_within(SUBHDR_LEN..existing, SUBHDR_LEN + n * rec);
        }
        dst_area[SUBHDR_LEN..SUBHDR_LEN + n * rec].copy_from_slice(&moved);
        other.add_entries(n);
        node.sub_entries(n);
    }
    if n > 0 && node.has_valid_edge() {
        other.set_edge_child(node.edge_child());
        node.invalidate_edge();
    }
    other.inc_generation();
    node.inc_generation();
    Ok(n)
}

/// Pull the first records of `other` onto the tail of `node`. Returns
/// entries moved.
pub(super) fn move_in_from_right(
    node: &mut NodeBuf,
    other: &mut NodeBuf,
    max_entries: usize,
    max_size: usize,
) -> crate::error::Result<usize> {
    let rec = rec_len(node);
    let n = max_entries
        .min(other.entry_count())
        .min(available_entries(node))
        .min(max_size / rec);
    if n > 0 {
        let moved = other.area()[SUBHDR_LEN..SUBHDR_LEN + n * rec].to_vec();
        let dst = rec_offset(node, node.entry_count());
        node.area_mut()[dst..dst + n * rec].copy_from_slice(&moved);
        let other_total = other.entry_count();
        if n < other_total {
            let src = SUBHDR_LEN + n * rec;
            let tail = (other_total - n) * rec;
            other.area_mut().copy_within(src..src + tail, SUBHDR_LEN);
        }
        node.add_entries(n);
        other.sub_entries(n);
    }
    if other.entry_count() == 0 && other.has_valid_edge() {
        debug_assert!(!node.has_valid_edge());
        node.set_edge_child(other.edge_child());
        other.invalidate_edge();
    }
    other.inc_generation();
    node.inc_generation();
    Ok(n)
}
