//! Slotted-page layout family: fixed-size records grow forward from the
//! sub-header, payload bytes grow backward from the area tail.
//!
//! Slot area shape: `{tail:u16, used_payload:u16}` then `entry_count`
//! records of `{offset:u16, key_len:u16, val_len:u16}`. Each record's
//! payload is `key_len + val_len` contiguous bytes at `offset` within the
//! area. Removal and shrinking updates leave holes; insertion compacts
//! the payload region when contiguous space runs out but total free space
//! suffices.
//!
//! The three specializations (variable key, variable value, both) share
//! this machinery; they differ only in which lengths the typed layer pins
//! to a fixed size.

use smallvec::SmallVec;

use super::NodeBuf;

/// Sub-header length at the start of the slot area.
pub(super) const SUBHDR_LEN: usize = 4;

/// Per-entry record length.
pub(crate) const RECORD_LEN: usize = 6;

fn area_len(node: &NodeBuf) -> usize {
    node.size() - super::NODE_HEADER_LEN
}

fn tail(node: &NodeBuf) -> usize {
    let area = node.area();
    u16::from_le_bytes([area[0], area[1]]) as usize
}

fn set_tail(node: &mut NodeBuf, tail: usize) {
    debug_assert!(tail <= u16::MAX as usize);
    let bytes = (tail as u16).to_le_bytes();
    node.area_mut()[0..2].copy_from_slice(&bytes);
}

fn used_payload(node: &NodeBuf) -> usize {
    let area = node.area();
    u16::from_le_bytes([area[2], area[3]]) as usize
}

fn set_used_payload(node: &mut NodeBuf, used: usize) {
    debug_assert!(used <= u16::MAX as usize);
    let bytes = (used as u16).to_le_bytes();
    node.area_mut()[2..4].copy_from_slice(&bytes);
}

fn rec_pos(idx: usize) -> usize {
    SUBHDR_LEN + idx * RECORD_LEN
}

fn read_rec(node: &NodeBuf, idx: usize) -> (usize, usize, usize) {
    let pos = rec_pos(idx);
    let area = node.area();
    let off = u16::from_le_bytes([area[pos], area[pos + 1]]) as usize;
    let klen = u16::from_le_bytes([area[pos + 2], area[pos + 3]]) as usize;
    let vlen = u16::from_le_bytes([area[pos + 4], area[pos + 5]]) as usize;
    (off, klen, vlen)
}

fn write_rec(node: &mut NodeBuf, idx: usize, off: usize, klen: usize, vlen: usize) {
    let pos = rec_pos(idx);
    let area = node.area_mut();
    area[pos..pos + 2].copy_from_slice(&(off as u16).to_le_bytes());
    area[pos + 2..pos + 4].copy_from_slice(&(klen as u16).to_le_bytes());
    area[pos + 4..pos + 6].copy_from_slice(&(vlen as u16).to_le_bytes());
}

pub(super) fn init_area(node: &mut NodeBuf) {
    let len = area_len(node);
    set_tail(node, len);
    set_used_payload(node, 0);
}

pub(super) fn key_bytes(node: &NodeBuf, idx: usize) -> &[u8] {
    let (off, klen, _) = read_rec(node, idx);
    &node.area()[off..off + klen]
}

pub(super) fn value_bytes(node: &NodeBuf, idx: usize) -> &[u8] {
    let (off, klen, vlen) = read_rec(node, idx);
    &node.area()[off + klen..off + klen + vlen]
}

pub(super) fn occupied_size(node: &NodeBuf) -> usize {
    node.entry_count() * RECORD_LEN + used_payload(node)
}

pub(super) fn available_size(node: &NodeBuf) -> usize {
    area_len(node) - SUBHDR_LEN - occupied_size(node)
}

fn contiguous_free(node: &NodeBuf) -> usize {
    tail(node) - (SUBHDR_LEN + node.entry_count() * RECORD_LEN)
}

/// Slide live payload bytes to the area tail, eliminating interior holes.
/// Logical entry order never changes; only record offsets do.
fn compact(node: &mut NodeBuf) {
    let total = node.entry_count();
    let mut live: SmallVec<[(usize, usize, usize); 32]> = SmallVec::new();
    for idx in 0..total {
        let (off, klen, vlen) = read_rec(node, idx);
        if klen + vlen > 0 {
            live.push((idx, off, klen + vlen));
        }
    }
    live.sort_unstable_by(|a, b| b.1.cmp(&a.1));
    let mut dst = area_len(node);
    for (idx, off, len) in live {
        dst -= len;
        debug_assert!(off <= dst);
        if off != dst {
            node.area_mut().copy_within(off..off + len, dst);
        }
        let (_, klen, vlen) = read_rec(node, idx);
        write_rec(node, idx, dst, klen, vlen);
    }
    set_tail(node, dst);
    debug_assert_eq!(area_len(node) - dst, used_payload(node));
}

/// Write the payload and record for a new entry at `idx`, shifting later
/// records right. Entry count is adjusted by the caller. Returns `false`
/// without mutating when total free space is insufficient.
pub(super) fn insert_at(node: &mut NodeBuf, idx: usize, key: &[u8], val: &[u8]) -> bool {
    let need = key.len() + val.len();
    if available_size(node) < RECORD_LEN + need {
        return false;
    }
    if contiguous_free(node) < RECORD_LEN + need {
        compact(node);
    }
    let new_tail = tail(node) - need;
    {
        let area = node.area_mut();
        area[new_tail..new_tail + key.len()].copy_from_slice(key);
        area[new_tail + key.len()..new_tail + need].copy_from_slice(val);
    }
    let total = node.entry_count();
    if idx < total {
        let src = rec_pos(idx);
        let end = rec_pos(total);
        node.area_mut().copy_within(src..end, src + RECORD_LEN);
    }
    write_rec(node, idx, new_tail, key.len(), val.len());
    set_tail(node, new_tail);
    set_used_payload(node, used_payload(node) + need);
    true
}

/// Overwrite the entry at `idx`. Shrinking or equal-size updates happen in
/// place; growth reallocates the payload (compacting first if needed).
/// Returns `false` when the grown entry does not fit.
pub(super) fn update_at(node: &mut NodeBuf, idx: usize, key: Option<&[u8]>, val: &[u8]) -> bool {
    let (off, old_klen, old_vlen) = read_rec(node, idx);
    let old_total = old_klen + old_vlen;
    let kb: SmallVec<[u8; 32]> = match key {
        Some(k) => SmallVec::from_slice(k),
        None => SmallVec::from_slice(key_bytes(node, idx)),
    };
    let need = kb.len() + val.len();
    if need <= old_total {
        let area = node.area_mut();
        area[off..off + kb.len()].copy_from_slice(&kb);
        area[off + kb.len()..off + need].copy_from_slice(val);
        write_rec(node, idx, off, kb.len(), val.len());
        set_used_payload(node, used_payload(node) - (old_total - need));
        return true;
    }
    if available_size(node) + old_total < need {
        return false;
    }
    // Retire the old payload before compaction so it is treated as a hole.
    set_used_payload(node, used_payload(node) - old_total);
    write_rec(node, idx, area_len(node), 0, 0);
    if contiguous_free(node) < need {
        compact(node);
    }
    let new_tail = tail(node) - need;
    {
        let area = node.area_mut();
        area[new_tail..new_tail + kb.len()].copy_from_slice(&kb);
        area[new_tail + kb.len()..new_tail + need].copy_from_slice(val);
    }
    write_rec(node, idx, new_tail, kb.len(), val.len());
    set_tail(node, new_tail);
    set_used_payload(node, used_payload(node) + need);
    true
}

/// Drop records `start..=end`, shifting later records left. Payload bytes
/// become holes reclaimed by the next compaction. Entry count is adjusted
/// by the caller.
pub(super) fn remove_at(node: &mut NodeBuf, start: usize, end: usize) {
    let total = node.entry_count();
    let mut freed = 0usize;
    for idx in start..=end {
        let (_, klen, vlen) = read_rec(node, idx);
        freed += klen + vlen;
    }
    if end + 1 < total {
        let src = rec_pos(end + 1);
        let stop = rec_pos(total);
        let dst = rec_pos(start);
        node.area_mut().copy_within(src..stop, dst);
    }
    set_used_payload(node, used_payload(node) - freed);
}

fn raw_insert(node: &mut NodeBuf, idx: usize, key: &[u8], val: &[u8]) -> bool {
    if insert_at(node, idx, key, val) {
        node.add_entries(1);
        true
    } else {
        false
    }
}

/// Move a tail run of entries into the front of `other`, bounded by count,
/// byte budget, and room in `other`. Returns entries moved.
pub(super) fn move_out_to_right(
    node: &mut NodeBuf,
    other: &mut NodeBuf,
    max_entries: usize,
    max_size: usize,
) -> crate::error::Result<usize> {
    let total = node.entry_count();
    let other_avail = available_size(other);
    let mut count = 0usize;
    let mut cum = 0usize;
    while count < max_entries && count < total {
        let (_, klen, vlen) = read_rec(node, total - 1 - count);
        let cost = RECORD_LEN + klen + vlen;
        if cum + cost > max_size || cum + cost > other_avail {
            break;
        }
        cum += cost;
        count += 1;
    }
    if count > 0 {
        let entries = node.collect_entries(total - count, count)?;
        for (j, (kb, vb)) in entries.iter().enumerate() {
            let ok = raw_insert(other, j, kb, vb);
            debug_assert!(ok, "move target rejected a size-checked entry");
        }
        remove_at(node, total - count, total - 1);
        node.sub_entries(count);
    }
    if count > 0 && node.has_valid_edge() {
        other.set_edge_child(node.edge_child());
        node.invalidate_edge();
    }
    other.inc_generation();
    node.inc_generation();
    Ok(count)
}

/// Pull a front run of `other`'s entries onto this node's tail. Returns
/// entries moved.
pub(super) fn move_in_from_right(
    node: &mut NodeBuf,
    other: &mut NodeBuf,
    max_entries: usize,
    max_size: usize,
) -> crate::error::Result<usize> {
    let other_total = other.entry_count();
    let self_avail = available_size(node);
    let mut count = 0usize;
    let mut cum = 0usize;
    while count < max_entries && count < other_total {
        let (_, klen, vlen) = read_rec(other, count);
        let cost = RECORD_LEN + klen + vlen;
        if cum + cost > max_size || cum + cost > self_avail {
            break;
        }
        cum += cost;
        count += 1;
    }
    if count > 0 {
        let entries = other.collect_entries(0, count)?;
        let base = node.entry_count();
        for (j, (kb, vb)) in entries.iter().enumerate() {
            let ok = raw_insert(node, base + j, kb, vb);
            debug_assert!(ok, "move target rejected a size-checked entry");
        }
        remove_at(other, 0, count - 1);
        other.sub_entries(count);
    }
    if other.entry_count() == 0 && other.has_valid_edge() {
        debug_assert!(!node.has_valid_edge());
        node.set_edge_child(other.edge_child());
        other.invalidate_edge();
    }
    other.inc_generation();
    node.inc_generation();
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::super::{LayoutKind, NodeBuf, NodeId, NodeShape};

    fn var_leaf(size: usize) -> NodeBuf {
        NodeBuf::new(
            size,
            NodeId(1),
            true,
            NodeShape {
                layout: LayoutKind::VarObj,
                fixed_key_size: 0,
                fixed_val_size: 0,
            },
        )
    }

    #[test]
    fn insert_consumes_record_and_payload() {
        let mut node = var_leaf(256);
        let before = super::available_size(&node);
        assert!(node.insert_at(0, b"alpha", b"value-one").expect("insert"));
        let after = super::available_size(&node);
        assert_eq!(before - after, super::RECORD_LEN + 5 + 9);
        assert_eq!(node.key_bytes(0).expect("key"), b"alpha");
        assert_eq!(node.value_bytes(0).expect("value"), b"value-one");
    }

    #[test]
    fn shrinking_update_stays_in_place_and_frees_bytes() {
        let mut node = var_leaf(256);
        assert!(node.insert_at(0, b"k", b"long-initial-value").expect("insert"));
        let used_before = super::used_payload(&node);
        assert!(node.update_at(0, None, b"tiny").expect("update"));
        assert_eq!(super::used_payload(&node), used_before - (18 - 4));
        assert_eq!(node.value_bytes(0).expect("value"), b"tiny");
    }

    #[test]
    fn growth_update_relocates_payload() {
        let mut node = var_leaf(256);
        assert!(node.insert_at(0, b"k1", b"aa").expect("insert"));
        assert!(node.insert_at(1, b"k2", b"bb").expect("insert"));
        assert!(node.update_at(0, None, b"a-much-longer-value").expect("update"));
        assert_eq!(node.key_bytes(0).expect("key"), b"k1");
        assert_eq!(node.value_bytes(0).expect("value"), b"a-much-longer-value");
        assert_eq!(node.value_bytes(1).expect("value"), b"bb");
    }

    #[test]
    fn compaction_reclaims_holes_for_inserts() {
        // Fill the node, punch holes by removing alternate entries, then
        // insert something that only fits after compaction.
        let mut node = var_leaf(200);
        let mut idx = 0;
        while node
            .insert_at(idx, format!("key{:02}", idx).as_bytes(), b"0123456789")
            .expect("insert")
        {
            idx += 1;
        }
        assert!(idx >= 4, "node too small for the scenario");
        node.remove_range(0, 0).expect("remove");
        node.remove_range(1, 1).expect("remove");
        let wide = vec![b'x'; 24];
        assert!(
            node.insert_at(0, b"key-wide", &wide).expect("insert"),
            "insert after holes should trigger compaction and fit"
        );
        assert_eq!(node.key_bytes(0).expect("key"), b"key-wide");
    }

    #[test]
    fn insufficient_space_leaves_node_untouched() {
        let mut node = var_leaf(120);
        assert!(node.insert_at(0, b"a", b"bb").expect("insert"));
        let snapshot_used = super::used_payload(&node);
        let snapshot_entries = node.entry_count();
        let huge = vec![b'z'; 4096];
        assert!(!node.insert_at(1, b"b", &huge).expect("insert"));
        assert_eq!(super::used_payload(&node), snapshot_used);
        assert_eq!(node.entry_count(), snapshot_entries);
    }
}
