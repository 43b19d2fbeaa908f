use std::collections::BTreeMap;

use proptest::prelude::*;

use ordbtree::{
    Btree, BtreeConfig, BtreeError, KeyRange, LayoutKind, NodeBuf, NodeId, NodeShape, QueryRequest,
    QueryType,
};

#[derive(Debug, Clone)]
enum Op {
    Insert(u64, u64),
    Upsert(u64, u64),
    Remove(u64),
    Get(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..500, any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        (0u64..500, any::<u64>()).prop_map(|(k, v)| Op::Upsert(k, v)),
        (0u64..500).prop_map(Op::Remove),
        (0u64..500).prop_map(Op::Get),
    ]
}

fn small_tree() -> Btree<u64, u64> {
    let mut cfg = BtreeConfig::with_node_size(512);
    cfg.max_key_size = 16;
    cfg.max_value_size = 16;
    Btree::new(cfg).expect("config is valid")
}

fn collect_all(tree: &Btree<u64, u64>) -> Vec<(u64, u64)> {
    let mut req = QueryRequest::new(KeyRange::all(), 61);
    let mut out = Vec::new();
    while tree.query(&mut req, &mut out).expect("query") {}
    out
}

proptest! {
    /// Any op sequence leaves the tree agreeing with a shadow map, both
    /// per lookup and as a whole ordered dump.
    #[test]
    fn tree_tracks_a_shadow_map(ops in prop::collection::vec(arb_op(), 1..300)) {
        let tree = small_tree();
        let mut shadow: BTreeMap<u64, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    let res = tree.insert(k, v);
                    if shadow.contains_key(&k) {
                        prop_assert!(matches!(res, Err(BtreeError::PutFailed(_))));
                    } else {
                        prop_assert!(res.is_ok());
                        shadow.insert(k, v);
                    }
                }
                Op::Upsert(k, v) => {
                    let prior = tree.upsert(k, v).expect("upsert");
                    prop_assert_eq!(prior, shadow.insert(k, v));
                }
                Op::Remove(k) => {
                    let removed = tree.remove_key(&k).expect("remove");
                    prop_assert_eq!(removed, shadow.remove(&k));
                }
                Op::Get(k) => {
                    let got = tree.get_value(&k).expect("get");
                    prop_assert_eq!(got, shadow.get(&k).copied());
                }
            }
        }

        prop_assert_eq!(tree.count_entries().expect("count"), shadow.len());
        let dump = collect_all(&tree);
        let expect: Vec<(u64, u64)> = shadow.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(dump, expect);
        tree.verify_tree().expect("verify");
    }

    /// A range query returns exactly the shadow map's slice, and the
    /// sweep and traversal strategies agree.
    #[test]
    fn range_queries_are_complete(
        keys in prop::collection::btree_set(0u64..2000, 1..400),
        bounds in (0u64..2000, 0u64..2000),
    ) {
        let tree = small_tree();
        for &k in &keys {
            tree.insert(k, k * 3).expect("insert");
        }
        let (lo, hi) = (bounds.0.min(bounds.1), bounds.0.max(bounds.1));
        let range = KeyRange::new(lo, true, hi, true);

        let mut sweep_req = QueryRequest::new(range.clone(), 29);
        let mut sweep = Vec::new();
        while tree.query(&mut sweep_req, &mut sweep).expect("sweep") {}

        let mut walk_req = QueryRequest::new(range, 29).with_type(QueryType::TreeTraversal);
        let mut walk = Vec::new();
        while tree.query(&mut walk_req, &mut walk).expect("walk") {}

        let expect: Vec<(u64, u64)> = keys
            .iter()
            .filter(|k| (lo..=hi).contains(k))
            .map(|&k| (k, k * 3))
            .collect();
        prop_assert_eq!(&sweep, &expect);
        prop_assert_eq!(&walk, &expect);
    }

    /// Pagination is invariant under the batch size: every batch size
    /// yields the same concatenation as one unbounded pass.
    #[test]
    fn pagination_is_batch_size_invariant(
        keys in prop::collection::btree_set(0u64..3000, 1..300),
        batch in 1usize..40,
    ) {
        let tree = small_tree();
        for &k in &keys {
            tree.insert(k, k).expect("insert");
        }

        let mut req = QueryRequest::new(KeyRange::all(), batch);
        let mut paged = Vec::new();
        loop {
            let before = paged.len();
            let more = tree.query(&mut req, &mut paged).expect("query");
            prop_assert!(paged.len() - before <= batch);
            if !more {
                break;
            }
        }

        let mut big_req = QueryRequest::new(KeyRange::all(), keys.len() + 1);
        let mut whole = Vec::new();
        while tree.query(&mut big_req, &mut whole).expect("query") {}

        prop_assert_eq!(paged, whole);
    }

    /// Moving a tail run out of a node and pulling it straight back is a
    /// no-op: entry-for-entry, byte-for-byte occupancy.
    #[test]
    fn move_out_then_in_restores_the_node(
        keys in prop::collection::btree_set(0u64..10_000, 2..40),
        split_pct in 10usize..90,
    ) {
        for layout in [LayoutKind::Simple, LayoutKind::VarObj] {
            let shape = match layout {
                LayoutKind::Simple => NodeShape {
                    layout,
                    fixed_key_size: 8,
                    fixed_val_size: 8,
                },
                _ => NodeShape {
                    layout,
                    fixed_key_size: 0,
                    fixed_val_size: 0,
                },
            };
            let mut node = NodeBuf::new(1024, NodeId(1), true, shape);
            let mut sibling = NodeBuf::new(1024, NodeId(2), true, shape);

            for (idx, &k) in keys.iter().enumerate() {
                let kb = k.to_le_bytes();
                if !node.insert_at(idx, &kb, &kb).expect("insert") {
                    break;
                }
            }
            let count = node.entry_count();
            prop_assume!(count >= 2);
            let occupied = node.occupied_size().expect("occupied");
            let before: Vec<u64> = (0..count).map(|i| node.key_at(i).expect("key")).collect();

            let moved = node
                .move_out_to_right_by_size(&mut sibling, occupied * split_pct / 100)
                .expect("move out");
            prop_assert_eq!(
                node.entry_count() + sibling.entry_count(),
                count,
                "no entry may vanish in transit"
            );
            let pulled = node
                .move_in_from_right_by_size(&mut sibling, moved)
                .expect("move in");

            prop_assert_eq!(pulled, moved);
            prop_assert_eq!(node.entry_count(), count);
            prop_assert_eq!(node.occupied_size().expect("occupied"), occupied);
            prop_assert_eq!(sibling.entry_count(), 0);
            let after: Vec<u64> = (0..count).map(|i| node.key_at(i).expect("key")).collect();
            prop_assert_eq!(before, after);
        }
    }

    /// Inserting any key set keeps the tree's global order and entry
    /// conservation intact.
    #[test]
    fn inserts_conserve_and_order(keys in prop::collection::btree_set(0u64..100_000, 1..500)) {
        let tree = small_tree();
        for &k in &keys {
            tree.insert(k, k).expect("insert");
        }
        prop_assert_eq!(tree.count_entries().expect("count"), keys.len());
        tree.verify_tree().expect("verify");

        let dump = collect_all(&tree);
        prop_assert_eq!(dump.len(), keys.len());
        for pair in dump.windows(2) {
            prop_assert!(pair[0].0 < pair[1].0);
        }
    }
}
