use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use ordbtree::{Btree, BtreeConfig, KeyRange, QueryRequest, Result};

const NUM_THREADS: usize = 8;
const KEYS_PER_THREAD: u64 = 400;

fn config() -> BtreeConfig {
    // RUST_LOG=ordbtree=trace surfaces the engine's retry/split traces
    // when a test hangs or fails.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut cfg = BtreeConfig::with_node_size(1024);
    cfg.max_key_size = 16;
    cfg.max_value_size = 16;
    cfg
}

#[test]
fn concurrent_disjoint_inserts_all_land() -> Result<()> {
    let tree: Arc<Btree<u64, u64>> = Arc::new(Btree::new(config())?);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));

    let mut handles = vec![];
    for t in 0..NUM_THREADS as u64 {
        let tree = Arc::clone(&tree);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for i in 0..KEYS_PER_THREAD {
                let k = t * 10_000 + i;
                tree.insert(k, k * 2)?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("insert thread panicked")?;
    }

    assert_eq!(
        tree.count_entries()?,
        NUM_THREADS * KEYS_PER_THREAD as usize
    );
    for t in 0..NUM_THREADS as u64 {
        for i in 0..KEYS_PER_THREAD {
            let k = t * 10_000 + i;
            assert_eq!(tree.get_value(&k)?, Some(k * 2));
        }
    }
    tree.verify_tree()?;
    Ok(())
}

#[test]
fn concurrent_upserts_on_shared_keys_keep_one_value_each() -> Result<()> {
    let tree: Arc<Btree<u64, u64>> = Arc::new(Btree::new(config())?);
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    const SHARED_KEYS: u64 = 200;

    let mut handles = vec![];
    for t in 0..NUM_THREADS as u64 {
        let tree = Arc::clone(&tree);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            barrier.wait();
            for k in 0..SHARED_KEYS {
                tree.upsert(k, t)?;
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("upsert thread panicked")?;
    }

    assert_eq!(tree.count_entries()?, SHARED_KEYS as usize);
    for k in 0..SHARED_KEYS {
        let v = tree.get_value(&k)?.expect("key must exist");
        assert!(v < NUM_THREADS as u64);
    }
    tree.verify_tree()?;
    Ok(())
}

#[test]
fn concurrent_inserts_and_removes_settle() -> Result<()> {
    let tree: Arc<Btree<u64, u64>> = Arc::new(Btree::new(config())?);
    // Evens are pre-loaded and removed concurrently while odds arrive.
    for k in (0..2000u64).step_by(2) {
        tree.insert(k, k)?;
    }

    let barrier = Arc::new(Barrier::new(2 * NUM_THREADS));
    let mut handles = vec![];
    for t in 0..NUM_THREADS as u64 {
        {
            let tree = Arc::clone(&tree);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || -> Result<()> {
                barrier.wait();
                let mut k = 2 * t + 1;
                while k < 2000 {
                    tree.insert(k, k)?;
                    k += 2 * NUM_THREADS as u64;
                }
                Ok(())
            }));
        }
        {
            let tree = Arc::clone(&tree);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || -> Result<()> {
                barrier.wait();
                let mut k = 2 * t;
                while k < 2000 {
                    assert_eq!(tree.remove_key(&k)?, Some(k));
                    k += 2 * NUM_THREADS as u64;
                }
                Ok(())
            }));
        }
    }
    for handle in handles {
        handle.join().expect("worker thread panicked")?;
    }

    assert_eq!(tree.count_entries()?, 1000);
    for k in 0..2000u64 {
        let expect = if k % 2 == 1 { Some(k) } else { None };
        assert_eq!(tree.get_value(&k)?, expect);
    }
    tree.verify_tree()?;
    Ok(())
}

#[test]
fn readers_stay_consistent_under_writes() -> Result<()> {
    let tree: Arc<Btree<u64, u64>> = Arc::new(Btree::new(config())?);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<()> {
            for k in 0..3000u64 {
                tree.insert(k, k + 1)?;
            }
            done.store(true, Ordering::Release);
            Ok(())
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || -> Result<()> {
            while !done.load(Ordering::Acquire) {
                // Point reads: a visible key always carries its value.
                for k in (0..3000u64).step_by(97) {
                    if let Some(v) = tree.get_value(&k)? {
                        assert_eq!(v, k + 1);
                    }
                }
                // Range reads: batches come back strictly ascending.
                let mut req = QueryRequest::new(KeyRange::new(0u64, true, 2999, true), 64);
                let mut out = Vec::new();
                while tree.query(&mut req, &mut out)? {}
                for pair in out.windows(2) {
                    assert!(pair[0].0 < pair[1].0, "query keys must ascend");
                }
            }
            Ok(())
        }));
    }

    writer.join().expect("writer panicked")?;
    for reader in readers {
        reader.join().expect("reader panicked")?;
    }
    assert_eq!(tree.count_entries()?, 3000);
    tree.verify_tree()?;
    Ok(())
}

#[test]
fn paginated_queries_never_regress_under_churn() -> Result<()> {
    let tree: Arc<Btree<u64, u64>> = Arc::new(Btree::new(config())?);
    for k in (0..4000u64).step_by(2) {
        tree.insert(k, k)?;
    }
    let done = Arc::new(AtomicBool::new(false));

    let churn = {
        let tree = Arc::clone(&tree);
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<()> {
            for k in (1..4000u64).step_by(2) {
                tree.insert(k, k)?;
            }
            for k in (0..4000u64).step_by(4) {
                tree.remove_key(&k)?;
            }
            done.store(true, Ordering::Release);
            Ok(())
        })
    };

    // Cursor-driven pagination must yield strictly ascending keys even
    // while the key set shifts underneath.
    let mut rounds = 0;
    while !done.load(Ordering::Acquire) || rounds == 0 {
        let mut req = QueryRequest::new(KeyRange::all(), 51);
        let mut out = Vec::new();
        while tree.query(&mut req, &mut out)? {}
        for pair in out.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        rounds += 1;
    }

    churn.join().expect("churn thread panicked")?;
    tree.verify_tree()?;
    Ok(())
}
