use std::sync::{Arc, Mutex};

use trieste_kv::{Bucket, Database, MemDb};
use trieste_test::make_hash;
use trieste_trie::{Account, Trie, TriePruning, TrieResolver};

fn tracked_trie(tp: &Arc<Mutex<TriePruning>>) -> Trie {
    let mut trie = Trie::empty();
    let sink = tp.clone();
    trie.set_touch_func(Box::new(move |hex, del| {
        if let Ok(mut tp) = sink.lock() {
            tp.touch(hex, del);
        }
    }));
    trie
}

/// Pruned keys re-materialise identically through the resolver: the round trip
/// trie -> hash stubs -> database walk -> trie preserves both values and root.
#[test]
fn pruned_state_comes_back_identical() {
    let db = Arc::new(MemDb::new());
    let tp = Arc::new(Mutex::new(TriePruning::new(1)));
    let mut trie = tracked_trie(&tp);

    for seed in 0u8..50 {
        let key = make_hash(seed);
        let account = Account {
            nonce: seed as u64 + 1,
            ..Default::default()
        };
        db.put(Bucket::Accounts, key.as_bytes(), &account.encode_for_storage())
            .unwrap();
        trie.update_account(key.as_bytes(), account, 1).unwrap();
    }
    let root = trie.hash();
    let resident_before = trie.count_prunable_nodes();

    let unloaded = {
        let mut tp = tp.lock().unwrap();
        tp.set_block_nr(1000);
        tp.prune_to(&mut trie, 10)
    };
    assert!(unloaded > 0);
    assert!(trie.count_prunable_nodes() < resident_before);
    assert_eq!(trie.hash(), root, "pruning must not change the root");

    // Re-access a pruned key through the resolver
    let key = make_hash(25);
    let request = trie.need_resolution(None, key.as_bytes()).unwrap();
    let mut resolver = TrieResolver::new(0, true, 1000);
    resolver.add_request(request);
    resolver.resolve_with_db(db.as_ref(), &mut trie).unwrap();

    let account = trie.get_account(key.as_bytes()).unwrap().unwrap();
    assert_eq!(account.nonce, 26);
    assert_eq!(trie.hash(), root);
}

/// Only generations older than the window are evicted.
#[test]
fn pruning_honours_the_generation_window() {
    let tp = Arc::new(Mutex::new(TriePruning::new(1)));
    let mut trie = tracked_trie(&tp);
    for seed in 0u8..20 {
        trie.update(make_hash(seed).as_bytes(), vec![seed; 40], 1)
            .unwrap();
    }
    {
        let mut tp = tp.lock().unwrap();
        tp.set_block_nr(8);
        assert_eq!(tp.prune_to(&mut trie, 10), 0, "window still covers block 1");
        tp.set_block_nr(12);
        assert!(tp.prune_to(&mut trie, 10) > 0, "block 1 fell out of the window");
    }
}
