use std::sync::Arc;

use ethereum_types::H256;
use trieste_kv::keys::composite_storage_key;
use trieste_kv::{Bucket, Database, MemDb};
use trieste_test::make_hash;
use trieste_trie::{keybytes_to_hex, Account, Trie, TrieResolver};

/// Three slot hashes sharing exactly the first three nibbles.
fn prefixed_slots() -> Vec<H256> {
    let mut slots = Vec::new();
    for (fourth, filler) in [(0x4u8, 0x11u8), (0x5, 0x22), (0x6, 0x33)] {
        let mut slot = [filler; 32];
        slot[0] = 0xab;
        slot[1] = 0xc0 | fourth;
        slots.push(H256(slot));
    }
    slots
}

/// A storage subtree pruned to a hash three nibbles deep re-materialises from a
/// single database range and verifies against its expected hash.
#[test]
fn storage_subtree_resolves_at_depth_three() {
    let db = Arc::new(MemDb::new());
    let addr = make_hash(1);
    let incarnation = 1u64;
    let slots = prefixed_slots();

    let mut trie = Trie::empty();
    trie.update_account(
        addr.as_bytes(),
        Account {
            nonce: 1,
            incarnation,
            ..Default::default()
        },
        0,
    )
    .unwrap();
    for (i, slot) in slots.iter().enumerate() {
        let value = vec![i as u8 + 1; 4];
        db.put(
            Bucket::Storage,
            &composite_storage_key(&addr, incarnation, slot),
            &value,
        )
        .unwrap();
        let mut composite = addr.as_bytes().to_vec();
        composite.extend_from_slice(slot.as_bytes());
        trie.update(&composite, value, 0).unwrap();
    }
    let root = trie.hash();

    // Collapse the shared-prefix subtree: it sits three nibbles into storage
    let slot_hex = keybytes_to_hex(slots[0].as_bytes());
    let mut unload_prefix = keybytes_to_hex(addr.as_bytes());
    unload_prefix.pop();
    unload_prefix.extend_from_slice(&slot_hex[..3]);
    assert!(trie.unload(&unload_prefix, u64::MAX) > 0);
    assert_eq!(trie.hash(), root);

    let mut composite = addr.as_bytes().to_vec();
    composite.extend_from_slice(slots[0].as_bytes());
    assert_eq!(trie.get(&composite), None);

    let request = trie
        .need_resolution(Some(addr.as_bytes()), &composite)
        .unwrap();
    assert_eq!(request.resolve_pos, 3);

    let mut resolver = TrieResolver::new(0, false, 1);
    resolver.add_request(request);
    resolver.resolve_with_db(db.as_ref(), &mut trie).unwrap();

    assert_eq!(trie.get(&composite), Some(Some(vec![1; 4])));
    assert_eq!(trie.hash(), root);
    assert!(trie
        .need_resolution(Some(addr.as_bytes()), &composite)
        .is_none());
}

/// Multiple requests against the account trie run as one multi-range walk and
/// leave every requested key materialised.
#[test]
fn batched_account_requests_all_materialise() {
    let db = Arc::new(MemDb::new());
    let mut reference = Trie::empty();
    for seed in 0u8..60 {
        let key = make_hash(seed);
        let account = Account {
            nonce: seed as u64 + 1,
            ..Default::default()
        };
        db.put(Bucket::Accounts, key.as_bytes(), &account.encode_for_storage())
            .unwrap();
        reference.update_account(key.as_bytes(), account, 0).unwrap();
    }
    let root = reference.hash();

    let mut trie = Trie::new(root);
    let touched: Vec<_> = [3u8, 17, 42].iter().map(|s| make_hash(*s)).collect();
    let mut resolver = TrieResolver::new(0, true, 1);
    for key in &touched {
        if let Some(request) = trie.need_resolution(None, key.as_bytes()) {
            resolver.add_request(request);
        }
    }
    resolver.resolve_with_db(db.as_ref(), &mut trie).unwrap();

    for key in &touched {
        assert!(trie.need_resolution(None, key.as_bytes()).is_none());
        let account = trie.get_account(key.as_bytes()).unwrap().unwrap();
        assert!(account.nonce > 0);
    }
    assert_eq!(trie.hash(), root);
}
