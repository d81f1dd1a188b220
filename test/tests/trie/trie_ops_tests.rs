use ethereum_types::U256;
use trieste_test::make_hash;
use trieste_trie::{Account, Trie, EMPTY_TRIE_HASH};

#[test]
fn empty_trie_commits_to_the_canonical_root() {
    let mut trie = Trie::empty();
    assert_eq!(trie.hash(), *EMPTY_TRIE_HASH);
    assert_eq!(
        hex::encode(*EMPTY_TRIE_HASH),
        "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
    );
}

#[test]
fn single_account_root_is_stable() {
    // One account with a fixed key must always produce the same root
    let mut key = [0u8; 32];
    key[31] = 0x01;
    let account = Account {
        nonce: 1,
        balance: U256::zero(),
        ..Default::default()
    };
    let mut trie = Trie::empty();
    trie.update_account(&key, account.clone(), 0).unwrap();
    let root = trie.hash();
    assert_ne!(root, *EMPTY_TRIE_HASH);

    let mut again = Trie::empty();
    again.update_account(&key, account, 0).unwrap();
    assert_eq!(again.hash(), root);
}

#[test]
fn update_then_get_roundtrip() {
    let mut trie = Trie::empty();
    let keys: Vec<_> = (0u8..80).map(|s| make_hash(s).as_bytes().to_vec()).collect();
    for (i, key) in keys.iter().enumerate() {
        trie.update(key, vec![i as u8 + 1], 0).unwrap();
    }
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(trie.get(key), Some(Some(vec![i as u8 + 1])));
    }
    for key in &keys {
        trie.delete(key, 0).unwrap();
        assert_eq!(trie.get(key), Some(None));
    }
    assert_eq!(trie.hash(), *EMPTY_TRIE_HASH);
}

#[test]
fn overwrites_are_last_writer_wins() {
    let key = make_hash(1).as_bytes().to_vec();
    let mut trie = Trie::empty();
    trie.update(&key, vec![1], 0).unwrap();
    trie.update(&key, vec![2], 0).unwrap();
    assert_eq!(trie.get(&key), Some(Some(vec![2])));

    let mut direct = Trie::empty();
    direct.update(&key, vec![2], 0).unwrap();
    assert_eq!(trie.hash(), direct.hash());
}

#[test]
fn root_is_independent_of_operation_history() {
    // Insert-and-delete noise must leave no trace in the root
    let mut noisy = Trie::empty();
    for seed in 0u8..40 {
        noisy
            .update(make_hash(seed).as_bytes(), vec![seed], 0)
            .unwrap();
    }
    for seed in 20u8..40 {
        noisy.delete(make_hash(seed).as_bytes(), 0).unwrap();
    }
    let mut clean = Trie::empty();
    for seed in 0u8..20 {
        clean
            .update(make_hash(seed).as_bytes(), vec![seed], 0)
            .unwrap();
    }
    assert_eq!(noisy.hash(), clean.hash());
}
