use std::sync::Arc;

use ethereum_types::H256;
use trieste_kv::{Bucket, Database, MemDb};
use trieste_state::{StateReader, StateWriter};
use trieste_test::{hash_address, make_address};
use trieste_trie::{Account, EMPTY_TRIE_HASH};

use crate::util::{commit_account, new_state};

/// Rewinding one block restores the previous root, the previous account record
/// and the previous incarnation sequence.
#[test]
fn unwind_reverts_a_destroy_and_recreate_block() {
    let db = Arc::new(MemDb::new());
    let address = make_address(1);
    let addr_hash = hash_address(address);
    let slot = H256::from_low_u64_be(1);

    // Block 1: deploy with slot = 0x42
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();
    {
        let mut writer = tds.trie_state_writer();
        writer.create_contract(address).unwrap();
        writer
            .update_account_data(address, None, &Account::default())
            .unwrap();
        writer
            .write_account_storage(address, 0, &slot, &H256::zero(), &H256::from_low_u64_be(0x42))
            .unwrap();
    }
    let root1 = *tds.compute_trie_roots().unwrap().last().unwrap();
    let first = commit_account(&tds, address, None);
    tds.db_state_writer()
        .write_account_storage(
            address,
            first.incarnation,
            &slot,
            &H256::zero(),
            &H256::from_low_u64_be(0x42),
        )
        .unwrap();

    // Block 2: destroy and re-create with slot = 0x43
    tds.set_block_nr(2).unwrap();
    tds.start_new_buffer().unwrap();
    {
        let mut writer = tds.trie_state_writer();
        writer.delete_account(address, Some(&first)).unwrap();
        writer.create_contract(address).unwrap();
        writer
            .update_account_data(address, None, &Account::default())
            .unwrap();
        writer
            .write_account_storage(address, 0, &slot, &H256::zero(), &H256::from_low_u64_be(0x43))
            .unwrap();
    }
    let root2 = *tds.compute_trie_roots().unwrap().last().unwrap();
    assert_ne!(root2, root1);
    let second = commit_account(&tds, address, Some(&first));
    assert_eq!(second.incarnation, 1);
    tds.db_state_writer()
        .write_account_storage(
            address,
            second.incarnation,
            &slot,
            &H256::zero(),
            &H256::from_low_u64_be(0x43),
        )
        .unwrap();
    assert_eq!(tds.next_incarnation(addr_hash).unwrap(), 2);

    // Rewind to the end of block 1
    tds.unwind_to(1).unwrap();
    assert_eq!(tds.block_nr(), 1);
    assert_eq!(tds.last_root().unwrap(), root1);

    let restored = tds.read_account_data(address).unwrap().unwrap();
    assert_eq!(restored.incarnation, first.incarnation);
    assert_eq!(restored.root, first.root);
    assert_eq!(tds.next_incarnation(addr_hash).unwrap(), 1);

    // The latest buckets went back too: the block-1 record, no incarnation-1 slots
    let record = db.get(Bucket::Accounts, addr_hash.as_bytes()).unwrap().unwrap();
    assert_eq!(
        Account::decode_for_storage(&record).unwrap().incarnation,
        first.incarnation
    );
    let slot_value = tds
        .read_account_storage(address, restored.incarnation, &slot)
        .unwrap()
        .unwrap();
    assert_eq!(slot_value, vec![0x42]);
}

/// Unwinding to before an account existed deletes it outright.
#[test]
fn unwind_removes_accounts_that_did_not_exist() {
    let db = Arc::new(MemDb::new());
    let address = make_address(5);

    // Block 1: empty block, establishes the baseline root
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();
    let root1 = tds.last_root().unwrap();

    // Block 2: the account appears
    tds.set_block_nr(2).unwrap();
    tds.start_new_buffer().unwrap();
    let account = Account {
        nonce: 1,
        ..Default::default()
    };
    tds.trie_state_writer()
        .update_account_data(address, None, &account)
        .unwrap();
    let root2 = *tds.compute_trie_roots().unwrap().last().unwrap();
    assert_ne!(root2, root1);
    commit_account(&tds, address, None);

    tds.unwind_to(1).unwrap();
    assert_eq!(tds.last_root().unwrap(), root1);
    assert_eq!(tds.read_account_data(address).unwrap(), None);
    assert_eq!(
        db.get(Bucket::Accounts, hash_address(address).as_bytes())
            .unwrap(),
        None
    );
}

/// Unwinding is idempotent with respect to direct execution: the rewound state
/// equals the state that never executed the undone block.
#[test]
fn unwound_root_equals_never_executed_root() {
    let run = |include_second_block: bool| -> H256 {
        let db = Arc::new(MemDb::new());
        let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
        tds.start_new_buffer().unwrap();
        for seed in 0u8..10 {
            let account = Account {
                nonce: seed as u64 + 1,
                ..Default::default()
            };
            tds.trie_state_writer()
                .update_account_data(make_address(seed), None, &account)
                .unwrap();
        }
        tds.compute_trie_roots().unwrap();
        for seed in 0u8..10 {
            commit_account(&tds, make_address(seed), None);
        }
        if include_second_block {
            tds.set_block_nr(2).unwrap();
            tds.start_new_buffer().unwrap();
            let original = tds.read_account_data(make_address(3)).unwrap().unwrap();
            let changed = Account {
                nonce: 999,
                ..original.clone()
            };
            tds.trie_state_writer()
                .update_account_data(make_address(3), None, &changed)
                .unwrap();
            tds.trie_state_writer()
                .delete_account(make_address(7), Some(&original))
                .unwrap();
            tds.compute_trie_roots().unwrap();
            let committed = commit_account(&tds, make_address(3), Some(&original));
            assert_eq!(committed.nonce, 999);
            let seven = Account {
                nonce: 8,
                ..Default::default()
            };
            tds.db_state_writer()
                .delete_account(make_address(7), Some(&seven))
                .unwrap();
            tds.unwind_to(1).unwrap();
        }
        tds.last_root().unwrap()
    };
    assert_eq!(run(true), run(false));
}
