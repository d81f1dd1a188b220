use std::sync::Arc;

use ethereum_types::{H256, U256};
use trieste_kv::MemDb;
use trieste_state::{StateReader, StateWriter};
use trieste_test::{composite_key, hash_address, hash_slot, make_address};
use trieste_trie::{Account, Trie, EMPTY_TRIE_HASH};

use crate::util::{commit_account, new_state};

#[test]
fn single_block_root_matches_direct_insertion() {
    let db = Arc::new(MemDb::new());
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();

    let mut reference = Trie::empty();
    for seed in 0u8..25 {
        let address = make_address(seed);
        let account = Account {
            nonce: seed as u64 + 1,
            balance: U256::from(seed as u64 * 1_000_000),
            ..Default::default()
        };
        tds.trie_state_writer()
            .update_account_data(address, None, &account)
            .unwrap();
        reference
            .update_account(hash_address(address).as_bytes(), account, 0)
            .unwrap();
    }

    let roots = tds.compute_trie_roots().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0], reference.hash());
    assert_eq!(tds.last_root().unwrap(), reference.hash());
}

#[test]
fn each_sub_block_boundary_gets_its_own_root() {
    let db = Arc::new(MemDb::new());
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);

    let first = make_address(1);
    let second = make_address(2);
    let account = |nonce| Account {
        nonce,
        ..Default::default()
    };

    tds.start_new_buffer().unwrap();
    tds.trie_state_writer()
        .update_account_data(first, None, &account(1))
        .unwrap();
    tds.start_new_buffer().unwrap();
    tds.trie_state_writer()
        .update_account_data(second, None, &account(2))
        .unwrap();

    let roots = tds.compute_trie_roots().unwrap();
    assert_eq!(roots.len(), 2);

    let mut reference = Trie::empty();
    reference
        .update_account(hash_address(first).as_bytes(), account(1), 0)
        .unwrap();
    assert_eq!(roots[0], reference.hash());
    reference
        .update_account(hash_address(second).as_bytes(), account(2), 0)
        .unwrap();
    assert_eq!(roots[1], reference.hash());
}

#[test]
fn storage_writes_roll_up_into_the_account_root() {
    let db = Arc::new(MemDb::new());
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();

    let address = make_address(1);
    let account = Account {
        nonce: 1,
        ..Default::default()
    };
    let slot_a = H256::from_low_u64_be(1);
    let slot_b = H256::from_low_u64_be(2);
    {
        let mut writer = tds.trie_state_writer();
        writer.update_account_data(address, None, &account).unwrap();
        writer
            .write_account_storage(address, 0, &slot_a, &H256::zero(), &H256::from_low_u64_be(0x42))
            .unwrap();
        writer
            .write_account_storage(address, 0, &slot_b, &H256::zero(), &H256::from_low_u64_be(0x43))
            .unwrap();
    }
    let roots = tds.compute_trie_roots().unwrap();

    let mut reference = Trie::empty();
    reference
        .update_account(hash_address(address).as_bytes(), account, 0)
        .unwrap();
    reference
        .update(&composite_key(address, &slot_a), vec![0x42], 0)
        .unwrap();
    reference
        .update(&composite_key(address, &slot_b), vec![0x43], 0)
        .unwrap();
    assert_eq!(*roots.last().unwrap(), reference.hash());

    // The committed record carries the storage root it now commits to
    let committed = tds.read_account_data(address).unwrap().unwrap();
    let mut storage = Trie::empty();
    storage
        .update(hash_slot(&slot_a).as_bytes(), vec![0x42], 0)
        .unwrap();
    storage
        .update(hash_slot(&slot_b).as_bytes(), vec![0x43], 0)
        .unwrap();
    assert_eq!(committed.root, storage.hash());
}

#[test]
fn zero_valued_storage_writes_delete_the_slot() {
    let db = Arc::new(MemDb::new());
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();

    let address = make_address(1);
    let slot = H256::from_low_u64_be(7);
    {
        let mut writer = tds.trie_state_writer();
        writer
            .update_account_data(address, None, &Account::default())
            .unwrap();
        writer
            .write_account_storage(address, 0, &slot, &H256::zero(), &H256::from_low_u64_be(9))
            .unwrap();
        writer
            .write_account_storage(address, 0, &slot, &H256::from_low_u64_be(9), &H256::zero())
            .unwrap();
    }
    tds.compute_trie_roots().unwrap();
    let committed = tds.read_account_data(address).unwrap().unwrap();
    assert_eq!(committed.root, *EMPTY_TRIE_HASH);
}

/// A fresh state over a populated database materialises exactly what the block
/// touches, and the resulting root matches replaying everything directly.
#[test]
fn fresh_state_resolves_from_the_database() {
    let db = Arc::new(MemDb::new());
    let slot = H256::from_low_u64_be(1);

    // Block 1: twenty accounts, one with storage, committed to the database
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();
    let mut reference = Trie::empty();
    for seed in 0u8..20 {
        let address = make_address(seed);
        let account = Account {
            nonce: seed as u64 + 1,
            ..Default::default()
        };
        tds.trie_state_writer()
            .update_account_data(address, None, &account)
            .unwrap();
    }
    tds.trie_state_writer()
        .write_account_storage(
            make_address(3),
            0,
            &slot,
            &H256::zero(),
            &H256::from_low_u64_be(0x42),
        )
        .unwrap();
    let root1 = *tds.compute_trie_roots().unwrap().last().unwrap();
    for seed in 0u8..20 {
        let address = make_address(seed);
        let committed = commit_account(&tds, address, None);
        if seed == 3 {
            tds.db_state_writer()
                .write_account_storage(
                    address,
                    committed.incarnation,
                    &slot,
                    &H256::zero(),
                    &H256::from_low_u64_be(0x42),
                )
                .unwrap();
        }
        reference
            .update_account(hash_address(address).as_bytes(), committed, 0)
            .unwrap();
    }
    reference
        .update(&composite_key(make_address(3), &slot), vec![0x42], 0)
        .unwrap();
    assert_eq!(root1, reference.hash());

    // Block 2: a brand new state over the same database touches two accounts
    // and the stored slot
    let tds2 = new_state(&db, root1, 2);
    tds2.start_new_buffer().unwrap();
    let updated = Account {
        nonce: 100,
        ..tds2.read_account_data(make_address(7)).unwrap().unwrap()
    };
    tds2.trie_state_writer()
        .update_account_data(make_address(7), None, &updated)
        .unwrap();
    tds2.trie_state_writer()
        .write_account_storage(
            make_address(3),
            0,
            &slot,
            &H256::from_low_u64_be(0x42),
            &H256::from_low_u64_be(0x43),
        )
        .unwrap();
    // The account owning the touched storage is updated as well
    let owner = tds2.read_account_data(make_address(3)).unwrap().unwrap();
    tds2.trie_state_writer()
        .update_account_data(make_address(3), None, &owner)
        .unwrap();

    let root2 = *tds2.compute_trie_roots().unwrap().last().unwrap();

    reference
        .update_account(hash_address(make_address(7)).as_bytes(), updated, 0)
        .unwrap();
    reference
        .update(&composite_key(make_address(3), &slot), vec![0x43], 0)
        .unwrap();
    let expected = reference.hash();
    assert_eq!(root2, expected);
}

/// Reads fall back to the database when the trie cannot answer.
#[test]
fn reads_fall_through_to_the_database() {
    let db = Arc::new(MemDb::new());
    let address = make_address(1);
    let slot = H256::from_low_u64_be(5);

    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();
    tds.trie_state_writer()
        .update_account_data(
            address,
            None,
            &Account {
                nonce: 11,
                ..Default::default()
            },
        )
        .unwrap();
    tds.trie_state_writer()
        .write_account_storage(address, 0, &slot, &H256::zero(), &H256::from_low_u64_be(0x55))
        .unwrap();
    let root = *tds.compute_trie_roots().unwrap().last().unwrap();
    let committed = commit_account(&tds, address, None);
    tds.db_state_writer()
        .write_account_storage(
            address,
            committed.incarnation,
            &slot,
            &H256::zero(),
            &H256::from_low_u64_be(0x55),
        )
        .unwrap();

    // A cold state serves both reads straight from the buckets
    let cold = new_state(&db, root, 1);
    let account = cold.read_account_data(address).unwrap().unwrap();
    assert_eq!(account.nonce, 11);
    let value = cold
        .read_account_storage(address, account.incarnation, &slot)
        .unwrap()
        .unwrap();
    assert_eq!(value, vec![0x55]);
    assert_eq!(
        cold.read_account_storage(address, account.incarnation, &H256::from_low_u64_be(99))
            .unwrap(),
        None
    );
    assert_eq!(cold.read_account_data(make_address(9)).unwrap(), None);
}
