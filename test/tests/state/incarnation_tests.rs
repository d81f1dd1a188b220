use std::sync::Arc;

use ethereum_types::H256;
use trieste_kv::MemDb;
use trieste_state::{StateWriter, TrieDbState};
use trieste_test::{hash_address, hash_slot, make_address};
use trieste_trie::{Account, Trie, EMPTY_TRIE_HASH};

use crate::util::{commit_account, new_state};

fn deploy_and_write(
    tds: &TrieDbState,
    address: ethereum_types::Address,
    original: Option<&Account>,
    slot: &H256,
    value: u64,
    destroy_first: bool,
) {
    let mut writer = tds.trie_state_writer();
    if destroy_first {
        writer.delete_account(address, original).unwrap();
    }
    writer.create_contract(address).unwrap();
    writer
        .update_account_data(address, None, &Account::default())
        .unwrap();
    writer
        .write_account_storage(
            address,
            0,
            slot,
            &H256::zero(),
            &H256::from_low_u64_be(value),
        )
        .unwrap();
}

/// Self-destruct and re-creation in the same block: the final storage root
/// reflects only the post-recreate writes and the incarnation steps forward.
#[test]
fn recreation_wipes_prior_storage_and_bumps_the_incarnation() {
    let db = Arc::new(MemDb::new());
    let address = make_address(1);
    let slot = H256::from_low_u64_be(1);

    // Block 1: deploy with slot = 0x42
    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    tds.start_new_buffer().unwrap();
    deploy_and_write(&tds, address, None, &slot, 0x42, false);
    tds.compute_trie_roots().unwrap();
    let first = commit_account(&tds, address, None);
    assert_eq!(first.incarnation, 0);
    tds.db_state_writer()
        .write_account_storage(
            address,
            first.incarnation,
            &slot,
            &H256::zero(),
            &H256::from_low_u64_be(0x42),
        )
        .unwrap();

    // Block 2: destroy, re-create at the same address, write slot = 0x43
    tds.set_block_nr(2).unwrap();
    tds.start_new_buffer().unwrap();
    deploy_and_write(&tds, address, Some(&first), &slot, 0x43, true);
    tds.compute_trie_roots().unwrap();
    let second = commit_account(&tds, address, Some(&first));
    assert_eq!(second.incarnation, first.incarnation + 1);

    // Only the post-recreate slot value survives
    let mut expected_storage = Trie::empty();
    expected_storage
        .update(hash_slot(&slot).as_bytes(), vec![0x43], 0)
        .unwrap();
    assert_eq!(second.root, expected_storage.hash());
}

/// The incarnation strictly increases across destroy/recreate cycles.
#[test]
fn next_incarnation_is_strictly_increasing() {
    let db = Arc::new(MemDb::new());
    let address = make_address(1);
    let addr_hash = hash_address(address);
    let slot = H256::from_low_u64_be(1);

    let tds = new_state(&db, *EMPTY_TRIE_HASH, 1);
    let mut previous: Option<Account> = None;
    let mut seen = Vec::new();
    for block in 1u64..=4 {
        tds.set_block_nr(block).unwrap();
        tds.start_new_buffer().unwrap();
        deploy_and_write(
            &tds,
            address,
            previous.as_ref(),
            &slot,
            0x40 + block,
            previous.is_some(),
        );
        tds.compute_trie_roots().unwrap();
        let committed = commit_account(&tds, address, previous.as_ref());
        tds.db_state_writer()
            .write_account_storage(
                address,
                committed.incarnation,
                &slot,
                &H256::zero(),
                &H256::from_low_u64_be(0x40 + block),
            )
            .unwrap();
        seen.push(committed.incarnation);
        previous = Some(committed);
    }
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(tds.next_incarnation(addr_hash).unwrap(), 4);
}
