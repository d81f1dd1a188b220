use std::sync::Arc;

use ethereum_types::Address;
use trieste_kv::{Database, MemDb};
use trieste_state::{StateReader, StateWriter, TrieDbState};
use trieste_trie::Account;

pub fn new_state(db: &Arc<MemDb>, root: ethereum_types::H256, block_nr: u64) -> TrieDbState {
    TrieDbState::new(root, db.clone() as Arc<dyn Database>, block_nr)
}

/// After the trie roots are computed, reads the committed account back and
/// writes it through to the database with its history record, the way the
/// block importer drives the two writer faces in lock-step.
pub fn commit_account(
    tds: &TrieDbState,
    address: Address,
    original: Option<&Account>,
) -> Account {
    let account = tds
        .read_account_data(address)
        .expect("read must not fail")
        .expect("account must exist after commit");
    tds.db_state_writer()
        .update_account_data(address, original, &account)
        .expect("db write must not fail");
    account
}
