use ethereum_types::H256;
use rustc_hash::{FxHashMap, FxHashSet};
use trieste_trie::Account;

/// Staging area for the updates, deletes and reads registered within one change
/// period: a sub-block boundary within a block, or a whole block within a group
/// of blocks.
///
/// Update maps use `None` as a tombstone. Accounts are held by value, so a
/// buffer frozen at a sub-block boundary cannot alias later mutations.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub account_updates: FxHashMap<H256, Option<Account>>,
    pub storage_updates: FxHashMap<H256, FxHashMap<H256, Option<Vec<u8>>>>,
    pub account_reads: FxHashSet<H256>,
    pub storage_reads: FxHashMap<H256, FxHashSet<H256>>,
    /// Self-destructed accounts.
    pub deleted: FxHashSet<H256>,
    /// Accounts (re-)created by contract deployment.
    pub created: FxHashSet<H256>,
}

impl Buffer {
    /// Merges the content of another buffer into this one; later updates win.
    pub fn merge(&mut self, other: &Buffer) {
        for (addr_hash, slots) in &other.storage_updates {
            self.storage_updates
                .entry(*addr_hash)
                .or_default()
                .extend(slots.iter().map(|(k, v)| (*k, v.clone())));
        }
        for (addr_hash, slots) in &other.storage_reads {
            self.storage_reads
                .entry(*addr_hash)
                .or_default()
                .extend(slots.iter().copied());
        }
        for (addr_hash, account) in &other.account_updates {
            self.account_updates.insert(*addr_hash, account.clone());
        }
        self.account_reads.extend(other.account_reads.iter().copied());
        self.deleted.extend(other.deleted.iter().copied());
        self.created.extend(other.created.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.account_updates.is_empty()
            && self.storage_updates.is_empty()
            && self.account_reads.is_empty()
            && self.storage_reads.is_empty()
            && self.deleted.is_empty()
            && self.created.is_empty()
    }
}
