use ethereum_types::H256;
use trieste_rlp::encode::encode_bytes;
use trieste_rlp::structs::Encoder;

use super::{Node, NodeFlags};
use crate::account::Account;
use crate::nibbles::Nibbles;
use crate::EMPTY_TRIE_HASH;

/// An account leaf with its storage sub-trie attached. Composite storage keys
/// continue through this node into `storage`; deleting the sub-trie keeps the
/// account itself in place.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountNode {
    /// Remaining key nibbles of the account, leaf-terminated.
    pub partial: Nibbles,
    pub account: Account,
    /// Materialised storage sub-trie. `None` means empty storage; an
    /// unmaterialised sub-trie is a `Node::Hash` stub.
    pub storage: Option<Box<Node>>,
    pub flags: NodeFlags,
}

impl AccountNode {
    pub fn new(partial: Nibbles, account: Account, last_touched: u64) -> Self {
        let storage = (account.root != *EMPTY_TRIE_HASH)
            .then(|| Box::new(Node::Hash(account.root)));
        Self {
            partial,
            account,
            storage,
            flags: NodeFlags::touched(last_touched),
        }
    }

    /// Root hash of the storage sub-trie, preferring the live sub-trie over the
    /// recorded account field.
    pub fn storage_root(&mut self) -> H256 {
        match &mut self.storage {
            Some(storage) => storage.compute_hash().finalize(),
            None => *EMPTY_TRIE_HASH,
        }
    }

    pub fn encode_raw(&mut self) -> Vec<u8> {
        let storage_root = self.storage_root();
        let account_rlp = self.account.rlp_for_hashing(storage_root);
        let mut value_rlp = Vec::with_capacity(account_rlp.len() + 2);
        encode_bytes(&account_rlp, &mut value_rlp);
        let mut buf = Vec::with_capacity(value_rlp.len() + 40);
        Encoder::new(&mut buf)
            .encode_field(&self.partial.encode_compact())
            .encode_raw(&value_rlp)
            .finish();
        buf
    }
}
