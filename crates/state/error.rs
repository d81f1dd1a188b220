use ethereum_types::H256;
use thiserror::Error;
use trieste_kv::KvError;
use trieste_trie::TrieError;

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error(transparent)]
    Db(#[from] KvError),
    #[error("mismatched storage root for {address_hash:#x}: expected {expected:#x}, got {got:#x}")]
    StorageRootMismatch {
        address_hash: H256,
        expected: H256,
        got: H256,
    },
    #[error("binary trie witness encoding is not supported")]
    BinaryWitnessUnsupported,
    #[error("Lock Error: Panicked when trying to acquire a lock")]
    Lock,
}
