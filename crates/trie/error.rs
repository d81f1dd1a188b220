use ethereum_types::H256;
use thiserror::Error;
use trieste_kv::KvError;
use trieste_rlp::error::RLPDecodeError;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error("mismatching hash: expected {expected:#x}, got {got:#x}")]
    HashMismatch { expected: H256, got: H256 },
    #[error(transparent)]
    Builder(#[from] crate::hash_builder::BuilderError),
    #[error(transparent)]
    RLPDecode(#[from] RLPDecodeError),
    #[error("Invalid account encoding: {0}")]
    AccountDecode(String),
    #[error("Walk reached an unresolved hash node at nibble path {0:02x?}")]
    Unresolved(Vec<u8>),
    #[error("Cannot graft subtree at nibble path {0:02x?}")]
    InvalidHook(Vec<u8>),
    #[error("Key cannot address this operation")]
    InvalidKey,
    #[error(transparent)]
    Db(#[from] KvError),
}
