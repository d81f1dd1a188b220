pub mod buffer;
pub mod cache;
pub mod database;
pub mod error;
pub mod writers;

use ethereum_types::{Address, H256};
use trieste_trie::Account;

pub use buffer::Buffer;
pub use cache::{get_trie_db_state, StateCache};
pub use database::TrieDbState;
pub use error::StateError;
pub use writers::{DbStateWriter, NoopWriter, TrieStateWriter};

/// Trie cache generation limit after which to evict trie nodes from memory.
pub const MAX_TRIE_CACHE_GEN: u64 = 1024 * 1024;

/// State reads issued by the block executor.
pub trait StateReader {
    fn read_account_data(&self, address: Address) -> Result<Option<Account>, StateError>;
    fn read_account_storage(
        &self,
        address: Address,
        incarnation: u64,
        key: &H256,
    ) -> Result<Option<Vec<u8>>, StateError>;
    fn read_account_code(
        &self,
        address: Address,
        code_hash: H256,
    ) -> Result<Option<Vec<u8>>, StateError>;
    fn read_account_code_size(&self, address: Address, code_hash: H256)
        -> Result<usize, StateError>;
}

/// State writes issued by the block executor. `original` carries the value
/// before the block (`None` when the account never existed), driving history
/// records on the write-through face.
pub trait StateWriter {
    fn update_account_data(
        &mut self,
        address: Address,
        original: Option<&Account>,
        account: &Account,
    ) -> Result<(), StateError>;
    fn update_account_code(&mut self, code_hash: H256, code: &[u8]) -> Result<(), StateError>;
    fn delete_account(
        &mut self,
        address: Address,
        original: Option<&Account>,
    ) -> Result<(), StateError>;
    fn write_account_storage(
        &mut self,
        address: Address,
        incarnation: u64,
        key: &H256,
        original: &H256,
        value: &H256,
    ) -> Result<(), StateError>;
    fn create_contract(&mut self, address: Address) -> Result<(), StateError>;
}
