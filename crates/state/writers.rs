use ethereum_types::{Address, H256};
use trieste_kv::keys::composite_storage_key;
use trieste_kv::Bucket;
use trieste_trie::Account;

use crate::database::TrieDbState;
use crate::error::StateError;
use crate::StateWriter;

/// Discards every write. Stands in where execution must not observe effects.
#[derive(Debug, Default)]
pub struct NoopWriter;

impl NoopWriter {
    pub fn new() -> Self {
        Self
    }
}

impl StateWriter for NoopWriter {
    fn update_account_data(
        &mut self,
        _address: Address,
        _original: Option<&Account>,
        _account: &Account,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn update_account_code(&mut self, _code_hash: H256, _code: &[u8]) -> Result<(), StateError> {
        Ok(())
    }

    fn delete_account(
        &mut self,
        _address: Address,
        _original: Option<&Account>,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn write_account_storage(
        &mut self,
        _address: Address,
        _incarnation: u64,
        _key: &H256,
        _original: &H256,
        _value: &H256,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn create_contract(&mut self, _address: Address) -> Result<(), StateError> {
        Ok(())
    }
}

/// Stages writes into the current sub-block buffer; nothing reaches the trie
/// until the buffers replay at commit time.
pub struct TrieStateWriter<'tds> {
    tds: &'tds TrieDbState,
}

impl<'tds> TrieStateWriter<'tds> {
    pub(crate) fn new(tds: &'tds TrieDbState) -> Self {
        Self { tds }
    }
}

fn strip_zeros(value: &H256) -> Vec<u8> {
    let bytes = value.as_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

impl StateWriter for TrieStateWriter<'_> {
    fn update_account_data(
        &mut self,
        address: Address,
        _original: Option<&Account>,
        account: &Account,
    ) -> Result<(), StateError> {
        let addr_hash = self.tds.hash_address(address, false)?;
        self.tds
            .bufs()?
            .current_mut()
            .account_updates
            .insert(addr_hash, Some(account.clone()));
        Ok(())
    }

    fn update_account_code(&mut self, code_hash: H256, code: &[u8]) -> Result<(), StateError> {
        if self.tds.is_resolve_reads() {
            self.tds.with_pg(|pg| pg.create_code(code_hash, code))?;
        }
        Ok(())
    }

    fn delete_account(
        &mut self,
        address: Address,
        _original: Option<&Account>,
    ) -> Result<(), StateError> {
        let addr_hash = self.tds.hash_address(address, false)?;
        let mut bufs = self.tds.bufs()?;
        let current = bufs.current_mut();
        current.account_updates.insert(addr_hash, None);
        current.storage_updates.remove(&addr_hash);
        current.deleted.insert(addr_hash);
        Ok(())
    }

    fn write_account_storage(
        &mut self,
        address: Address,
        _incarnation: u64,
        key: &H256,
        _original: &H256,
        value: &H256,
    ) -> Result<(), StateError> {
        let addr_hash = self.tds.hash_address(address, false)?;
        let seckey = self.tds.hash_key(key, false)?;
        let stripped = strip_zeros(value);
        self.tds
            .bufs()?
            .current_mut()
            .storage_updates
            .entry(addr_hash)
            .or_default()
            .insert(seckey, (!stripped.is_empty()).then_some(stripped));
        Ok(())
    }

    fn create_contract(&mut self, address: Address) -> Result<(), StateError> {
        let addr_hash = self.tds.hash_address(address, true)?;
        self.tds.bufs()?.current_mut().created.insert(addr_hash);
        Ok(())
    }
}

/// Writes straight through to the key-value store and its history buckets. It
/// never touches the in-memory trie; the caller drives it in lock-step with a
/// [`TrieStateWriter`] over the same execution.
pub struct DbStateWriter<'tds> {
    tds: &'tds TrieDbState,
}

impl<'tds> DbStateWriter<'tds> {
    pub(crate) fn new(tds: &'tds TrieDbState) -> Self {
        Self { tds }
    }
}

fn accounts_equal(original: Option<&Account>, account: &Account) -> bool {
    original.is_some_and(|original| original == account)
}

impl StateWriter for DbStateWriter<'_> {
    fn update_account_data(
        &mut self,
        address: Address,
        original: Option<&Account>,
        account: &Account,
    ) -> Result<(), StateError> {
        let addr_hash = self.tds.hash_address(address, true)?;
        let db = self.tds.database();
        db.put(
            Bucket::Accounts,
            addr_hash.as_bytes(),
            &account.encode_for_storage(),
        )?;
        // No history record when the account did not change
        if accounts_equal(original, account) {
            return Ok(());
        }
        let original_data = original
            .map(Account::encode_for_storage)
            .unwrap_or_default();
        db.put_history(
            Bucket::AccountsHistory,
            addr_hash.as_bytes(),
            &original_data,
            self.tds.block_nr(),
            self.tds.is_no_history(),
        )?;
        Ok(())
    }

    fn update_account_code(&mut self, code_hash: H256, code: &[u8]) -> Result<(), StateError> {
        self.tds
            .database()
            .put(Bucket::Code, code_hash.as_bytes(), code)?;
        Ok(())
    }

    fn delete_account(
        &mut self,
        address: Address,
        original: Option<&Account>,
    ) -> Result<(), StateError> {
        let addr_hash = self.tds.hash_address(address, true)?;
        let db = self.tds.database();
        db.delete(Bucket::Accounts, addr_hash.as_bytes())?;
        // An account created and deleted in the same block leaves an empty
        // pre-image
        let original_data = original
            .map(Account::encode_for_storage)
            .unwrap_or_default();
        db.put_history(
            Bucket::AccountsHistory,
            addr_hash.as_bytes(),
            &original_data,
            self.tds.block_nr(),
            self.tds.is_no_history(),
        )?;
        Ok(())
    }

    fn write_account_storage(
        &mut self,
        address: Address,
        incarnation: u64,
        key: &H256,
        original: &H256,
        value: &H256,
    ) -> Result<(), StateError> {
        if original == value {
            return Ok(());
        }
        let seckey = self.tds.hash_key(key, true)?;
        let addr_hash = self.tds.hash_address(address, false)?;
        let composite = composite_storage_key(&addr_hash, incarnation, &seckey);
        let db = self.tds.database();
        let stripped = strip_zeros(value);
        if stripped.is_empty() {
            db.delete(Bucket::Storage, &composite)?;
        } else {
            db.put(Bucket::Storage, &composite, &stripped)?;
        }
        db.put_history(
            Bucket::StorageHistory,
            &composite,
            &strip_zeros(original),
            self.tds.block_nr(),
            self.tds.is_no_history(),
        )?;
        Ok(())
    }

    fn create_contract(&mut self, _address: Address) -> Result<(), StateError> {
        Ok(())
    }
}
