use ethereum_types::{H256, U256};
use trieste_rlp::structs::Encoder;

use crate::error::TrieError;
use crate::{EMPTY_CODE_HASH, EMPTY_TRIE_HASH};

const FIELD_NONCE: u8 = 1;
const FIELD_BALANCE: u8 = 2;
const FIELD_INCARNATION: u8 = 4;
const FIELD_ROOT: u8 = 8;
const FIELD_CODE_HASH: u8 = 16;
const FIELD_STORAGE_SIZE: u8 = 32;

/// Semantic state of one account. The storage encoding (field-mask compact form)
/// and the hashing encoding (canonical 4-field RLP) are separate: incarnation and
/// storage size exist only in the database, never under the state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub root: H256,
    pub code_hash: H256,
    pub incarnation: u64,
    pub storage_size: Option<u64>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            root: *EMPTY_TRIE_HASH,
            code_hash: *EMPTY_CODE_HASH,
            incarnation: 0,
            storage_size: None,
        }
    }
}

fn push_int(buf: &mut Vec<u8>, value: u64) {
    let be = value.to_be_bytes();
    let skip = be.iter().take_while(|b| **b == 0).count().min(7);
    buf.push((8 - skip) as u8);
    buf.extend_from_slice(&be[skip..]);
}

fn take_field<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8], TrieError> {
    let len = *data
        .get(*pos)
        .ok_or_else(|| TrieError::AccountDecode("truncated field length".into()))?
        as usize;
    *pos += 1;
    let field = data
        .get(*pos..*pos + len)
        .ok_or_else(|| TrieError::AccountDecode("truncated field payload".into()))?;
    *pos += len;
    Ok(field)
}

fn be_u64(field: &[u8]) -> Result<u64, TrieError> {
    if field.len() > 8 {
        return Err(TrieError::AccountDecode("integer field too long".into()));
    }
    let mut be = [0u8; 8];
    be[8 - field.len()..].copy_from_slice(field);
    Ok(u64::from_be_bytes(be))
}

impl Account {
    /// Compact database form: a field-mask byte followed by length-prefixed
    /// values for each present field. Absent fields carry their defaults.
    pub fn encode_for_storage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 + 32 + 32 + 8 + 8 + 8);
        buf.push(0);
        let mut mask = 0u8;
        if self.nonce != 0 {
            mask |= FIELD_NONCE;
            push_int(&mut buf, self.nonce);
        }
        if !self.balance.is_zero() {
            mask |= FIELD_BALANCE;
            let be = self.balance.to_big_endian();
            let skip = be.iter().take_while(|b| **b == 0).count();
            buf.push((32 - skip) as u8);
            buf.extend_from_slice(&be[skip..]);
        }
        if self.incarnation != 0 {
            mask |= FIELD_INCARNATION;
            push_int(&mut buf, self.incarnation);
        }
        if self.root != *EMPTY_TRIE_HASH {
            mask |= FIELD_ROOT;
            buf.push(32);
            buf.extend_from_slice(self.root.as_bytes());
        }
        if self.code_hash != *EMPTY_CODE_HASH {
            mask |= FIELD_CODE_HASH;
            buf.push(32);
            buf.extend_from_slice(self.code_hash.as_bytes());
        }
        if let Some(size) = self.storage_size {
            mask |= FIELD_STORAGE_SIZE;
            push_int(&mut buf, size);
        }
        buf[0] = mask;
        buf
    }

    pub fn decode_for_storage(data: &[u8]) -> Result<Account, TrieError> {
        let mask = *data
            .first()
            .ok_or_else(|| TrieError::AccountDecode("empty encoding".into()))?;
        let mut account = Account::default();
        let mut pos = 1;
        if mask & FIELD_NONCE != 0 {
            account.nonce = be_u64(take_field(data, &mut pos)?)?;
        }
        if mask & FIELD_BALANCE != 0 {
            let field = take_field(data, &mut pos)?;
            if field.len() > 32 {
                return Err(TrieError::AccountDecode("balance field too long".into()));
            }
            account.balance = U256::from_big_endian(field);
        }
        if mask & FIELD_INCARNATION != 0 {
            account.incarnation = be_u64(take_field(data, &mut pos)?)?;
        }
        if mask & FIELD_ROOT != 0 {
            let field = take_field(data, &mut pos)?;
            if field.len() != 32 {
                return Err(TrieError::AccountDecode("root field must be 32 bytes".into()));
            }
            account.root = H256::from_slice(field);
        }
        if mask & FIELD_CODE_HASH != 0 {
            let field = take_field(data, &mut pos)?;
            if field.len() != 32 {
                return Err(TrieError::AccountDecode(
                    "code hash field must be 32 bytes".into(),
                ));
            }
            account.code_hash = H256::from_slice(field);
        }
        if mask & FIELD_STORAGE_SIZE != 0 {
            account.storage_size = Some(be_u64(take_field(data, &mut pos)?)?);
        }
        if pos != data.len() {
            return Err(TrieError::AccountDecode("trailing bytes".into()));
        }
        Ok(account)
    }

    /// Canonical form committed under the state root:
    /// `RLP([nonce, balance, storage_root, code_hash])`.
    pub fn rlp_for_hashing(&self, storage_root: H256) -> Vec<u8> {
        let mut buf = Vec::with_capacity(110);
        Encoder::new(&mut buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&storage_root)
            .encode_field(&self.code_hash)
            .finish();
        buf
    }
}
