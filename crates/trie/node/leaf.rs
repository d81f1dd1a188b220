use trieste_rlp::encode::encode_bytes;
use trieste_rlp::structs::Encoder;

use crate::nibbles::Nibbles;

/// A leaf holding a raw value (a storage slot in the composite trie).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafNode {
    /// Remaining key nibbles, leaf-terminated.
    pub partial: Nibbles,
    pub value: Vec<u8>,
    pub last_touched: u64,
}

impl LeafNode {
    pub fn new(partial: Nibbles, value: Vec<u8>, last_touched: u64) -> Self {
        Self {
            partial,
            value,
            last_touched,
        }
    }

    pub fn encode_raw(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        let mut value_rlp = Vec::with_capacity(self.value.len() + 2);
        encode_bytes(&self.value, &mut value_rlp);
        Encoder::new(&mut buf)
            .encode_field(&self.partial.encode_compact())
            .encode_raw(&value_rlp)
            .finish();
        buf
    }
}
