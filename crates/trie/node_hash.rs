use ethereum_types::H256;
use trieste_crypto::keccak::keccak_hash;
use trieste_rlp::encode::encode_bytes;

/// The reference form of a trie node: nodes whose RLP encoding is shorter than 32
/// bytes are inlined into their parent; everything else is referenced by hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHash {
    Hashed(H256),
    Inline([u8; 31], u8),
}

impl NodeHash {
    pub fn from_encoded(encoded: &[u8]) -> NodeHash {
        if encoded.len() < 32 {
            let mut data = [0u8; 31];
            data[..encoded.len()].copy_from_slice(encoded);
            NodeHash::Inline(data, encoded.len() as u8)
        } else {
            NodeHash::Hashed(H256(keccak_hash(encoded)))
        }
    }

    /// The 32-byte form; inline encodings are hashed. This is what the root of a
    /// trie commits to regardless of its encoded size.
    pub fn finalize(&self) -> H256 {
        match self {
            NodeHash::Hashed(hash) => *hash,
            NodeHash::Inline(data, len) => H256(keccak_hash(&data[..*len as usize])),
        }
    }

    pub fn as_inline(&self) -> Option<&[u8]> {
        match self {
            NodeHash::Hashed(_) => None,
            NodeHash::Inline(data, len) => Some(&data[..*len as usize]),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, NodeHash::Inline(..))
    }

    /// Appends the child-reference form to an RLP list payload: the inline
    /// encoding verbatim, or the hash as a 32-byte string.
    pub fn encode_child(&self, buf: &mut Vec<u8>) {
        match self {
            NodeHash::Hashed(hash) => encode_bytes(hash.as_bytes(), buf),
            NodeHash::Inline(data, len) => buf.extend_from_slice(&data[..*len as usize]),
        }
    }
}

impl From<H256> for NodeHash {
    fn from(value: H256) -> Self {
        NodeHash::Hashed(value)
    }
}
