use ethereum_types::H256;

pub const HASH_LENGTH: usize = 32;
pub const INCARNATION_LENGTH: usize = 8;

/// Wire form of an incarnation: big-endian, bitwise-negated, so that ascending
/// iteration over storage keys visits the highest existing incarnation first.
pub fn encode_incarnation(incarnation: u64) -> [u8; INCARNATION_LENGTH] {
    (!incarnation).to_be_bytes()
}

pub fn decode_incarnation(bytes: &[u8]) -> u64 {
    let mut be = [0u8; INCARNATION_LENGTH];
    be.copy_from_slice(&bytes[..INCARNATION_LENGTH]);
    !u64::from_be_bytes(be)
}

/// Storage bucket key: `hash(address) ‖ incarnation ‖ hash(slot)`.
pub fn composite_storage_key(
    addr_hash: &H256,
    incarnation: u64,
    slot_hash: &H256,
) -> [u8; HASH_LENGTH + INCARNATION_LENGTH + HASH_LENGTH] {
    let mut key = [0u8; HASH_LENGTH + INCARNATION_LENGTH + HASH_LENGTH];
    key[..HASH_LENGTH].copy_from_slice(addr_hash.as_bytes());
    key[HASH_LENGTH..HASH_LENGTH + INCARNATION_LENGTH]
        .copy_from_slice(&encode_incarnation(incarnation));
    key[HASH_LENGTH + INCARNATION_LENGTH..].copy_from_slice(slot_hash.as_bytes());
    key
}

/// Trie key of a storage slot: `hash(address) ‖ hash(slot)`. The trie does not key
/// by incarnation; wiping a re-created contract's storage is a sub-trie deletion.
pub fn composite_trie_key(addr_hash: &H256, slot_hash: &H256) -> [u8; 2 * HASH_LENGTH] {
    let mut key = [0u8; 2 * HASH_LENGTH];
    key[..HASH_LENGTH].copy_from_slice(addr_hash.as_bytes());
    key[HASH_LENGTH..].copy_from_slice(slot_hash.as_bytes());
    key
}

/// Splits a bit count into `(full bytes, mask for the trailing partial byte)`.
/// The mask is `0x00` when the count is byte-aligned.
pub fn bytes_mask(fixed_bits: u32) -> (usize, u8) {
    let fixed_bytes = (fixed_bits as usize + 7) / 8;
    let shift = fixed_bits % 8;
    let mask = if shift == 0 { 0 } else { 0xff << (8 - shift) };
    (fixed_bytes, mask)
}

/// True if `key` shares the first `fixed_bits` bits with `start_key`.
pub fn matches_fixed_bits(key: &[u8], start_key: &[u8], fixed_bits: u32) -> bool {
    if fixed_bits == 0 {
        return true;
    }
    let (fixed_bytes, mask) = bytes_mask(fixed_bits);
    let whole = if mask == 0 { fixed_bytes } else { fixed_bytes - 1 };
    if key.len() < fixed_bytes || start_key.len() < fixed_bytes {
        return false;
    }
    if key[..whole] != start_key[..whole] {
        return false;
    }
    mask == 0 || (key[whole] & mask) == (start_key[whole] & mask)
}
