use sha3::{Digest, Keccak256};

/// Computes the Keccak-256 hash of the input.
pub fn keccak_hash(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    hasher.finalize().into()
}
