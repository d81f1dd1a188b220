use crate::nibbles::keybytes_to_hex;

/// The set of nibble paths that must stay materialised through a resolve.
///
/// `min_length` keeps every path shorter than it materialised regardless of the
/// seeded entries, so the top levels of a rebuilt subtree stay addressable.
#[derive(Debug, Default)]
pub struct ResolveSet {
    hexes: Vec<Vec<u8>>,
    min_length: usize,
}

impl ResolveSet {
    pub fn new(min_length: usize) -> Self {
        Self {
            hexes: Vec::new(),
            min_length,
        }
    }

    /// Seeds a nibble path. A trailing terminator is ignored.
    pub fn add_hex(&mut self, hex: &[u8]) {
        let hex = match hex.last() {
            Some(16) => &hex[..hex.len() - 1],
            _ => hex,
        };
        self.hexes.push(hex.to_vec());
    }

    /// Seeds the path of a key given in bytes.
    pub fn add_key(&mut self, key: &[u8]) {
        self.add_hex(&keybytes_to_hex(key));
    }

    pub fn is_empty(&self) -> bool {
        self.hexes.is_empty()
    }

    /// True iff the subtree at `prefix` can be collapsed into its hash: no
    /// seeded path is a prefix of, or prefixed by, `prefix`, and `prefix` is at
    /// least `min_length` nibbles deep.
    pub fn hash_only(&self, prefix: &[u8]) -> bool {
        if prefix.len() < self.min_length {
            return false;
        }
        !self.hexes.iter().any(|hex| {
            if hex.len() >= prefix.len() {
                hex[..prefix.len()] == *prefix
            } else {
                prefix[..hex.len()] == *hex
            }
        })
    }
}
