use std::cmp;

/// A sequence of nibbles (half-bytes) with a leaf flag. The flag replaces the
/// terminator nibble `16` that marks the end of a leaf key in the unpacked form.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nibbles {
    data: Vec<u8>,
    is_leaf: bool,
}

impl Nibbles {
    /// Creates `Nibbles` from unpacked hex nibbles. A trailing `16` is absorbed
    /// into the leaf flag.
    pub fn from_hex(hex: Vec<u8>) -> Self {
        let mut data = hex;
        let is_leaf = data.last() == Some(&16);
        if is_leaf {
            data.pop();
        }
        Self { data, is_leaf }
    }

    /// Splits incoming bytes into nibbles and sets the leaf flag.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_raw(bytes, true)
    }

    /// Splits incoming bytes into nibbles. Each byte becomes two nibbles.
    pub fn from_raw(bytes: &[u8], is_leaf: bool) -> Self {
        let mut data = Vec::with_capacity(bytes.len() * 2);
        for b in bytes {
            data.push(b >> 4);
            data.push(b & 0x0f);
        }
        Self { data, is_leaf }
    }

    /// The unpacked form, with the terminator nibble appended for leaves.
    pub fn into_vec(self) -> Vec<u8> {
        let mut hex = self.data;
        if self.is_leaf {
            hex.push(16);
        }
        hex
    }

    /// The nibbles without the terminator.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of nibbles, counting the leaf terminator if present.
    pub fn len(&self) -> usize {
        self.data.len() + usize::from(self.is_leaf)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && !self.is_leaf
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn set_leaf(&mut self, is_leaf: bool) {
        self.is_leaf = is_leaf;
    }

    /// Nibble at the given index; `16` at the terminator position of a leaf.
    pub fn at(&self, i: usize) -> usize {
        if i < self.data.len() {
            self.data[i] as usize
        } else if i == self.data.len() && self.is_leaf {
            16
        } else {
            panic!(
                "index {} out of range for Nibbles of length {}",
                i,
                self.len()
            );
        }
    }

    /// Removes and returns the first nibble (the terminator counts last).
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<u8> {
        if self.data.is_empty() {
            if self.is_leaf {
                self.is_leaf = false;
                return Some(16);
            }
            return None;
        }
        Some(self.data.remove(0))
    }

    /// Removes and returns the first nibble if it is a suitable choice index (aka < 16)
    pub fn next_choice(&mut self) -> Option<usize> {
        self.next().filter(|choice| *choice < 16).map(usize::from)
    }

    /// If `prefix` is a prefix of self, drop it and return true.
    pub fn skip_prefix(&mut self, prefix: &Nibbles) -> bool {
        if self.data.len() < prefix.data.len() || self.data[..prefix.data.len()] != prefix.data {
            return false;
        }
        self.data.drain(..prefix.data.len());
        true
    }

    /// Shared nibble count with another sequence, from the start.
    pub fn count_prefix(&self, other: &Nibbles) -> usize {
        self.data
            .iter()
            .zip(other.data.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Compares self to another, comparing prefixes only in case of unequal lengths.
    pub fn compare_prefix(&self, other: &Nibbles) -> cmp::Ordering {
        let len = self.data.len().min(other.data.len());
        self.data[..len].cmp(&other.data[..len])
    }

    /// The nibbles after the given offset, preserving the leaf flag.
    pub fn offset(&self, offset: usize) -> Nibbles {
        self.slice(offset, self.len())
    }

    /// The nibbles between the start and end indexes. The leaf flag carries over
    /// only when the slice covers the terminator position.
    pub fn slice(&self, start: usize, end: usize) -> Nibbles {
        let data_end = end.min(self.data.len());
        let data_start = start.min(data_end);
        Nibbles {
            data: self.data[data_start..data_end].to_vec(),
            is_leaf: self.is_leaf && end > self.data.len(),
        }
    }

    pub fn append(&mut self, nibble: u8) {
        self.data.push(nibble);
    }

    /// Returns a copy of self with the nibble added at the end.
    pub fn append_new(&self, nibble: u8) -> Nibbles {
        let mut out = self.clone();
        out.append(nibble);
        out
    }

    pub fn prepend(&mut self, nibble: u8) {
        self.data.insert(0, nibble);
    }

    /// Extends with another sequence, inheriting its leaf flag.
    pub fn extend(&mut self, other: &Nibbles) {
        self.data.extend_from_slice(&other.data);
        self.is_leaf |= other.is_leaf;
    }

    /// Concatenates self and another sequence into a new one.
    pub fn concat(&self, other: &Nibbles) -> Nibbles {
        let mut out = self.clone();
        out.extend(other);
        out
    }

    /// Ethereum hex-prefix (compact) encoding.
    ///
    /// node type    path length    |    prefix    hexchar
    /// --------------------------------------------------
    /// extension    even           |    0000      0x0
    /// extension    odd            |    0001      0x1
    /// leaf         even           |    0010      0x2
    /// leaf         odd            |    0011      0x3
    pub fn encode_compact(&self) -> Vec<u8> {
        let mut prefix: u8 = if self.is_leaf { 0x20 } else { 0x00 };
        let odd = self.data.len() % 2 == 1;
        let mut compact = Vec::with_capacity(self.data.len() / 2 + 1);
        let rest = if odd {
            prefix += 0x10 + self.data[0];
            &self.data[1..]
        } else {
            &self.data[..]
        };
        compact.push(prefix);
        for pair in rest.chunks(2) {
            compact.push((pair[0] << 4) | pair[1]);
        }
        compact
    }

    /// Decodes the hex-prefix form.
    pub fn decode_compact(compact: &[u8]) -> Self {
        let Some(first) = compact.first() else {
            return Nibbles::default();
        };
        let is_leaf = first & 0x20 != 0;
        let odd = first & 0x10 != 0;
        let mut data = Vec::with_capacity(compact.len() * 2);
        if odd {
            data.push(first & 0x0f);
        }
        for b in &compact[1..] {
            data.push(b >> 4);
            data.push(b & 0x0f);
        }
        Nibbles { data, is_leaf }
    }

    /// Packs the nibbles back into bytes. The nibble count must be even.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data
            .chunks(2)
            .map(|pair| (pair[0] << 4) | *pair.get(1).unwrap_or(&0))
            .collect()
    }
}

/// Unpacks key bytes into hex nibbles with the terminator appended.
pub fn keybytes_to_hex(key: &[u8]) -> Vec<u8> {
    let mut hex = Vec::with_capacity(key.len() * 2 + 1);
    for b in key {
        hex.push(b >> 4);
        hex.push(b & 0x0f);
    }
    hex.push(16);
    hex
}

/// Packs hex nibbles (without terminator) two-per-byte. An odd trailing nibble
/// occupies the high half of the last byte.
pub fn hex_to_keybytes(hex: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((hex.len() + 1) / 2);
    for pair in hex.chunks(2) {
        out.push((pair[0] << 4) | pair.get(1).unwrap_or(&0));
    }
    out
}
