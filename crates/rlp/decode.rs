use bytes::Bytes;
use ethereum_types::{Address, H256, U256};

use super::{constants::RLP_NULL, error::RLPDecodeError};

/// Trait for decoding RLP encoded slices of data.
/// Implementors provide [`decode_unfinished`](RLPDecode::decode_unfinished), which
/// returns the decoded value along with the remaining bytes; consumers normally call
/// [`decode`](RLPDecode::decode), which requires the whole input to be consumed.
pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

/// Splits an RLP item into `(is_list, payload, remaining)`.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        0..=0x7f => Ok((false, &data[..1], &data[1..])),
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            split_payload(false, &data[1..], len)
        }
        0xb8..=0xbf => {
            let len_len = (first - 0xb7) as usize;
            let len = decode_length_field(&data[1..], len_len)?;
            split_payload(false, &data[1 + len_len..], len)
        }
        0xc0..=0xf7 => {
            let len = (first - 0xc0) as usize;
            split_payload(true, &data[1..], len)
        }
        0xf8..=0xff => {
            let len_len = (first - 0xf7) as usize;
            let len = decode_length_field(&data[1..], len_len)?;
            split_payload(true, &data[1 + len_len..], len)
        }
    }
}

fn split_payload(is_list: bool, data: &[u8], len: usize) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    if data.len() < len {
        return Err(RLPDecodeError::InvalidLength);
    }
    let (payload, rest) = data.split_at(len);
    Ok((is_list, payload, rest))
}

fn decode_length_field(data: &[u8], len_len: usize) -> Result<usize, RLPDecodeError> {
    if len_len == 0 || len_len > core::mem::size_of::<usize>() || data.len() < len_len {
        return Err(RLPDecodeError::InvalidLength);
    }
    if data[0] == 0 {
        // Lengths must have no leading zeros
        return Err(RLPDecodeError::MalformedData);
    }
    let mut len = 0usize;
    for b in &data[..len_len] {
        len = (len << 8) | *b as usize;
    }
    Ok(len)
}

/// Decodes an RLP byte string, returning `(payload, remaining)`.
pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    match decode_rlp_item(data)? {
        (false, payload, rest) => Ok((payload, rest)),
        (true, _, _) => Err(RLPDecodeError::UnexpectedList),
    }
}

/// Returns the next RLP item including its prefix, along with the remaining bytes.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (_, _, rest) = decode_rlp_item(data)?;
    let item_len = data.len() - rest.len();
    Ok((&data[..item_len], rest))
}

fn static_left_pad<const N: usize>(bytes: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    if bytes.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    if bytes.first() == Some(&0) {
        // Integers are encoded without leading zeros
        return Err(RLPDecodeError::MalformedData);
    }
    let mut padded = [0u8; N];
    padded[N - bytes.len()..].copy_from_slice(bytes);
    Ok(padded)
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match first {
            RLP_NULL => false,
            0x01 => true,
            b => return Err(RLPDecodeError::MalformedBoolean(b)),
        };
        Ok((value, &rlp[1..]))
    }
}

macro_rules! impl_rlp_decode_uint {
    ($t:ty) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                let padded = static_left_pad(bytes)?;
                Ok((<$t>::from_be_bytes(padded), rest))
            }
        }
    };
}

impl_rlp_decode_uint!(u8);
impl_rlp_decode_uint!(u16);
impl_rlp_decode_uint!(u32);
impl_rlp_decode_uint!(u64);
impl_rlp_decode_uint!(usize);

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() > 32 || bytes.first() == Some(&0) {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok((U256::from_big_endian(bytes), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest): ([u8; 32], _) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H256(value), rest))
    }
}

impl RLPDecode for Address {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest): ([u8; 20], _) = RLPDecode::decode_unfinished(rlp)?;
        Ok((Address::from(value), rest))
    }
}

impl RLPDecode for Vec<u8> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((bytes.to_vec(), rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(bytes), rest))
    }
}

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value = bytes
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((value, rest))
    }
}
