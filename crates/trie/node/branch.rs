use trieste_rlp::constants::RLP_NULL;
use trieste_rlp::encode::{encode_bytes, encode_list_header};

use super::{Node, NodeFlags};

/// A branch: one child slot per nibble plus the value slot for a key ending here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchNode {
    pub children: [Option<Box<Node>>; 16],
    pub value: Option<Vec<u8>>,
    pub flags: NodeFlags,
}

impl BranchNode {
    pub fn new(last_touched: u64) -> Self {
        Self {
            children: Default::default(),
            value: None,
            flags: NodeFlags::touched(last_touched),
        }
    }

    /// Number of non-empty child slots.
    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }

    /// The index of the only child, when exactly one slot is occupied.
    pub fn sole_child_index(&self) -> Option<usize> {
        let mut found = None;
        for (idx, child) in self.children.iter().enumerate() {
            if child.is_some() {
                if found.is_some() {
                    return None;
                }
                found = Some(idx);
            }
        }
        found
    }

    pub fn encode_raw(&mut self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(17 * 33);
        for child in self.children.iter_mut() {
            match child {
                Some(child) => child.compute_hash().encode_child(&mut payload),
                None => payload.push(RLP_NULL),
            }
        }
        match &self.value {
            Some(value) => encode_bytes(value, &mut payload),
            None => payload.push(RLP_NULL),
        }
        let mut buf = Vec::with_capacity(payload.len() + 4);
        encode_list_header(payload.len(), &mut buf);
        buf.extend_from_slice(&payload);
        buf
    }
}
