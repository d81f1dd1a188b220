use trieste_rlp::structs::Encoder;

use super::{Node, NodeFlags};
use crate::nibbles::Nibbles;

/// An extension: a shared run of nibbles over a single child.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionNode {
    /// Shared nibbles, never leaf-terminated and never empty.
    pub prefix: Nibbles,
    pub child: Box<Node>,
    pub flags: NodeFlags,
}

impl ExtensionNode {
    pub fn new(prefix: Nibbles, child: Node, last_touched: u64) -> Self {
        Self {
            prefix,
            child: Box::new(child),
            flags: NodeFlags::touched(last_touched),
        }
    }

    pub fn encode_raw(&mut self) -> Vec<u8> {
        let child_hash = self.child.compute_hash();
        let mut child_ref = Vec::with_capacity(33);
        child_hash.encode_child(&mut child_ref);
        let mut buf = Vec::with_capacity(64);
        Encoder::new(&mut buf)
            .encode_field(&self.prefix.encode_compact())
            .encode_raw(&child_ref)
            .finish();
        buf
    }
}
