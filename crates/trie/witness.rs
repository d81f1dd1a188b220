use ethereum_types::H256;
use rustc_hash::{FxHashMap, FxHashSet};
use trieste_rlp::structs::Encoder;

use crate::error::TrieError;
use crate::nibbles::keybytes_to_hex;
use crate::node::Node;
use crate::resolve_set::ResolveSet;
use crate::Trie;

/// Tracks the keys and code a block touched, when read recording is enabled.
/// Drained once per block to seed the witness resolve set.
#[derive(Debug, Default)]
pub struct ProofGenerator {
    account_touches: FxHashSet<Vec<u8>>,
    storage_touches: FxHashSet<Vec<u8>>,
    codes: FxHashMap<H256, Vec<u8>>,
}

impl ProofGenerator {
    pub fn add_touch(&mut self, key: &[u8]) {
        self.account_touches.insert(key.to_vec());
    }

    pub fn add_storage_touch(&mut self, key: &[u8]) {
        self.storage_touches.insert(key.to_vec());
    }

    pub fn read_code(&mut self, code_hash: H256, code: &[u8]) {
        self.codes.entry(code_hash).or_insert_with(|| code.to_vec());
    }

    pub fn create_code(&mut self, code_hash: H256, code: &[u8]) {
        self.codes.insert(code_hash, code.to_vec());
    }

    /// Drains the touched account and storage keys, sorted.
    pub fn extract_touches(&mut self) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let mut accounts: Vec<Vec<u8>> = self.account_touches.drain().collect();
        let mut storage: Vec<Vec<u8>> = self.storage_touches.drain().collect();
        accounts.sort();
        storage.sort();
        (accounts, storage)
    }

    /// Drains the code read or created during the block.
    pub fn extract_code_map(&mut self) -> FxHashMap<H256, Vec<u8>> {
        std::mem::take(&mut self.codes)
    }
}

/// One instruction of the witness tape.
#[derive(Debug)]
enum WitnessOp {
    /// A raw leaf: compact key and value.
    Leaf(Vec<u8>, Vec<u8>),
    /// An account leaf: compact key and the canonical account RLP.
    Account(Vec<u8>, Vec<u8>, bool),
    /// An extension run over the previously emitted node.
    Extension(Vec<u8>),
    /// A branch over the previously emitted children, low-to-high nibble.
    Branch(u16, bool),
    /// An opaque subtree.
    Hash(H256),
    /// Bytecode needed by the block.
    Code(Vec<u8>),
    /// The state was empty.
    EmptyRoot,
}

const OP_LEAF: u8 = 0x00;
const OP_EXTENSION: u8 = 0x01;
const OP_BRANCH: u8 = 0x02;
const OP_HASH: u8 = 0x03;
const OP_CODE: u8 = 0x04;
const OP_ACCOUNT: u8 = 0x05;
const OP_EMPTY_ROOT: u8 = 0x06;

/// Serialised sizes per instruction kind, reported next to the witness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WitnessStats {
    pub block_nr: u64,
    pub witness_size: usize,
    pub leaf_size: usize,
    pub account_size: usize,
    pub structure_size: usize,
    pub hash_size: usize,
    pub code_size: usize,
}

/// Assembles the witness for one block: the sub-trie the block touched, in a
/// post-order instruction tape, plus every piece of code it read. Subtrees off
/// the touched paths are emitted as hashes.
pub struct BlockWitnessBuilder {
    trace: bool,
    ops: Vec<WitnessOp>,
}

impl BlockWitnessBuilder {
    pub fn new(trace: bool) -> Self {
        Self {
            trace,
            ops: Vec::new(),
        }
    }

    /// Walks the materialised trie, collapsing everything the resolve set does
    /// not retain, and records the code map.
    pub fn make_block_witness(
        &mut self,
        trie: &mut Trie,
        rs: &ResolveSet,
        code_map: FxHashMap<H256, Vec<u8>>,
    ) -> Result<(), TrieError> {
        self.ops.clear();
        let mut codes: Vec<(H256, Vec<u8>)> = code_map.into_iter().collect();
        codes.sort_by_key(|(hash, _)| *hash);
        for (_, code) in codes {
            self.ops.push(WitnessOp::Code(code));
        }
        let root_hash = trie.hash();
        match trie.root_node().cloned() {
            None => self.ops.push(WitnessOp::EmptyRoot),
            Some(root) => {
                if rs.hash_only(&[]) {
                    self.ops.push(WitnessOp::Hash(root_hash));
                } else {
                    let mut path = Vec::with_capacity(128);
                    self.emit(root, &mut path, rs)?;
                }
            }
        }
        if self.trace {
            tracing::debug!(ops = self.ops.len(), "block witness assembled");
        }
        Ok(())
    }

    fn emit(&mut self, mut node: Node, path: &mut Vec<u8>, rs: &ResolveSet) -> Result<(), TrieError> {
        if !path.is_empty() && rs.hash_only(path) {
            let hash = node.compute_hash().finalize();
            self.ops.push(WitnessOp::Hash(hash));
            return Ok(());
        }
        match node {
            Node::Hash(hash) => self.ops.push(WitnessOp::Hash(hash)),
            Node::Leaf(leaf) => self
                .ops
                .push(WitnessOp::Leaf(leaf.partial.encode_compact(), leaf.value)),
            Node::Extension(ext) => {
                let depth = ext.prefix.as_slice().len();
                path.extend_from_slice(ext.prefix.as_slice());
                self.emit(*ext.child, path, rs)?;
                path.truncate(path.len() - depth);
                self.ops
                    .push(WitnessOp::Extension(ext.prefix.encode_compact()));
            }
            Node::Branch(branch) => {
                let mut mask = 0u16;
                let has_value = branch.value.is_some();
                for (idx, child) in branch.children.into_iter().enumerate() {
                    if let Some(child) = child {
                        mask |= 1 << idx;
                        path.push(idx as u8);
                        self.emit(*child, path, rs)?;
                        path.pop();
                    }
                }
                self.ops.push(WitnessOp::Branch(mask, has_value));
            }
            Node::Account(ref mut acc) => {
                let storage_root = acc.storage_root();
                let has_storage = acc.storage.is_some();
                if let Some(storage) = acc.storage.take() {
                    let depth = acc.partial.as_slice().len();
                    path.extend_from_slice(acc.partial.as_slice());
                    self.emit(*storage, path, rs)?;
                    path.truncate(path.len() - depth);
                }
                self.ops.push(WitnessOp::Account(
                    acc.partial.encode_compact(),
                    acc.account.rlp_for_hashing(storage_root),
                    has_storage,
                ));
            }
        }
        Ok(())
    }

    /// Serialises the tape and reports per-category sizes.
    pub fn write_to(&self, out: &mut Vec<u8>) -> WitnessStats {
        let mut stats = WitnessStats::default();
        for op in &self.ops {
            let before = out.len();
            match op {
                WitnessOp::Leaf(key, value) => {
                    out.push(OP_LEAF);
                    Encoder::new(out)
                        .encode_field(key)
                        .encode_field(value)
                        .finish();
                    stats.leaf_size += out.len() - before;
                }
                WitnessOp::Account(key, account_rlp, has_storage) => {
                    out.push(OP_ACCOUNT);
                    Encoder::new(out)
                        .encode_field(key)
                        .encode_field(account_rlp)
                        .encode_field(has_storage)
                        .finish();
                    stats.account_size += out.len() - before;
                }
                WitnessOp::Extension(key) => {
                    out.push(OP_EXTENSION);
                    Encoder::new(out).encode_field(key).finish();
                    stats.structure_size += out.len() - before;
                }
                WitnessOp::Branch(mask, has_value) => {
                    out.push(OP_BRANCH);
                    Encoder::new(out)
                        .encode_field(&(*mask as u64))
                        .encode_field(has_value)
                        .finish();
                    stats.structure_size += out.len() - before;
                }
                WitnessOp::Hash(hash) => {
                    out.push(OP_HASH);
                    out.extend_from_slice(hash.as_bytes());
                    stats.hash_size += out.len() - before;
                }
                WitnessOp::Code(code) => {
                    out.push(OP_CODE);
                    Encoder::new(out).encode_field(code).finish();
                    stats.code_size += out.len() - before;
                }
                WitnessOp::EmptyRoot => {
                    out.push(OP_EMPTY_ROOT);
                    stats.structure_size += out.len() - before;
                }
            }
        }
        stats.witness_size = out.len();
        stats
    }
}

/// Builds the resolve set retaining exactly the touched keys.
pub fn witness_resolve_set(
    account_touches: &[Vec<u8>],
    storage_touches: &[Vec<u8>],
) -> ResolveSet {
    let mut rs = ResolveSet::new(0);
    for key in account_touches {
        rs.add_hex(&keybytes_to_hex(key));
    }
    for key in storage_touches {
        rs.add_hex(&keybytes_to_hex(key));
    }
    rs
}
