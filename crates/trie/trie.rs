pub mod account;
pub mod error;
pub mod hash_builder;
mod nibbles;
pub mod node;
mod node_hash;
pub mod pruner;
pub mod resolve_set;
pub mod resolver;
pub mod witness;

use ethereum_types::H256;
use lazy_static::lazy_static;
use trieste_crypto::keccak::keccak_hash;
use trieste_rlp::constants::RLP_NULL;

pub use self::account::Account;
pub use self::error::TrieError;
pub use self::nibbles::{hex_to_keybytes, keybytes_to_hex, Nibbles};
pub use self::node::{AccountNode, BranchNode, ExtensionNode, LeafNode, Node, ValueOrAccount};
pub use self::node_hash::NodeHash;
pub use self::pruner::TriePruning;
pub use self::resolve_set::ResolveSet;
pub use self::resolver::{ResolveRequest, TrieResolver};
pub use self::witness::{BlockWitnessBuilder, ProofGenerator, WitnessStats};

use self::node::{OpCtx, RemoveResult};

lazy_static! {
    /// Hash of an empty trie, `keccak(rlp(""))`.
    pub static ref EMPTY_TRIE_HASH: H256 = H256(keccak_hash([RLP_NULL]));
    /// Hash of empty bytecode, `keccak("")`.
    pub static ref EMPTY_CODE_HASH: H256 = H256(keccak_hash([]));
}

/// Callback receiving `(nibble path, deleted)` whenever a traversal enters or
/// removes a node.
pub type TouchFn = Box<dyn Fn(&[u8], bool) + Send + Sync>;

/// Mutable position inside the trie that a subtree can be grafted onto.
enum SlotMut<'a> {
    Node(&'a mut Node),
    AccountStorage(&'a mut AccountNode),
}

/// In-memory hex-nibble Merkle-Patricia trie over the account and storage state.
///
/// The resident nodes are a cache of the full on-disk state: unmaterialised
/// subtrees are `Node::Hash` stubs, grafted over by the resolver and re-created
/// by the pruner. Account keys are 32 hashed bytes; storage keys are the 64-byte
/// composite `hash(address) ‖ hash(slot)` and run through the account node into
/// its storage sub-trie.
pub struct Trie {
    root: Option<Node>,
    touch_fn: Option<TouchFn>,
}

impl Trie {
    /// A trie whose content is behind the given root hash, to be materialised
    /// on demand.
    pub fn new(root: H256) -> Self {
        Self {
            root: (root != *EMPTY_TRIE_HASH).then_some(Node::Hash(root)),
            touch_fn: None,
        }
    }

    /// An empty trie.
    pub fn empty() -> Self {
        Self {
            root: None,
            touch_fn: None,
        }
    }

    /// Registers the touch callback feeding the pruner.
    pub fn set_touch_func(&mut self, touch_fn: TouchFn) {
        self.touch_fn = Some(touch_fn);
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    /// Retrieves a raw value. `None` means the trie cannot answer (the walk met
    /// an unmaterialised subtree); `Some(None)` means the key is known absent.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let hex = keybytes_to_hex(key);
        match &self.root {
            None => Some(None),
            Some(node) => node.get(&hex, 0).map(|v| v.map(<[u8]>::to_vec)),
        }
    }

    /// Retrieves an account record, with the same resolution semantics as `get`.
    pub fn get_account(&self, key: &[u8]) -> Option<Option<Account>> {
        let hex = keybytes_to_hex(key);
        match &self.root {
            None => Some(None),
            Some(node) => node.get_account(&hex, 0).map(|a| a.cloned()),
        }
    }

    /// Inserts or overwrites a raw value.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>, block_nr: u64) -> Result<(), TrieError> {
        self.insert_value(key, ValueOrAccount::Bytes(value), block_nr)
    }

    /// Inserts or overwrites an account. An existing storage sub-trie stays
    /// attached to the new record.
    pub fn update_account(
        &mut self,
        key: &[u8],
        account: Account,
        block_nr: u64,
    ) -> Result<(), TrieError> {
        self.insert_value(key, ValueOrAccount::Account(account), block_nr)
    }

    fn insert_value(
        &mut self,
        key: &[u8],
        value: ValueOrAccount,
        block_nr: u64,
    ) -> Result<(), TrieError> {
        let hex = keybytes_to_hex(key);
        let ctx = OpCtx {
            hex: &hex,
            block_nr,
            touch: self.touch_fn.as_ref(),
        };
        match &mut self.root {
            Some(node) => node.insert(&ctx, 0, value),
            root @ None => {
                ctx.touch(0, false);
                *root = Some(node::value_node(&ctx, 0, value));
                Ok(())
            }
        }
    }

    /// Removes the value or account at the key. Removing an account removes its
    /// storage sub-trie with it.
    pub fn delete(&mut self, key: &[u8], block_nr: u64) -> Result<(), TrieError> {
        let hex = keybytes_to_hex(key);
        let ctx = OpCtx {
            hex: &hex,
            block_nr,
            touch: self.touch_fn.as_ref(),
        };
        if let Some(node) = &mut self.root {
            if node.remove(&ctx, 0)? == RemoveResult::BecameEmpty {
                self.root = None;
            }
        }
        Ok(())
    }

    /// Removes every key under the given byte prefix. A prefix addressing an
    /// account exactly empties its storage sub-trie but keeps the account node.
    pub fn delete_subtree(&mut self, prefix: &[u8], block_nr: u64) -> Result<(), TrieError> {
        let hex: Vec<u8> = Nibbles::from_raw(prefix, false).into_vec();
        let ctx = OpCtx {
            hex: &hex,
            block_nr,
            touch: self.touch_fn.as_ref(),
        };
        if let Some(node) = &mut self.root {
            if node.delete_subtree_at(&ctx, 0)? == RemoveResult::BecameEmpty {
                self.root = None;
            }
        }
        Ok(())
    }

    /// Root hash of the trie; idempotent, memoised on interior nodes.
    pub fn hash(&mut self) -> H256 {
        match &mut self.root {
            None => *EMPTY_TRIE_HASH,
            Some(node) => node.compute_hash().finalize(),
        }
    }

    /// Root hash of the storage sub-trie of the account under `prefix`
    /// (32 key bytes). `None` when no such account is materialised.
    pub fn deep_hash(&mut self, prefix: &[u8]) -> Option<H256> {
        let hex: Vec<u8> = Nibbles::from_raw(prefix, false).into_vec();
        match self.slot_at_mut(&hex)? {
            SlotMut::AccountStorage(acc) => Some(acc.storage_root()),
            SlotMut::Node(_) => None,
        }
    }

    /// Incarnation recorded on the materialised account under `prefix`, if any.
    pub fn account_incarnation(&self, key: &[u8]) -> Option<u64> {
        self.get_account(key)?.map(|account| account.incarnation)
    }

    /// Reports whether walking toward `key` meets an unmaterialised subtree
    /// before the key is exhausted, and the request that would materialise it.
    /// For storage keys, `contract` is the 32-byte address hash and `key` the
    /// 64-byte composite.
    pub fn need_resolution(
        &self,
        contract: Option<&[u8]>,
        key: &[u8],
    ) -> Option<ResolveRequest> {
        let hex = keybytes_to_hex(key);
        let mut node = self.root.as_ref()?;
        let mut pos = 0;
        let mut incarnation = 0u64;
        let mut boundary: Option<usize> = None;
        loop {
            match node {
                Node::Hash(hash) => {
                    return Some(self.make_request(contract, &hex, pos, boundary, incarnation, *hash));
                }
                Node::Leaf(_) => return None,
                Node::Extension(ext) => {
                    let prefix = ext.prefix.as_slice();
                    if hex[pos..].starts_with(prefix) {
                        pos += prefix.len();
                        node = ext.child.as_ref();
                    } else {
                        return None;
                    }
                }
                Node::Branch(branch) => match hex[pos] as usize {
                    16 => return None,
                    idx => match &branch.children[idx] {
                        Some(child) => {
                            pos += 1;
                            node = child.as_ref();
                        }
                        None => return None,
                    },
                },
                Node::Account(acc) => {
                    let partial = acc.partial.as_slice();
                    if !hex[pos..].starts_with(partial) {
                        return None;
                    }
                    pos += partial.len();
                    if hex[pos] == 16 {
                        return None;
                    }
                    incarnation = acc.account.incarnation;
                    boundary = Some(pos);
                    match &acc.storage {
                        Some(storage) => node = storage.as_ref(),
                        None => return None,
                    }
                }
            }
        }
    }

    /// The resolution that a deletion of `key` would additionally require: when
    /// the key's parent branch would collapse to a single sibling that is only
    /// present as a hash, that sibling's top node must be materialised for the
    /// nibble merge.
    pub fn delete_resolution(
        &self,
        contract: Option<&[u8]>,
        key: &[u8],
    ) -> Option<ResolveRequest> {
        let hex = keybytes_to_hex(key);
        let mut node = self.root.as_ref()?;
        let mut pos = 0;
        let mut incarnation = 0u64;
        let mut boundary: Option<usize> = None;
        // Deepest branch on the walk that deletion would collapse
        let mut candidate: Option<(usize, usize)> = None;
        loop {
            match node {
                Node::Hash(_) | Node::Leaf(_) => break,
                Node::Extension(ext) => {
                    let prefix = ext.prefix.as_slice();
                    if !hex[pos..].starts_with(prefix) {
                        break;
                    }
                    pos += prefix.len();
                    node = ext.child.as_ref();
                }
                Node::Branch(branch) => {
                    let idx = hex[pos] as usize;
                    if idx >= 16 {
                        break;
                    }
                    let Some(child) = &branch.children[idx] else {
                        break;
                    };
                    if branch.child_count() == 2 && branch.value.is_none() {
                        candidate = Some((pos, idx));
                    } else {
                        candidate = None;
                    }
                    pos += 1;
                    node = child.as_ref();
                }
                Node::Account(acc) => {
                    let partial = acc.partial.as_slice();
                    if !hex[pos..].starts_with(partial) {
                        break;
                    }
                    pos += partial.len();
                    if hex[pos] == 16 {
                        break;
                    }
                    incarnation = acc.account.incarnation;
                    boundary = Some(pos);
                    candidate = None;
                    match &acc.storage {
                        Some(storage) => node = storage.as_ref(),
                        None => break,
                    }
                }
            }
        }
        let (branch_pos, taken_idx) = candidate?;
        let (sibling_nibble, sibling_hash) = self.sibling_hash(&hex, branch_pos, taken_idx)?;
        let mut sibling_hex = hex[..branch_pos].to_vec();
        sibling_hex.push(sibling_nibble);
        let pos = sibling_hex.len();
        sibling_hex.push(16);
        let mut request =
            self.make_request(contract, &sibling_hex, pos, boundary, incarnation, sibling_hash);
        request.top_only = true;
        Some(request)
    }

    /// The only other child of the branch at `hex[..branch_pos]`, when it is an
    /// unmaterialised hash.
    fn sibling_hash(&self, hex: &[u8], branch_pos: usize, taken_idx: usize) -> Option<(u8, H256)> {
        let mut node = self.root.as_ref()?;
        let mut pos = 0;
        loop {
            if pos == branch_pos {
                let Node::Branch(branch) = node else {
                    return None;
                };
                for (idx, child) in branch.children.iter().enumerate() {
                    if idx == taken_idx {
                        continue;
                    }
                    if let Some(child) = child {
                        return match child.as_ref() {
                            Node::Hash(hash) => Some((idx as u8, *hash)),
                            _ => None,
                        };
                    }
                }
                return None;
            }
            match node {
                Node::Extension(ext) => {
                    pos += ext.prefix.as_slice().len();
                    node = ext.child.as_ref();
                }
                Node::Branch(branch) => {
                    node = branch.children[hex[pos] as usize].as_deref()?;
                    pos += 1;
                }
                Node::Account(acc) => {
                    pos += acc.partial.as_slice().len();
                    node = acc.storage.as_deref()?;
                }
                _ => return None,
            }
        }
    }

    fn make_request(
        &self,
        contract: Option<&[u8]>,
        hex: &[u8],
        pos: usize,
        boundary: Option<usize>,
        incarnation: u64,
        hash: H256,
    ) -> ResolveRequest {
        match (contract, boundary) {
            (Some(addr), Some(boundary)) if pos >= boundary => {
                let mut contract_key = Vec::with_capacity(addr.len() + 8);
                contract_key.extend_from_slice(addr);
                contract_key.extend_from_slice(&trieste_kv::keys::encode_incarnation(incarnation));
                ResolveRequest::new(
                    Some(contract_key),
                    hex[boundary..hex.len() - 1].to_vec(),
                    pos - boundary,
                    hash,
                )
            }
            (Some(_), _) => {
                // The walk stopped before the account: resolve the account path
                ResolveRequest::new(None, hex[..64.min(hex.len() - 1)].to_vec(), pos, hash)
            }
            (None, _) => {
                ResolveRequest::new(None, hex[..hex.len() - 1].to_vec(), pos, hash)
            }
        }
    }

    fn slot_at_mut(&mut self, prefix: &[u8]) -> Option<SlotMut<'_>> {
        let mut node = self.root.as_mut()?;
        let mut pos = 0;
        loop {
            if pos == prefix.len() {
                return Some(SlotMut::Node(node));
            }
            match node {
                Node::Hash(_) | Node::Leaf(_) => return None,
                Node::Extension(ext) => {
                    let run = ext.prefix.as_slice();
                    if !prefix[pos..].starts_with(run) {
                        return None;
                    }
                    pos += run.len();
                    node = ext.child.as_mut();
                }
                Node::Branch(branch) => {
                    let idx = prefix[pos] as usize;
                    if idx >= 16 {
                        return None;
                    }
                    node = branch.children[idx].as_mut()?.as_mut();
                    pos += 1;
                }
                Node::Account(acc) => {
                    let partial = acc.partial.as_slice();
                    let rem = &prefix[pos..];
                    if rem == partial {
                        return Some(SlotMut::AccountStorage(acc.as_mut()));
                    }
                    if !rem.starts_with(partial) {
                        return None;
                    }
                    pos += partial.len();
                    node = acc.storage.as_mut()?.as_mut();
                }
            }
        }
    }

    /// Grafts a materialised subtree over the stub at the given nibble path. A
    /// path ending at an account grafts its storage sub-trie root.
    pub fn hook(&mut self, prefix: &[u8], node: Node, block_nr: u64) -> Result<(), TrieError> {
        if let Some(touch) = self.touch_fn.as_ref() {
            let mut path = prefix.to_vec();
            node.touch_all(&mut path, false, touch);
        }
        if prefix.is_empty() {
            self.root = Some(node);
            return Ok(());
        }
        match self.slot_at_mut(prefix) {
            Some(SlotMut::Node(slot)) => {
                *slot = node;
                Ok(())
            }
            Some(SlotMut::AccountStorage(acc)) => {
                acc.storage = Some(Box::new(node));
                acc.flags.last_touched = acc.flags.last_touched.max(block_nr);
                Ok(())
            }
            None => Err(TrieError::InvalidHook(prefix.to_vec())),
        }
    }

    /// Collapses the subtree at the given nibble path back into its hash if it
    /// has not been touched at or after `threshold`. The root hash is unchanged.
    /// Returns the number of nodes dropped from memory.
    pub fn unload(&mut self, prefix: &[u8], threshold: u64) -> usize {
        let slot = match self.slot_at_mut(prefix) {
            Some(SlotMut::Node(slot)) => slot,
            Some(SlotMut::AccountStorage(acc)) => match &mut acc.storage {
                Some(storage) => storage.as_mut(),
                None => return 0,
            },
            None => return 0,
        };
        if matches!(slot, Node::Hash(_)) || slot.last_touched() >= threshold {
            return 0;
        }
        let hash = slot.compute_hash();
        if hash.is_inline() {
            // Nodes inlined into their parent cannot be re-resolved by hash
            return 0;
        }
        let count = slot.count_prunable();
        *slot = Node::Hash(hash.finalize());
        count
    }

    /// Number of resident nodes the pruner could unload.
    pub fn count_prunable_nodes(&self) -> usize {
        self.root.as_ref().map(Node::count_prunable).unwrap_or(0)
    }

    /// Dumps the resident structure for debugging.
    pub fn print(&self, w: &mut dyn std::io::Write) -> std::io::Result<()> {
        fn go(node: &Node, depth: usize, w: &mut dyn std::io::Write) -> std::io::Result<()> {
            let pad = "  ".repeat(depth);
            match node {
                Node::Hash(hash) => writeln!(w, "{pad}hash {hash:?}"),
                Node::Leaf(leaf) => writeln!(
                    w,
                    "{pad}leaf {:02x?} ({} bytes)",
                    leaf.partial.as_slice(),
                    leaf.value.len()
                ),
                Node::Extension(ext) => {
                    writeln!(w, "{pad}ext {:02x?}", ext.prefix.as_slice())?;
                    go(&ext.child, depth + 1, w)
                }
                Node::Branch(branch) => {
                    writeln!(w, "{pad}branch (value: {})", branch.value.is_some())?;
                    for (idx, child) in branch.children.iter().enumerate() {
                        if let Some(child) = child {
                            writeln!(w, "{pad} [{idx:x}]")?;
                            go(child, depth + 1, w)?;
                        }
                    }
                    Ok(())
                }
                Node::Account(acc) => {
                    writeln!(
                        w,
                        "{pad}account {:02x?} nonce={} incarnation={}",
                        acc.partial.as_slice(),
                        acc.account.nonce,
                        acc.account.incarnation
                    )?;
                    if let Some(storage) = &acc.storage {
                        go(storage, depth + 1, w)?;
                    }
                    Ok(())
                }
            }
        }
        match &self.root {
            None => writeln!(w, "(empty)"),
            Some(node) => go(node, 0, w),
        }
    }
}
