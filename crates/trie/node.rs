mod account;
mod branch;
mod extension;
mod leaf;

use ethereum_types::H256;

pub use account::AccountNode;
pub use branch::BranchNode;
pub use extension::ExtensionNode;
pub use leaf::LeafNode;

use crate::account::Account;
use crate::error::TrieError;
use crate::nibbles::Nibbles;
use crate::node_hash::NodeHash;
use crate::TouchFn;

/// Hash memo and recency marker shared by interior nodes. Any mutation below a
/// node clears its memo; the pruner requires a parent to be at least as recent
/// as its children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFlags {
    pub hash: Option<NodeHash>,
    pub last_touched: u64,
}

impl NodeFlags {
    pub fn touched(block_nr: u64) -> Self {
        Self {
            hash: None,
            last_touched: block_nr,
        }
    }
}

/// A node of the state trie.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(LeafNode),
    Extension(ExtensionNode),
    Branch(Box<BranchNode>),
    Account(Box<AccountNode>),
    /// Stub standing in for an unmaterialised subtree.
    Hash(H256),
}

impl From<LeafNode> for Node {
    fn from(value: LeafNode) -> Self {
        Node::Leaf(value)
    }
}

impl From<ExtensionNode> for Node {
    fn from(value: ExtensionNode) -> Self {
        Node::Extension(value)
    }
}

impl From<BranchNode> for Node {
    fn from(value: BranchNode) -> Self {
        Node::Branch(Box::new(value))
    }
}

impl From<AccountNode> for Node {
    fn from(value: AccountNode) -> Self {
        Node::Account(Box::new(value))
    }
}

/// What a trie mutation inserts: a raw value or a decoded account.
#[derive(Debug, Clone)]
pub enum ValueOrAccount {
    Bytes(Vec<u8>),
    Account(Account),
}

impl From<Vec<u8>> for ValueOrAccount {
    fn from(value: Vec<u8>) -> Self {
        ValueOrAccount::Bytes(value)
    }
}

impl From<Account> for ValueOrAccount {
    fn from(value: Account) -> Self {
        ValueOrAccount::Account(value)
    }
}

/// Outcome of a removal below a node.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RemoveResult {
    NotFound,
    Removed,
    BecameEmpty,
}

/// Traversal context: the full unpacked key and the touch sink.
pub(crate) struct OpCtx<'a> {
    pub hex: &'a [u8],
    pub block_nr: u64,
    pub touch: Option<&'a TouchFn>,
}

impl OpCtx<'_> {
    pub fn touch(&self, pos: usize, del: bool) {
        if let Some(touch) = self.touch {
            touch(&self.hex[..pos], del);
        }
    }
}

/// Builds the node holding `value` for the key tail starting at `pos`.
pub(crate) fn value_node(ctx: &OpCtx<'_>, pos: usize, value: ValueOrAccount) -> Node {
    let partial = Nibbles::from_hex(ctx.hex[pos..].to_vec());
    match value {
        ValueOrAccount::Bytes(bytes) => LeafNode::new(partial, bytes, ctx.block_nr).into(),
        ValueOrAccount::Account(account) => {
            AccountNode::new(partial, account, ctx.block_nr).into()
        }
    }
}

fn common_len(partial: &Nibbles, hex: &[u8], pos: usize) -> usize {
    partial
        .as_slice()
        .iter()
        .zip(&hex[pos..])
        .take_while(|(a, b)| a == b)
        .count()
}

impl Node {
    /// Retrieves a raw value. `None` means the walk met an unresolved hash node;
    /// `Some(None)` means the key is known to be absent.
    pub(crate) fn get<'a>(&'a self, hex: &[u8], pos: usize) -> Option<Option<&'a [u8]>> {
        match self {
            Node::Hash(_) => None,
            Node::Leaf(leaf) => {
                let m = common_len(&leaf.partial, hex, pos);
                if m == leaf.partial.as_slice().len() && hex[pos + m] == 16 {
                    Some(Some(&leaf.value))
                } else {
                    Some(None)
                }
            }
            Node::Extension(ext) => {
                let m = common_len(&ext.prefix, hex, pos);
                if m == ext.prefix.as_slice().len() {
                    ext.child.get(hex, pos + m)
                } else {
                    Some(None)
                }
            }
            Node::Branch(branch) => match hex[pos] as usize {
                16 => Some(branch.value.as_deref()),
                idx => match &branch.children[idx] {
                    Some(child) => child.get(hex, pos + 1),
                    None => Some(None),
                },
            },
            Node::Account(acc) => {
                let m = common_len(&acc.partial, hex, pos);
                if m < acc.partial.as_slice().len() {
                    return Some(None);
                }
                if hex[pos + m] == 16 {
                    // The account position holds no raw value
                    return Some(None);
                }
                match &acc.storage {
                    Some(storage) => storage.get(hex, pos + m),
                    None => Some(None),
                }
            }
        }
    }

    /// Retrieves an account record, with the same resolution semantics as `get`.
    pub(crate) fn get_account<'a>(&'a self, hex: &[u8], pos: usize) -> Option<Option<&'a Account>> {
        match self {
            Node::Hash(_) => None,
            Node::Leaf(_) => Some(None),
            Node::Extension(ext) => {
                let m = common_len(&ext.prefix, hex, pos);
                if m == ext.prefix.as_slice().len() {
                    ext.child.get_account(hex, pos + m)
                } else {
                    Some(None)
                }
            }
            Node::Branch(branch) => match hex[pos] as usize {
                16 => Some(None),
                idx => match &branch.children[idx] {
                    Some(child) => child.get_account(hex, pos + 1),
                    None => Some(None),
                },
            },
            Node::Account(acc) => {
                let m = common_len(&acc.partial, hex, pos);
                if m == acc.partial.as_slice().len() && hex[pos + m] == 16 {
                    Some(Some(&acc.account))
                } else {
                    Some(None)
                }
            }
        }
    }

    pub(crate) fn insert(
        &mut self,
        ctx: &OpCtx<'_>,
        pos: usize,
        value: ValueOrAccount,
    ) -> Result<(), TrieError> {
        ctx.touch(pos, false);
        match self {
            Node::Hash(_) => Err(TrieError::Unresolved(ctx.hex[..pos].to_vec())),
            Node::Leaf(leaf) => {
                let m = common_len(&leaf.partial, ctx.hex, pos);
                if m == leaf.partial.as_slice().len() && ctx.hex[pos + m] == 16 {
                    match value {
                        ValueOrAccount::Bytes(bytes) => {
                            leaf.value = bytes;
                            leaf.last_touched = ctx.block_nr;
                        }
                        ValueOrAccount::Account(account) => {
                            let partial = std::mem::take(&mut leaf.partial);
                            *self = AccountNode::new(partial, account, ctx.block_nr).into();
                        }
                    }
                    return Ok(());
                }
                let old_partial = std::mem::take(&mut leaf.partial);
                let old_value = std::mem::take(&mut leaf.value);
                let old = LeafNode::new(old_partial.offset(m + 1), old_value, leaf.last_touched);
                *self = split_at(ctx, pos, m, &old_partial, old.into(), value)?;
                Ok(())
            }
            Node::Extension(ext) => {
                let m = common_len(&ext.prefix, ctx.hex, pos);
                if m == ext.prefix.as_slice().len() {
                    ext.child.insert(ctx, pos + m, value)?;
                    ext.flags = NodeFlags::touched(ctx.block_nr);
                    return Ok(());
                }
                let old_prefix = std::mem::take(&mut ext.prefix);
                let old_child =
                    std::mem::replace(&mut ext.child, Box::new(Node::Hash(H256::zero())));
                let tail = old_prefix.slice(m + 1, old_prefix.len());
                let old = if tail.is_empty() {
                    *old_child
                } else {
                    ExtensionNode::new(tail, *old_child, ext.flags.last_touched).into()
                };
                *self = split_at(ctx, pos, m, &old_prefix, old, value)?;
                Ok(())
            }
            Node::Branch(branch) => {
                branch.flags = NodeFlags::touched(ctx.block_nr);
                match ctx.hex[pos] as usize {
                    16 => match value {
                        ValueOrAccount::Bytes(bytes) => {
                            branch.value = Some(bytes);
                            Ok(())
                        }
                        ValueOrAccount::Account(_) => Err(TrieError::InvalidKey),
                    },
                    idx => match &mut branch.children[idx] {
                        Some(child) => child.insert(ctx, pos + 1, value),
                        slot @ None => {
                            *slot = Some(Box::new(value_node(ctx, pos + 1, value)));
                            Ok(())
                        }
                    },
                }
            }
            Node::Account(acc) => {
                let m = common_len(&acc.partial, ctx.hex, pos);
                let plen = acc.partial.as_slice().len();
                if m == plen {
                    acc.flags = NodeFlags::touched(ctx.block_nr);
                    if ctx.hex[pos + m] == 16 {
                        match value {
                            ValueOrAccount::Account(account) => {
                                // The live storage sub-trie stays authoritative,
                                // unless the incarnation moved: that storage
                                // belongs to another lifetime of the address
                                if account.incarnation != acc.account.incarnation {
                                    acc.storage = (account.root != *crate::EMPTY_TRIE_HASH)
                                        .then(|| Box::new(Node::Hash(account.root)));
                                }
                                acc.account = account;
                                Ok(())
                            }
                            ValueOrAccount::Bytes(_) => Err(TrieError::InvalidKey),
                        }
                    } else {
                        match &mut acc.storage {
                            Some(storage) => storage.insert(ctx, pos + m, value),
                            slot @ None => {
                                *slot = Some(Box::new(value_node(ctx, pos + m, value)));
                                Ok(())
                            }
                        }
                    }
                } else {
                    let old_partial = std::mem::take(&mut acc.partial);
                    let mut old = std::mem::replace(
                        acc.as_mut(),
                        AccountNode::new(Nibbles::default(), Account::default(), 0),
                    );
                    old.partial = old_partial.offset(m + 1);
                    *self = split_at(ctx, pos, m, &old_partial, old.into(), value)?;
                    Ok(())
                }
            }
        }
    }

    /// Removes the value at the key, restructuring collapsed branches on the way
    /// back up.
    pub(crate) fn remove(&mut self, ctx: &OpCtx<'_>, pos: usize) -> Result<RemoveResult, TrieError> {
        ctx.touch(pos, false);
        match self {
            Node::Hash(_) => Err(TrieError::Unresolved(ctx.hex[..pos].to_vec())),
            Node::Leaf(leaf) => {
                let m = common_len(&leaf.partial, ctx.hex, pos);
                if m == leaf.partial.as_slice().len() && ctx.hex[pos + m] == 16 {
                    ctx.touch(pos, true);
                    Ok(RemoveResult::BecameEmpty)
                } else {
                    Ok(RemoveResult::NotFound)
                }
            }
            Node::Extension(ext) => {
                let m = common_len(&ext.prefix, ctx.hex, pos);
                if m != ext.prefix.as_slice().len() {
                    return Ok(RemoveResult::NotFound);
                }
                match ext.child.remove(ctx, pos + m)? {
                    RemoveResult::NotFound => Ok(RemoveResult::NotFound),
                    RemoveResult::BecameEmpty => {
                        ctx.touch(pos, true);
                        Ok(RemoveResult::BecameEmpty)
                    }
                    RemoveResult::Removed => {
                        ext.flags = NodeFlags::touched(ctx.block_nr);
                        self.merge_extension_child();
                        Ok(RemoveResult::Removed)
                    }
                }
            }
            Node::Branch(branch) => {
                let removed = match ctx.hex[pos] as usize {
                    16 => {
                        if branch.value.take().is_none() {
                            return Ok(RemoveResult::NotFound);
                        }
                        true
                    }
                    idx => match &mut branch.children[idx] {
                        Some(child) => match child.remove(ctx, pos + 1)? {
                            RemoveResult::NotFound => return Ok(RemoveResult::NotFound),
                            RemoveResult::Removed => false,
                            RemoveResult::BecameEmpty => {
                                branch.children[idx] = None;
                                true
                            }
                        },
                        None => return Ok(RemoveResult::NotFound),
                    },
                };
                branch.flags = NodeFlags::touched(ctx.block_nr);
                if removed {
                    self.collapse_branch(ctx, pos)
                } else {
                    Ok(RemoveResult::Removed)
                }
            }
            Node::Account(acc) => {
                let m = common_len(&acc.partial, ctx.hex, pos);
                if m < acc.partial.as_slice().len() {
                    return Ok(RemoveResult::NotFound);
                }
                if ctx.hex[pos + m] == 16 {
                    // Deleting the account removes its storage sub-trie with it
                    if let (Some(storage), Some(touch)) = (&acc.storage, ctx.touch) {
                        let mut prefix = ctx.hex[..pos + m].to_vec();
                        storage.touch_all(&mut prefix, true, touch);
                    }
                    ctx.touch(pos, true);
                    return Ok(RemoveResult::BecameEmpty);
                }
                match &mut acc.storage {
                    Some(storage) => match storage.remove(ctx, pos + m)? {
                        RemoveResult::NotFound => Ok(RemoveResult::NotFound),
                        RemoveResult::Removed => {
                            acc.flags = NodeFlags::touched(ctx.block_nr);
                            Ok(RemoveResult::Removed)
                        }
                        RemoveResult::BecameEmpty => {
                            acc.storage = None;
                            acc.flags = NodeFlags::touched(ctx.block_nr);
                            Ok(RemoveResult::Removed)
                        }
                    },
                    None => Ok(RemoveResult::NotFound),
                }
            }
        }
    }

    /// Removes the whole subtree under a nibble prefix. A prefix addressing an
    /// account exactly empties its storage sub-trie but keeps the account node.
    pub(crate) fn delete_subtree_at(
        &mut self,
        ctx: &OpCtx<'_>,
        pos: usize,
    ) -> Result<RemoveResult, TrieError> {
        ctx.touch(pos.min(ctx.hex.len()), false);
        if pos == ctx.hex.len() {
            let bare_account =
                matches!(self, Node::Account(acc) if acc.partial.as_slice().is_empty());
            return if bare_account {
                self.wipe_account_storage(ctx, pos);
                Ok(RemoveResult::Removed)
            } else {
                self.emit_subtree_touches(ctx, pos);
                Ok(RemoveResult::BecameEmpty)
            };
        }
        match self {
            Node::Hash(_) => Err(TrieError::Unresolved(ctx.hex[..pos].to_vec())),
            Node::Leaf(leaf) => {
                let m = common_len(&leaf.partial, ctx.hex, pos);
                if pos + m == ctx.hex.len() {
                    // The leaf's key extends the prefix: it lies inside the subtree
                    ctx.touch(pos, true);
                    Ok(RemoveResult::BecameEmpty)
                } else {
                    Ok(RemoveResult::NotFound)
                }
            }
            Node::Extension(ext) => {
                let m = common_len(&ext.prefix, ctx.hex, pos);
                if pos + m == ctx.hex.len() {
                    self.emit_subtree_touches(ctx, pos);
                    return Ok(RemoveResult::BecameEmpty);
                }
                if m != ext.prefix.as_slice().len() {
                    return Ok(RemoveResult::NotFound);
                }
                match ext.child.delete_subtree_at(ctx, pos + m)? {
                    RemoveResult::NotFound => Ok(RemoveResult::NotFound),
                    RemoveResult::BecameEmpty => {
                        ctx.touch(pos, true);
                        Ok(RemoveResult::BecameEmpty)
                    }
                    RemoveResult::Removed => {
                        ext.flags = NodeFlags::touched(ctx.block_nr);
                        self.merge_extension_child();
                        Ok(RemoveResult::Removed)
                    }
                }
            }
            Node::Branch(branch) => {
                let idx = ctx.hex[pos] as usize;
                let result = match &mut branch.children[idx] {
                    Some(child) => match child.delete_subtree_at(ctx, pos + 1)? {
                        RemoveResult::NotFound => return Ok(RemoveResult::NotFound),
                        RemoveResult::Removed => false,
                        RemoveResult::BecameEmpty => {
                            branch.children[idx] = None;
                            true
                        }
                    },
                    None => return Ok(RemoveResult::NotFound),
                };
                branch.flags = NodeFlags::touched(ctx.block_nr);
                if result {
                    self.collapse_branch(ctx, pos)
                } else {
                    Ok(RemoveResult::Removed)
                }
            }
            Node::Account(acc) => {
                let m = common_len(&acc.partial, ctx.hex, pos);
                let plen = acc.partial.as_slice().len();
                if pos + m == ctx.hex.len() {
                    if m == plen {
                        // Exactly the account: wipe storage, keep the account
                        self.wipe_account_storage(ctx, pos);
                        return Ok(RemoveResult::Removed);
                    }
                    // The prefix ends inside the partial: the account lies under it
                    self.emit_subtree_touches(ctx, pos);
                    return Ok(RemoveResult::BecameEmpty);
                }
                if m < plen {
                    return Ok(RemoveResult::NotFound);
                }
                match &mut acc.storage {
                    Some(storage) => match storage.delete_subtree_at(ctx, pos + m)? {
                        RemoveResult::NotFound => Ok(RemoveResult::NotFound),
                        RemoveResult::Removed => {
                            acc.flags = NodeFlags::touched(ctx.block_nr);
                            Ok(RemoveResult::Removed)
                        }
                        RemoveResult::BecameEmpty => {
                            acc.storage = None;
                            acc.flags = NodeFlags::touched(ctx.block_nr);
                            Ok(RemoveResult::Removed)
                        }
                    },
                    None => Ok(RemoveResult::NotFound),
                }
            }
        }
    }

    fn wipe_account_storage(&mut self, ctx: &OpCtx<'_>, pos: usize) {
        if let Node::Account(acc) = self {
            if let (Some(storage), Some(touch)) = (&acc.storage, ctx.touch) {
                let mut prefix = ctx.hex[..pos].to_vec();
                prefix.extend_from_slice(acc.partial.as_slice());
                storage.touch_all(&mut prefix, true, touch);
            }
            acc.storage = None;
            acc.flags = NodeFlags::touched(ctx.block_nr);
        }
    }

    fn emit_subtree_touches(&self, ctx: &OpCtx<'_>, pos: usize) {
        if let Some(touch) = ctx.touch {
            let mut prefix = ctx.hex[..pos].to_vec();
            self.touch_all(&mut prefix, true, touch);
        }
    }

    /// After removing a child or value from this branch, restores the canonical
    /// shape: a single remaining child is merged upward, a lone value becomes a
    /// leaf. Merging through an unmaterialised sibling is an error; resolution
    /// must have kept it.
    fn collapse_branch(&mut self, ctx: &OpCtx<'_>, pos: usize) -> Result<RemoveResult, TrieError> {
        let Node::Branch(branch) = &mut *self else {
            return Ok(RemoveResult::Removed);
        };
        match (branch.child_count(), branch.value.is_some()) {
            (0, false) => {
                ctx.touch(pos, true);
                return Ok(RemoveResult::BecameEmpty);
            }
            (0, true) => {
                let value = branch.value.take().unwrap_or_default();
                let partial = Nibbles::from_hex(vec![16]);
                *self = LeafNode::new(partial, value, ctx.block_nr).into();
                return Ok(RemoveResult::Removed);
            }
            (1, false) => {}
            _ => return Ok(RemoveResult::Removed),
        }
        let Some(idx) = branch.sole_child_index() else {
            return Ok(RemoveResult::Removed);
        };
        if matches!(branch.children[idx].as_deref(), Some(Node::Hash(_))) {
            // The merged form of the sibling cannot be derived from its hash
            let mut path = ctx.hex[..pos.min(ctx.hex.len())].to_vec();
            path.push(idx as u8);
            return Err(TrieError::Unresolved(path));
        }
        let Some(child) = branch.children[idx].take() else {
            return Ok(RemoveResult::Removed);
        };
        match *child {
            Node::Leaf(mut leaf) => {
                leaf.partial.prepend(idx as u8);
                leaf.last_touched = ctx.block_nr;
                *self = leaf.into();
            }
            Node::Extension(mut ext) => {
                ext.prefix.prepend(idx as u8);
                ext.flags = NodeFlags::touched(ctx.block_nr);
                *self = ext.into();
            }
            Node::Account(mut acc) => {
                acc.partial.prepend(idx as u8);
                acc.flags = NodeFlags::touched(ctx.block_nr);
                *self = Node::Account(acc);
            }
            node @ (Node::Branch(_) | Node::Hash(_)) => {
                let mut prefix = Nibbles::default();
                prefix.append(idx as u8);
                *self = ExtensionNode::new(prefix, node, ctx.block_nr).into();
            }
        }
        Ok(RemoveResult::Removed)
    }

    /// After its child collapsed, an extension may be able to merge with it:
    /// extension runs concatenate, leaves and accounts absorb the prefix.
    fn merge_extension_child(&mut self) {
        let Node::Extension(ext) = &mut *self else {
            return;
        };
        match ext.child.as_mut() {
            Node::Extension(inner) => {
                let mut prefix = std::mem::take(&mut ext.prefix);
                prefix.extend(&std::mem::take(&mut inner.prefix));
                let child =
                    std::mem::replace(&mut inner.child, Box::new(Node::Hash(H256::zero())));
                let last_touched = ext.flags.last_touched;
                *self = ExtensionNode {
                    prefix,
                    child,
                    flags: NodeFlags::touched(last_touched),
                }
                .into();
            }
            Node::Leaf(leaf) => {
                let partial = ext.prefix.concat(&leaf.partial);
                let value = std::mem::take(&mut leaf.value);
                *self = LeafNode::new(partial, value, ext.flags.last_touched).into();
            }
            Node::Account(acc) => {
                let mut merged = std::mem::replace(
                    acc.as_mut(),
                    AccountNode::new(Nibbles::default(), Account::default(), 0),
                );
                merged.partial = ext.prefix.concat(&merged.partial);
                merged.flags = NodeFlags::touched(ext.flags.last_touched);
                *self = merged.into();
            }
            Node::Branch(_) | Node::Hash(_) => {}
        }
    }

    /// The reference hash of this node, memoised on interior nodes.
    pub fn compute_hash(&mut self) -> NodeHash {
        match self {
            Node::Hash(hash) => NodeHash::Hashed(*hash),
            Node::Leaf(leaf) => NodeHash::from_encoded(&leaf.encode_raw()),
            Node::Extension(ext) => {
                if let Some(hash) = ext.flags.hash {
                    return hash;
                }
                let hash = NodeHash::from_encoded(&ext.encode_raw());
                ext.flags.hash = Some(hash);
                hash
            }
            Node::Branch(branch) => {
                if let Some(hash) = branch.flags.hash {
                    return hash;
                }
                let hash = NodeHash::from_encoded(&branch.encode_raw());
                branch.flags.hash = Some(hash);
                hash
            }
            Node::Account(acc) => {
                if let Some(hash) = acc.flags.hash {
                    return hash;
                }
                let hash = NodeHash::from_encoded(&acc.encode_raw());
                acc.flags.hash = Some(hash);
                hash
            }
        }
    }

    /// The raw RLP encoding of this node. Hash stubs have no encoding.
    pub fn encode_raw(&mut self) -> Option<Vec<u8>> {
        match self {
            Node::Hash(_) => None,
            Node::Leaf(leaf) => Some(leaf.encode_raw()),
            Node::Extension(ext) => Some(ext.encode_raw()),
            Node::Branch(branch) => Some(branch.encode_raw()),
            Node::Account(acc) => Some(acc.encode_raw()),
        }
    }

    /// Most recent touch recorded on this node. Hash stubs are not resident.
    pub fn last_touched(&self) -> u64 {
        match self {
            Node::Hash(_) => u64::MAX,
            Node::Leaf(leaf) => leaf.last_touched,
            Node::Extension(ext) => ext.flags.last_touched,
            Node::Branch(branch) => branch.flags.last_touched,
            Node::Account(acc) => acc.flags.last_touched,
        }
    }

    /// Reports every resident node of this subtree to the touch sink, keyed by
    /// its nibble path.
    pub fn touch_all(&self, prefix: &mut Vec<u8>, del: bool, touch: &TouchFn) {
        if matches!(self, Node::Hash(_)) {
            return;
        }
        touch(prefix, del);
        match self {
            Node::Branch(branch) => {
                for (idx, child) in branch.children.iter().enumerate() {
                    if let Some(child) = child {
                        prefix.push(idx as u8);
                        child.touch_all(prefix, del, touch);
                        prefix.pop();
                    }
                }
            }
            Node::Extension(ext) => {
                let depth = ext.prefix.as_slice().len();
                prefix.extend_from_slice(ext.prefix.as_slice());
                ext.child.touch_all(prefix, del, touch);
                prefix.truncate(prefix.len() - depth);
            }
            Node::Account(acc) => {
                if let Some(storage) = &acc.storage {
                    let depth = acc.partial.as_slice().len();
                    prefix.extend_from_slice(acc.partial.as_slice());
                    storage.touch_all(prefix, del, touch);
                    prefix.truncate(prefix.len() - depth);
                }
            }
            _ => {}
        }
    }

    /// Number of nodes in this subtree that the pruner could unload.
    pub fn count_prunable(&self) -> usize {
        match self {
            Node::Hash(_) => 0,
            Node::Leaf(_) => 1,
            Node::Extension(ext) => 1 + ext.child.count_prunable(),
            Node::Branch(branch) => {
                1 + branch
                    .children
                    .iter()
                    .flatten()
                    .map(|c| c.count_prunable())
                    .sum::<usize>()
            }
            Node::Account(acc) => {
                1 + acc
                    .storage
                    .as_ref()
                    .map(|s| s.count_prunable())
                    .unwrap_or(0)
            }
        }
    }
}

/// Builds the branch created when a key diverges from an existing node at
/// `m` shared nibbles, wrapping it in an extension when `m > 0`.
fn split_at(
    ctx: &OpCtx<'_>,
    pos: usize,
    m: usize,
    old_partial: &Nibbles,
    old_node: Node,
    value: ValueOrAccount,
) -> Result<Node, TrieError> {
    let mut branch = BranchNode::new(ctx.block_nr);
    match old_partial.at(m) {
        16 => match old_node {
            Node::Leaf(leaf) => branch.value = Some(leaf.value),
            _ => return Err(TrieError::InvalidKey),
        },
        old_idx => branch.children[old_idx] = Some(Box::new(old_node)),
    }
    match ctx.hex[pos + m] as usize {
        16 => match value {
            ValueOrAccount::Bytes(bytes) => branch.value = Some(bytes),
            ValueOrAccount::Account(_) => return Err(TrieError::InvalidKey),
        },
        new_idx => {
            branch.children[new_idx] = Some(Box::new(value_node(ctx, pos + m + 1, value)));
        }
    }
    Ok(if m == 0 {
        branch.into()
    } else {
        ExtensionNode::new(old_partial.slice(0, m), branch.into(), ctx.block_nr).into()
    })
}
