use thiserror::Error;

use crate::account::Account;
use crate::nibbles::Nibbles;
use crate::node::{AccountNode, BranchNode, ExtensionNode, LeafNode, Node};
use crate::resolve_set::ResolveSet;

/// These errors should never happen on a strictly increasing key stream; they
/// surface misordered or duplicate input.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("key stream not strictly increasing at {0:02x?}")]
    OutOfOrder(Vec<u8>),
    #[error("group stack exhausted at {0:02x?}")]
    StackEmpty(Vec<u8>),
}

/// A value fed to the builder: raw slot bytes or a decoded account.
#[derive(Debug, Clone)]
pub enum BuilderValue {
    Bytes(Vec<u8>),
    Account(Account),
}

/// An open branch group: the parent branch under construction for every entry
/// sharing `path` as a prefix.
#[derive(Debug, Default)]
struct StackElement {
    path: Nibbles,
    node: BranchNode,
}

/// The entry or closed group currently waiting for its successor.
#[derive(Debug)]
enum CenterNode {
    Branch(BranchNode),
    Value(BuilderValue),
}

#[derive(Debug)]
struct CenterSide {
    path: Nibbles,
    node: CenterNode,
}

/// Streaming trie construction over a monotonically increasing `(key, value)`
/// sequence, producing an in-memory subtree whose root hash equals the Merkle
/// root of the whole set.
///
/// Groups deeper than the common prefix of the current and next key are closed
/// as the stream advances; a closing subtree is collapsed into a `Node::Hash`
/// stub when the resolve set reports that nothing below its parent needs to
/// stay materialised. One builder serves exactly one key range.
pub struct HashBuilder {
    block_nr: u64,
    stack: Vec<StackElement>,
    parent: StackElement,
    current: Option<CenterSide>,
    empty: bool,
}

fn is_child(path: &Nibbles, parent: &StackElement) -> bool {
    path.count_prefix(&parent.path) == parent.path.as_slice().len()
}

impl HashBuilder {
    pub fn new(block_nr: u64) -> Self {
        Self {
            block_nr,
            stack: Vec::with_capacity(64),
            parent: StackElement::default(),
            current: None,
            empty: true,
        }
    }

    pub fn has_root(&self) -> bool {
        !self.empty
    }

    /// Feeds the next entry. `key` must be leaf-flagged and strictly greater
    /// than every key fed before.
    pub fn add(
        &mut self,
        rs: &ResolveSet,
        key: Nibbles,
        value: BuilderValue,
    ) -> Result<(), BuilderError> {
        self.empty = false;
        let Some(current) = self.current.take() else {
            self.current = Some(CenterSide {
                path: key,
                node: CenterNode::Value(value),
            });
            return Ok(());
        };
        if key.as_slice() <= current.path.as_slice() {
            return Err(BuilderError::OutOfOrder(key.as_slice().to_vec()));
        }
        let mut current = current;
        while !is_child(&key, &self.parent) {
            Self::attach(rs, self.block_nr, &mut self.parent, current)?;
            let closed = CenterSide {
                path: std::mem::take(&mut self.parent.path),
                node: CenterNode::Branch(std::mem::take(&mut self.parent.node)),
            };
            self.parent = self
                .stack
                .pop()
                .ok_or_else(|| BuilderError::StackEmpty(closed.path.as_slice().to_vec()))?;
            current = closed;
        }
        if current.path.count_prefix(&self.parent.path) == current.path.count_prefix(&key) {
            Self::attach(rs, self.block_nr, &mut self.parent, current)?;
        } else {
            // The two keys share more than the open group: branch off between them
            let mut fork = StackElement {
                path: current.path.slice(0, current.path.count_prefix(&key)),
                node: BranchNode::new(self.block_nr),
            };
            Self::attach(rs, self.block_nr, &mut fork, current)?;
            self.stack.push(std::mem::replace(&mut self.parent, fork));
        }
        self.current = Some(CenterSide {
            path: key,
            node: CenterNode::Value(value),
        });
        Ok(())
    }

    /// Closes every open group and returns the root of the built subtree, or
    /// `None` for an empty stream.
    pub fn finish(mut self, rs: &ResolveSet) -> Result<Option<Node>, BuilderError> {
        let Some(mut current) = self.current.take() else {
            return Ok(None);
        };
        Self::attach(rs, self.block_nr, &mut self.parent, current)?;
        while let Some(mut outer) = self.stack.pop() {
            current = CenterSide {
                path: std::mem::take(&mut self.parent.path),
                node: CenterNode::Branch(std::mem::take(&mut self.parent.node)),
            };
            Self::attach(rs, self.block_nr, &mut outer, current)?;
            self.parent = outer;
        }
        Ok(Some(Self::finalize_root(self.parent.node, self.block_nr)))
    }

    /// Adds the closed `current` subtree into its parent group, wrapping it in
    /// an extension when extra nibbles separate them and collapsing it to its
    /// hash when the resolve set allows.
    fn attach(
        rs: &ResolveSet,
        block_nr: u64,
        parent: &mut StackElement,
        current: CenterSide,
    ) -> Result<(), BuilderError> {
        let parent_len = parent.path.as_slice().len();
        if current.path.as_slice().len() <= parent_len {
            return Err(BuilderError::OutOfOrder(current.path.as_slice().to_vec()));
        }
        let index = current.path.at(parent_len);
        let mut node: Node = match current.node {
            CenterNode::Value(BuilderValue::Bytes(bytes)) => {
                LeafNode::new(current.path.offset(parent_len + 1), bytes, block_nr).into()
            }
            CenterNode::Value(BuilderValue::Account(account)) => {
                AccountNode::new(current.path.offset(parent_len + 1), account, block_nr).into()
            }
            CenterNode::Branch(branch) => {
                let extra = current.path.slice(parent_len + 1, current.path.as_slice().len());
                if extra.is_empty() {
                    branch.into()
                } else {
                    ExtensionNode::new(extra, branch.into(), block_nr).into()
                }
            }
        };
        // Subtrees off the retained paths shrink to their hash; the top node of
        // a sibling of a retained path stays, so branch collapses after
        // deletions can merge nibbles without another resolution.
        if !parent.path.is_empty() && rs.hash_only(parent.path.as_slice()) {
            let hash = node.compute_hash();
            if !hash.is_inline() {
                node = Node::Hash(hash.finalize());
            }
        }
        parent.node.children[index] = Some(Box::new(node));
        Ok(())
    }

    /// The root group closes into a branch, unless a single entry is left, in
    /// which case its child absorbs the branch nibble.
    fn finalize_root(mut branch: BranchNode, block_nr: u64) -> Node {
        if branch.value.is_some() || branch.child_count() != 1 {
            return branch.into();
        }
        let Some(idx) = branch.sole_child_index() else {
            return branch.into();
        };
        let Some(child) = branch.children[idx].take() else {
            return branch.into();
        };
        match *child {
            Node::Leaf(mut leaf) => {
                leaf.partial.prepend(idx as u8);
                leaf.into()
            }
            Node::Account(mut acc) => {
                acc.partial.prepend(idx as u8);
                Node::Account(acc)
            }
            Node::Extension(mut ext) => {
                ext.prefix.prepend(idx as u8);
                ext.into()
            }
            node @ (Node::Branch(_) | Node::Hash(_)) => {
                let mut prefix = Nibbles::default();
                prefix.append(idx as u8);
                ExtensionNode::new(prefix, node, block_nr).into()
            }
        }
    }
}
