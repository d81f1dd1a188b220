use ethereum_types::H256;
use tracing::{debug, info};
use trieste_kv::{Bucket, Database};

use crate::account::Account;
use crate::error::TrieError;
use crate::hash_builder::{BuilderValue, HashBuilder};
use crate::nibbles::{hex_to_keybytes, keybytes_to_hex, Nibbles};
use crate::node::Node;
use crate::resolve_set::ResolveSet;
use crate::Trie;

/// How many top levels of a rebuilt trie stay materialised after a full
/// root re-resolution.
const REBUILD_TOP_LEVELS: usize = 5;

/// One subtree that must be materialised from the database.
///
/// For storage subtrees, `contract` is `hash(address) ‖ negated incarnation`,
/// pinning the database range to a single incarnation; the trie path of the
/// subtree is the address nibbles followed by `resolve_hex[..resolve_pos]`.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub contract: Option<Vec<u8>>,
    /// Nibbles of the touched key within its trie (no terminator).
    pub resolve_hex: Vec<u8>,
    /// How many of those nibbles lead to the unmaterialised node.
    pub resolve_pos: usize,
    /// Root hash the resolved subtree must carry.
    pub resolve_hash: H256,
    /// Capture the RLP of the resolved root for witness assembly.
    pub requires_rlp: bool,
    pub node_rlp: Option<Vec<u8>>,
    /// Materialise only the subtree's top node (deletion sibling support).
    pub top_only: bool,
    /// Nibbles of the full database key that are fixed for this range.
    ext_resolve_pos: usize,
}

impl ResolveRequest {
    pub fn new(
        contract: Option<Vec<u8>>,
        resolve_hex: Vec<u8>,
        resolve_pos: usize,
        resolve_hash: H256,
    ) -> Self {
        Self {
            contract,
            resolve_hex,
            resolve_pos,
            resolve_hash,
            requires_rlp: false,
            node_rlp: None,
            top_only: false,
            ext_resolve_pos: 0,
        }
    }

    /// The nibble path where the resolved subtree hooks into the trie.
    fn trie_prefix(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(64 + self.resolve_pos);
        if let Some(contract) = &self.contract {
            for byte in &contract[..32] {
                prefix.push(byte >> 4);
                prefix.push(byte & 0x0f);
            }
        }
        prefix.extend_from_slice(&self.resolve_hex[..self.resolve_pos]);
        prefix
    }
}

/// Batch resolver: one instance per side (accounts or storage) per block.
///
/// Requests are sorted and deduplicated into disjoint prefix ranges, loaded
/// with a single multi-range walk, rebuilt with one hash builder per range and
/// grafted into the target trie on range transitions.
pub struct TrieResolver {
    accounts: bool,
    top_levels: usize,
    block_nr: u64,
    historical: bool,
    requests: Vec<ResolveRequest>,
    /// Indices of the kept (non-absorbed) requests after preparation.
    req_indices: Vec<usize>,
    rss: Vec<ResolveSet>,
}

impl TrieResolver {
    pub fn new(top_levels: usize, accounts: bool, block_nr: u64) -> Self {
        Self {
            accounts,
            top_levels,
            block_nr,
            historical: false,
            requests: Vec::new(),
            req_indices: Vec::new(),
            rss: Vec::new(),
        }
    }

    /// Serve values as of the end of `block_nr` instead of the latest state.
    pub fn set_historical(&mut self, historical: bool) {
        self.historical = historical;
    }

    pub fn add_request(&mut self, request: ResolveRequest) {
        self.requests.push(request);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Sorts the requests, absorbs those contained in a preceding one and
    /// produces the `(start key, fixed bits)` pairs for the multi-range walk,
    /// seeding one resolve set per kept range.
    pub fn prepare_resolve_params(&mut self) -> (Vec<Vec<u8>>, Vec<u32>) {
        let mut start_keys = Vec::new();
        let mut fixed_bits = Vec::new();
        self.req_indices.clear();
        self.rss.clear();
        if self.requests.is_empty() {
            return (start_keys, fixed_bits);
        }
        self.requests.sort_by(|a, b| {
            a.contract
                .cmp(&b.contract)
                .then_with(|| {
                    let m = a.resolve_pos.min(b.resolve_pos);
                    a.resolve_hex[..m].cmp(&b.resolve_hex[..m])
                })
                .then_with(|| a.resolve_pos.cmp(&b.resolve_pos))
        });
        let mut kept: Option<usize> = None;
        for i in 0..self.requests.len() {
            let absorbed = kept.is_some_and(|k| {
                let prev = &self.requests[k];
                let req = &self.requests[i];
                prev.contract == req.contract
                    && req.resolve_hex.len() >= prev.resolve_pos
                    && req.resolve_hex[..prev.resolve_pos]
                        == prev.resolve_hex[..prev.resolve_pos]
            });
            if absorbed {
                let k = kept.unwrap_or_default();
                let prev_pos = self.requests[k].resolve_pos;
                let suffix = self.requests[i].resolve_hex[prev_pos..].to_vec();
                if let Some(rs) = self.rss.last_mut() {
                    rs.add_hex(&suffix);
                }
                continue;
            }
            let contract_len = self.requests[i].contract.as_deref().map_or(0, <[u8]>::len);
            let pos = self.requests[i].resolve_pos;
            self.requests[i].ext_resolve_pos = pos + 2 * contract_len;
            let mut key = self.requests[i].contract.clone().unwrap_or_default();
            key.extend_from_slice(&hex_to_keybytes(&self.requests[i].resolve_hex[..pos]));
            fixed_bits.push(4 * self.requests[i].ext_resolve_pos as u32);
            start_keys.push(key);

            let mut min_length = self.top_levels.saturating_sub(pos);
            if self.requests[i].top_only {
                min_length = min_length.max(1);
            }
            let mut rs = ResolveSet::new(min_length);
            if !self.requests[i].top_only {
                rs.add_hex(&self.requests[i].resolve_hex[pos..]);
            }
            self.rss.push(rs);
            self.req_indices.push(i);
            kept = Some(i);
        }
        (start_keys, fixed_bits)
    }

    /// Runs the multi-range walk and grafts every resolved subtree into `trie`.
    pub fn resolve_with_db(
        &mut self,
        db: &dyn Database,
        trie: &mut Trie,
    ) -> Result<(), TrieError> {
        let (start_keys, fixed_bits) = self.prepare_resolve_params();
        if start_keys.is_empty() {
            return Ok(());
        }
        debug!(
            accounts = self.accounts,
            historical = self.historical,
            ranges = start_keys.len(),
            requests = self.requests.len(),
            block_nr = self.block_nr,
            "resolving trie subtrees"
        );
        let (bucket, hist_bucket) = if self.accounts {
            (Bucket::Accounts, Bucket::AccountsHistory)
        } else {
            (Bucket::Storage, Bucket::StorageHistory)
        };

        let accounts = self.accounts;
        let block_nr = self.block_nr;
        let requests = &mut self.requests;
        let req_indices = &self.req_indices;
        let rss = &self.rss;

        let mut key_idx = 0usize;
        let mut builder = HashBuilder::new(block_nr);
        let mut fail: Option<TrieError> = None;

        {
            let trie = &mut *trie;
            let mut step = |idx: usize, k: &[u8], v: &[u8]| -> Result<bool, TrieError> {
                if idx != key_idx {
                    let finished = std::mem::replace(&mut builder, HashBuilder::new(block_nr));
                    flush_range(
                        &mut requests[req_indices[key_idx]],
                        &rss[key_idx],
                        finished,
                        &mut *trie,
                        block_nr,
                    )?;
                    key_idx = idx;
                }
                if v.is_empty() {
                    return Ok(true);
                }
                let request = &requests[req_indices[idx]];
                let hex = keybytes_to_hex(k);
                let suffix = Nibbles::from_hex(hex[request.ext_resolve_pos..].to_vec());
                let value = if accounts {
                    BuilderValue::Account(Account::decode_for_storage(v)?)
                } else {
                    BuilderValue::Bytes(v.to_vec())
                };
                builder
                    .add(&rss[idx], suffix, value)
                    .map_err(TrieError::from)?;
                Ok(true)
            };
            let mut walker = |idx: usize, k: &[u8], v: &[u8]| match step(idx, k, v) {
                Ok(keep_going) => Ok(keep_going),
                Err(err) => {
                    fail = Some(err);
                    Ok(false)
                }
            };
            if self.historical {
                db.multi_walk_as_of(
                    bucket,
                    hist_bucket,
                    &start_keys,
                    &fixed_bits,
                    block_nr + 1,
                    &mut walker,
                )?;
            } else {
                db.multi_walk(bucket, &start_keys, &fixed_bits, &mut walker)?;
            }
        }
        if let Some(err) = fail {
            return Err(err);
        }
        flush_range(
            &mut requests[req_indices[key_idx]],
            &rss[key_idx],
            builder,
            trie,
            block_nr,
        )
    }
}

/// Closes a range: verifies the rebuilt subtree against the request's expected
/// hash, captures its RLP when asked to, and grafts it over the trie stub.
fn flush_range(
    request: &mut ResolveRequest,
    rs: &ResolveSet,
    builder: HashBuilder,
    trie: &mut Trie,
    block_nr: u64,
) -> Result<(), TrieError> {
    if !builder.has_root() {
        return Ok(());
    }
    let Some(mut root) = builder.finish(rs)? else {
        return Ok(());
    };
    let hash = root.compute_hash().finalize();
    if hash != request.resolve_hash {
        return Err(TrieError::HashMismatch {
            expected: request.resolve_hash,
            got: hash,
        });
    }
    if request.requires_rlp {
        request.node_rlp = root.encode_raw();
    }
    trie.hook(&request.trie_prefix(), root, block_nr)
}

impl Trie {
    /// Re-resolves the top of the trie from the database and verifies it
    /// against the root hash. The retained depth follows the resolver's
    /// rebuild retention.
    pub fn rebuild(&mut self, db: &dyn Database, block_nr: u64) -> Result<(), TrieError> {
        let Some(Node::Hash(root)) = self.root_node() else {
            return Ok(());
        };
        let root = *root;
        let mut request = ResolveRequest::new(None, Vec::new(), 0, root);
        request.top_only = true;
        let mut resolver = TrieResolver::new(REBUILD_TOP_LEVELS, true, block_nr);
        resolver.add_request(request);
        resolver.resolve_with_db(db, self)?;
        info!(root = ?root, block_nr, "rebuilt top of account trie and verified");
        Ok(())
    }
}
