use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ethereum_types::{Address, H256};
use lru::LruCache;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use trieste_crypto::keccak::keccak_hash;
use trieste_kv::keys::{
    composite_storage_key, composite_trie_key, decode_incarnation, HASH_LENGTH,
    INCARNATION_LENGTH,
};
use trieste_kv::{Bucket, Database, KvError};
use trieste_trie::witness::witness_resolve_set;
use trieste_trie::{
    Account, BlockWitnessBuilder, ProofGenerator, Trie, TriePruning, TrieResolver, WitnessStats,
    EMPTY_CODE_HASH, EMPTY_TRIE_HASH,
};

use crate::buffer::Buffer;
use crate::error::StateError;
use crate::{StateReader, MAX_TRIE_CACHE_GEN};

const CODE_CACHE_SIZE: usize = 10_000;
const CODE_SIZE_CACHE_SIZE: usize = 100_000;

/// Everything a trie traversal may touch, behind one lock: the trie itself,
/// the pruning bookkeeper and the witness tracker.
pub(crate) struct TrieGuard {
    pub t: Trie,
    pub tp: Arc<Mutex<TriePruning>>,
    pub pg: ProofGenerator,
}

/// The per-block stack of sub-block buffers plus their running union.
#[derive(Default)]
pub(crate) struct BufferStack {
    pub buffers: Vec<Buffer>,
    pub aggregate: Option<Buffer>,
}

impl BufferStack {
    fn clear(&mut self) {
        self.buffers.clear();
        self.aggregate = None;
    }

    pub(crate) fn current_mut(&mut self) -> &mut Buffer {
        if self.buffers.is_empty() {
            self.buffers.push(Buffer::default());
        }
        self.buffers.last_mut().expect("buffer stack is non-empty")
    }
}

/// Read-through cache over the backing database, staging per-sub-block
/// mutations and committing them as per-boundary state roots.
///
/// A single writer (the block executor) drives mutations; concurrent readers
/// go through the same trie guard. Reader views over the same trie are created
/// with [`TrieDbState::with_new_buffer`].
pub struct TrieDbState {
    guard: Arc<Mutex<TrieGuard>>,
    db: Arc<dyn Database>,
    block_nr: AtomicU64,
    buffers: Mutex<BufferStack>,
    code_cache: Arc<Mutex<LruCache<H256, Vec<u8>>>>,
    code_size_cache: Arc<Mutex<LruCache<H256, usize>>>,
    historical: bool,
    no_history: bool,
    resolve_reads: bool,
    save_preimages: bool,
}

fn cache_size(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN)
}

impl TrieDbState {
    pub fn new(root: H256, db: Arc<dyn Database>, block_nr: u64) -> Self {
        let tp = Arc::new(Mutex::new(TriePruning::new(block_nr)));
        let mut t = Trie::new(root);
        let touch_tp = tp.clone();
        t.set_touch_func(Box::new(move |hex, del| {
            if let Ok(mut tp) = touch_tp.lock() {
                tp.touch(hex, del);
            }
        }));
        Self {
            guard: Arc::new(Mutex::new(TrieGuard {
                t,
                tp,
                pg: ProofGenerator::default(),
            })),
            db,
            block_nr: AtomicU64::new(block_nr),
            buffers: Mutex::new(BufferStack::default()),
            code_cache: Arc::new(Mutex::new(LruCache::new(cache_size(CODE_CACHE_SIZE)))),
            code_size_cache: Arc::new(Mutex::new(LruCache::new(cache_size(
                CODE_SIZE_CACHE_SIZE,
            )))),
            historical: false,
            no_history: false,
            resolve_reads: false,
            save_preimages: true,
        }
    }

    /// A reader view sharing this state's trie, caches and database but staging
    /// its own buffers.
    pub fn with_new_buffer(&self) -> TrieDbState {
        TrieDbState {
            guard: self.guard.clone(),
            db: self.db.clone(),
            block_nr: AtomicU64::new(self.block_nr()),
            buffers: Mutex::new(BufferStack::default()),
            code_cache: self.code_cache.clone(),
            code_size_cache: self.code_size_cache.clone(),
            historical: self.historical,
            no_history: self.no_history,
            resolve_reads: self.resolve_reads,
            save_preimages: self.save_preimages,
        }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn set_historical(&mut self, historical: bool) {
        self.historical = historical;
    }

    pub fn set_no_history(&mut self, no_history: bool) {
        self.no_history = no_history;
    }

    pub fn set_resolve_reads(&mut self, resolve_reads: bool) {
        self.resolve_reads = resolve_reads;
    }

    pub fn enable_preimages(&mut self, enable: bool) {
        self.save_preimages = enable;
    }

    pub(crate) fn is_resolve_reads(&self) -> bool {
        self.resolve_reads
    }

    pub(crate) fn is_no_history(&self) -> bool {
        self.no_history
    }

    fn guard(&self) -> Result<MutexGuard<'_, TrieGuard>, StateError> {
        self.guard.lock().map_err(|_| StateError::Lock)
    }

    pub(crate) fn bufs(&self) -> Result<MutexGuard<'_, BufferStack>, StateError> {
        self.buffers.lock().map_err(|_| StateError::Lock)
    }

    pub fn block_nr(&self) -> u64 {
        self.block_nr.load(Ordering::SeqCst)
    }

    pub fn set_block_nr(&self, block_nr: u64) -> Result<(), StateError> {
        self.block_nr.store(block_nr, Ordering::SeqCst);
        let guard = self.guard()?;
        guard
            .tp
            .lock()
            .map_err(|_| StateError::Lock)?
            .set_block_nr(block_nr);
        Ok(())
    }

    /// Freezes the current buffer into the aggregate and opens a fresh one.
    pub fn start_new_buffer(&self) -> Result<(), StateError> {
        let mut bufs = self.bufs()?;
        let BufferStack { buffers, aggregate } = &mut *bufs;
        if let Some(current) = buffers.last() {
            aggregate.get_or_insert_with(Buffer::default).merge(current);
        }
        buffers.push(Buffer::default());
        Ok(())
    }

    /// Root the trie currently commits to.
    pub fn last_root(&self) -> Result<H256, StateError> {
        Ok(self.guard()?.t.hash())
    }

    /// `resolve_state_trie` followed by `update_state_trie`.
    pub fn compute_trie_roots(&self) -> Result<Vec<H256>, StateError> {
        self.resolve_state_trie()?;
        self.update_state_trie()
    }

    /// Materialises every part of the trie the aggregated buffers will touch,
    /// with one batched multi-range walk per side.
    pub fn resolve_state_trie(&self) -> Result<(), StateError> {
        let block_nr = self.block_nr();
        let touches = {
            let mut bufs = self.bufs()?;
            let BufferStack { buffers, aggregate } = &mut *bufs;
            if let Some(current) = buffers.last() {
                aggregate.get_or_insert_with(Buffer::default).merge(current);
            }
            match aggregate.as_ref() {
                None => return Ok(()),
                Some(aggregate) => Touches::build(aggregate, self.resolve_reads),
            }
        };

        let mut guard = self.guard()?;
        let guard = &mut *guard;

        // Accounts first: storage requests need the incarnation recorded on the
        // materialised account node.
        let mut addr_hashes: BTreeSet<H256> = touches.accounts.iter().copied().collect();
        for key in &touches.storage {
            addr_hashes.insert(H256::from_slice(&key[..HASH_LENGTH]));
        }
        let mut resolver: Option<TrieResolver> = None;
        for addr_hash in &addr_hashes {
            if let Some(request) = guard.t.need_resolution(None, addr_hash.as_bytes()) {
                self.account_resolver(&mut resolver, block_nr).add_request(request);
            }
        }
        if let Some(mut resolver) = resolver.take() {
            resolver.resolve_with_db(self.db.as_ref(), &mut guard.t)?;
        }

        let mut resolver: Option<TrieResolver> = None;
        for key in &touches.storage {
            if let Some(request) = guard.t.need_resolution(Some(&key[..HASH_LENGTH]), key) {
                if request.contract.is_some() {
                    self.storage_resolver(&mut resolver, block_nr).add_request(request);
                }
            }
        }
        if let Some(mut resolver) = resolver.take() {
            resolver.resolve_with_db(self.db.as_ref(), &mut guard.t)?;
        }

        // Deletions may collapse a branch into its last sibling; an
        // unmaterialised sibling needs its top node loaded for the nibble merge.
        let mut account_resolver: Option<TrieResolver> = None;
        let mut storage_resolver: Option<TrieResolver> = None;
        for addr_hash in &touches.account_tombstones {
            if let Some(request) = guard.t.delete_resolution(None, addr_hash.as_bytes()) {
                self.account_resolver(&mut account_resolver, block_nr)
                    .add_request(request);
            }
        }
        for key in &touches.storage_tombstones {
            if let Some(request) = guard.t.delete_resolution(Some(&key[..HASH_LENGTH]), key) {
                if request.contract.is_some() {
                    self.storage_resolver(&mut storage_resolver, block_nr)
                        .add_request(request);
                }
            }
        }
        if let Some(mut resolver) = account_resolver.take() {
            resolver.resolve_with_db(self.db.as_ref(), &mut guard.t)?;
        }
        if let Some(mut resolver) = storage_resolver.take() {
            resolver.resolve_with_db(self.db.as_ref(), &mut guard.t)?;
        }

        if self.resolve_reads {
            for addr_hash in &touches.accounts {
                guard.pg.add_touch(addr_hash.as_bytes());
            }
            for key in &touches.storage {
                guard.pg.add_storage_touch(key);
            }
        }
        Ok(())
    }

    fn account_resolver<'r>(
        &self,
        slot: &'r mut Option<TrieResolver>,
        block_nr: u64,
    ) -> &'r mut TrieResolver {
        slot.get_or_insert_with(|| {
            let mut resolver = TrieResolver::new(0, true, block_nr);
            resolver.set_historical(self.historical);
            resolver
        })
    }

    fn storage_resolver<'r>(
        &self,
        slot: &'r mut Option<TrieResolver>,
        block_nr: u64,
    ) -> &'r mut TrieResolver {
        slot.get_or_insert_with(|| {
            let mut resolver = TrieResolver::new(0, false, block_nr);
            resolver.set_historical(self.historical);
            resolver
        })
    }

    /// Replays the buffers in order, producing one root per sub-block boundary.
    /// Assumes the trie is fully resolved.
    pub fn update_state_trie(&self) -> Result<Vec<H256>, StateError> {
        let mut guard = self.guard()?;
        let mut bufs = self.bufs()?;
        let roots = self.update_trie_roots(&mut guard, &mut bufs, true)?;
        bufs.clear();
        Ok(roots)
    }

    /// Replays every buffer against the trie. With `forward = false` (reorg
    /// rewind), updates only apply to keys still present and recomputed storage
    /// roots are verified against the recorded pre-images instead of written.
    pub(crate) fn update_trie_roots(
        &self,
        guard: &mut TrieGuard,
        bufs: &mut BufferStack,
        forward: bool,
    ) -> Result<Vec<H256>, StateError> {
        let block_nr = self.block_nr();
        let BufferStack { buffers, aggregate } = &mut *bufs;
        let mut already_created: FxHashSet<H256> = FxHashSet::default();
        let mut roots = Vec::with_capacity(buffers.len());
        for buffer in buffers.iter_mut() {
            // Contracts re-created at these addresses: wipe whatever storage the
            // trie still carries and move to the next incarnation. Storage
            // writes staged before the re-creation survive in later buffers.
            let mut created: Vec<H256> = buffer.created.iter().copied().collect();
            created.sort();
            for addr_hash in created {
                if !already_created.insert(addr_hash) {
                    continue;
                }
                let incarnation = self.next_incarnation(addr_hash)?;
                for pending in [
                    buffer.account_updates.get_mut(&addr_hash),
                    aggregate
                        .as_mut()
                        .and_then(|agg| agg.account_updates.get_mut(&addr_hash)),
                ]
                .into_iter()
                .flatten()
                {
                    if let Some(account) = pending {
                        account.incarnation = incarnation;
                        account.root = *EMPTY_TRIE_HASH;
                    }
                }
                guard.t.delete_subtree(addr_hash.as_bytes(), block_nr)?;
            }

            let mut account_updates: Vec<(H256, Option<Account>)> = buffer
                .account_updates
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            account_updates.sort_by_key(|(k, _)| *k);
            for (addr_hash, account) in account_updates {
                match account {
                    Some(account) => {
                        guard
                            .t
                            .update_account(addr_hash.as_bytes(), account, block_nr)?
                    }
                    None => guard.t.delete(addr_hash.as_bytes(), block_nr)?,
                }
            }

            let mut storage_addrs: Vec<H256> = buffer.storage_updates.keys().copied().collect();
            storage_addrs.sort();
            for addr_hash in storage_addrs {
                let mut slots: Vec<(H256, Option<Vec<u8>>)> = buffer.storage_updates
                    [&addr_hash]
                    .iter()
                    .map(|(k, v)| (*k, v.clone()))
                    .collect();
                slots.sort_by_key(|(k, _)| *k);
                for (key_hash, value) in slots {
                    let composite = composite_trie_key(&addr_hash, &key_hash);
                    match value.filter(|v| !v.is_empty()) {
                        Some(value) => {
                            if forward
                                || matches!(guard.t.get(&composite), Some(Some(_)))
                            {
                                guard.t.update(&composite, value, block_nr)?;
                            }
                        }
                        None => {
                            if forward
                                || matches!(guard.t.get(&composite), Some(Some(_)))
                            {
                                guard.t.delete(&composite, block_nr)?;
                            }
                        }
                    }
                }
                let storage_root = guard
                    .t
                    .deep_hash(addr_hash.as_bytes())
                    .unwrap_or(*EMPTY_TRIE_HASH);
                for pending in [
                    buffer.account_updates.get_mut(&addr_hash),
                    aggregate
                        .as_mut()
                        .and_then(|agg| agg.account_updates.get_mut(&addr_hash)),
                ]
                .into_iter()
                .flatten()
                {
                    if let Some(account) = pending {
                        if forward {
                            account.root = storage_root;
                        } else if account.root != storage_root {
                            return Err(StateError::StorageRootMismatch {
                                address_hash: addr_hash,
                                expected: account.root,
                                got: storage_root,
                            });
                        }
                    }
                }
                if forward {
                    // Keep the resident account record in sync with the root it
                    // now commits to, so read-backs see the committed state
                    let refreshed = buffer
                        .account_updates
                        .get(&addr_hash)
                        .cloned()
                        .flatten()
                        .or_else(|| {
                            aggregate
                                .as_ref()
                                .and_then(|agg| agg.account_updates.get(&addr_hash).cloned())
                                .flatten()
                        });
                    if let Some(account) = refreshed {
                        guard
                            .t
                            .update_account(addr_hash.as_bytes(), account, block_nr)?;
                    }
                }
            }

            // Self-destructed contracts, unless re-created in the same block
            let mut deleted: Vec<H256> = buffer.deleted.iter().copied().collect();
            deleted.sort();
            for addr_hash in deleted {
                if buffer.created.contains(&addr_hash) {
                    continue;
                }
                for pending in [
                    buffer.account_updates.get_mut(&addr_hash),
                    aggregate
                        .as_mut()
                        .and_then(|agg| agg.account_updates.get_mut(&addr_hash)),
                ]
                .into_iter()
                .flatten()
                {
                    if let Some(account) = pending {
                        account.root = *EMPTY_TRIE_HASH;
                    }
                }
                guard.t.delete_subtree(addr_hash.as_bytes(), block_nr)?;
            }

            roots.push(guard.t.hash());
        }
        Ok(roots)
    }

    /// Rewinds the world state to the end of `block_nr` from the history
    /// buckets, replaying the pre-images through the trie and dropping the
    /// undone timestamps.
    pub fn unwind_to(&self, block_nr: u64) -> Result<(), StateError> {
        let current = self.block_nr();
        info!(from = current, to = block_nr, "unwinding state");
        self.start_new_buffer()?;
        {
            let mut bufs = self.bufs()?;
            let buffer = bufs.current_mut();
            let db = self.db.as_ref();
            db.rewind_data(current, block_nr, &mut |bucket, key, value| {
                match bucket {
                    Bucket::AccountsHistory => {
                        let addr_hash = H256::from_slice(&key[..HASH_LENGTH]);
                        if !value.is_empty() {
                            let account = Account::decode_for_storage(value)
                                .map_err(|err| KvError::Custom(err.to_string()))?;
                            buffer.account_updates.insert(addr_hash, Some(account));
                            db.put(Bucket::Accounts, &key[..HASH_LENGTH], value)?;
                        } else {
                            buffer.account_updates.insert(addr_hash, None);
                            db.delete(Bucket::Accounts, &key[..HASH_LENGTH])?;
                        }
                    }
                    Bucket::StorageHistory => {
                        let addr_hash = H256::from_slice(&key[..HASH_LENGTH]);
                        let key_hash = H256::from_slice(
                            &key[HASH_LENGTH + INCARNATION_LENGTH
                                ..HASH_LENGTH + INCARNATION_LENGTH + HASH_LENGTH],
                        );
                        let slots = buffer.storage_updates.entry(addr_hash).or_default();
                        if !value.is_empty() {
                            slots.insert(key_hash, Some(value.to_vec()));
                            db.put(Bucket::Storage, key, value)?;
                        } else {
                            slots.insert(key_hash, None);
                            db.delete(Bucket::Storage, key)?;
                        }
                    }
                    _ => {}
                }
                Ok(())
            })?;
        }
        self.resolve_state_trie()?;
        {
            let mut guard = self.guard()?;
            let mut bufs = self.bufs()?;
            self.update_trie_roots(&mut guard, &mut bufs, false)?;
            bufs.clear();
        }
        for undone in ((block_nr + 1)..=current).rev() {
            self.db.delete_timestamp(undone)?;
        }
        self.set_block_nr(block_nr)?;
        Ok(())
    }

    pub(crate) fn read_account_data_by_hash(
        &self,
        addr_hash: H256,
    ) -> Result<Option<Account>, StateError> {
        if let Some(account) = self.guard()?.t.get_account(addr_hash.as_bytes()) {
            return Ok(account);
        }
        let encoded = if self.historical {
            self.db.get_as_of(
                Bucket::Accounts,
                Bucket::AccountsHistory,
                addr_hash.as_bytes(),
                self.block_nr() + 1,
            )?
        } else {
            self.db.get(Bucket::Accounts, addr_hash.as_bytes())?
        };
        match encoded {
            None => Ok(None),
            Some(encoded) if encoded.is_empty() => Ok(None),
            Some(encoded) => Ok(Some(Account::decode_for_storage(&encoded)?)),
        }
    }

    /// Determines the next incarnation for an address: one past the highest
    /// incarnation that ever stored anything there.
    pub fn next_incarnation(&self, addr_hash: H256) -> Result<u64, StateError> {
        let mut start_key = vec![0u8; HASH_LENGTH + INCARNATION_LENGTH + HASH_LENGTH];
        start_key[..HASH_LENGTH].copy_from_slice(addr_hash.as_bytes());
        let fixed_bits = 8 * HASH_LENGTH as u32;
        let mut found: Option<u64> = None;
        let mut walker = |key: &[u8], _value: &[u8]| -> Result<bool, KvError> {
            if key.len() >= HASH_LENGTH + INCARNATION_LENGTH {
                found = Some(decode_incarnation(&key[HASH_LENGTH..]));
            }
            Ok(false)
        };
        if self.historical {
            self.db.walk_as_of(
                Bucket::Storage,
                Bucket::StorageHistory,
                &start_key,
                fixed_bits,
                self.block_nr(),
                &mut walker,
            )?;
        } else {
            self.db
                .walk(Bucket::Storage, &start_key, fixed_bits, &mut walker)?;
        }
        Ok(found.map(|incarnation| incarnation + 1).unwrap_or(0))
    }

    /// Evicts trie subtrees that fell out of the cache-generation window.
    pub fn prune_tries(&self) -> Result<(), StateError> {
        let mut guard = self.guard()?;
        let guard = &mut *guard;
        let tp = guard.tp.clone();
        let mut tp = tp.lock().map_err(|_| StateError::Lock)?;
        let unloaded = tp.prune_to(&mut guard.t, MAX_TRIE_CACHE_GEN);
        info!(
            unloaded,
            tracked = tp.node_count(),
            resident = guard.t.count_prunable_nodes(),
            "pruned state trie"
        );
        Ok(())
    }

    pub fn trie_pruning_debug_dump(&self) -> Result<String, StateError> {
        let guard = self.guard()?;
        let tp = guard.tp.lock().map_err(|_| StateError::Lock)?;
        Ok(tp.debug_dump())
    }

    /// Re-resolves and verifies the top of the account trie from the database.
    pub fn rebuild(&self) -> Result<(), StateError> {
        let block_nr = self.block_nr();
        let mut guard = self.guard()?;
        guard.t.rebuild(self.db.as_ref(), block_nr)?;
        Ok(())
    }

    /// Serialises the witness for the block just processed: the touched
    /// sub-trie plus all code it read. Read recording must have been enabled.
    pub fn extract_witness(
        &self,
        trace: bool,
        binary: bool,
    ) -> Result<(Vec<u8>, WitnessStats), StateError> {
        if binary {
            return Err(StateError::BinaryWitnessUnsupported);
        }
        let mut guard = self.guard()?;
        let guard = &mut *guard;
        let (account_touches, storage_touches) = guard.pg.extract_touches();
        let rs = witness_resolve_set(&account_touches, &storage_touches);
        let code_map = guard.pg.extract_code_map();
        let mut builder = BlockWitnessBuilder::new(trace);
        builder.make_block_witness(&mut guard.t, &rs, code_map)?;
        let mut out = Vec::new();
        let mut stats = builder.write_to(&mut out);
        stats.block_nr = self.block_nr();
        debug!(size = stats.witness_size, "extracted block witness");
        Ok((out, stats))
    }

    /// Drains the touched keys recorded for the witness.
    pub fn extract_touches(&self) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), StateError> {
        Ok(self.guard()?.pg.extract_touches())
    }

    pub(crate) fn with_pg<R>(
        &self,
        f: impl FnOnce(&mut ProofGenerator) -> R,
    ) -> Result<R, StateError> {
        Ok(f(&mut self.guard()?.pg))
    }

    fn save_preimage(&self, save: bool, hash: &H256, preimage: &[u8]) -> Result<(), StateError> {
        if !save || !self.save_preimages {
            return Ok(());
        }
        // Skip rewriting a preimage that is already present
        if self.db.get(Bucket::Preimages, hash.as_bytes())?.is_some() {
            return Ok(());
        }
        self.db
            .put(Bucket::Preimages, hash.as_bytes(), preimage)?;
        Ok(())
    }

    pub fn hash_address(&self, address: Address, save: bool) -> Result<H256, StateError> {
        let hash = H256(keccak_hash(address.as_bytes()));
        self.save_preimage(save, &hash, address.as_bytes())?;
        Ok(hash)
    }

    pub fn hash_key(&self, key: &H256, save: bool) -> Result<H256, StateError> {
        let hash = H256(keccak_hash(key.as_bytes()));
        self.save_preimage(save, &hash, key.as_bytes())?;
        Ok(hash)
    }

    /// Looks up the preimage of a hashed key.
    pub fn get_key(&self, hashed: &[u8]) -> Option<Vec<u8>> {
        self.db.get(Bucket::Preimages, hashed).ok().flatten()
    }

    pub fn trie_state_writer(&self) -> crate::writers::TrieStateWriter<'_> {
        crate::writers::TrieStateWriter::new(self)
    }

    pub fn db_state_writer(&self) -> crate::writers::DbStateWriter<'_> {
        crate::writers::DbStateWriter::new(self)
    }

    pub fn print_trie(&self, w: &mut dyn std::io::Write) -> Result<(), StateError> {
        self.guard()?.t.print(w).map_err(|_| StateError::Lock)?;
        Ok(())
    }
}

impl StateReader for TrieDbState {
    fn read_account_data(&self, address: Address) -> Result<Option<Account>, StateError> {
        let addr_hash = self.hash_address(address, false)?;
        if self.resolve_reads {
            let mut bufs = self.bufs()?;
            let current = bufs.current_mut();
            if !current.account_updates.contains_key(&addr_hash) {
                current.account_reads.insert(addr_hash);
            }
        }
        self.read_account_data_by_hash(addr_hash)
    }

    fn read_account_storage(
        &self,
        address: Address,
        incarnation: u64,
        key: &H256,
    ) -> Result<Option<Vec<u8>>, StateError> {
        let addr_hash = self.hash_address(address, false)?;
        {
            let mut bufs = self.bufs()?;
            let deleted_in_current = bufs.current_mut().deleted.contains(&addr_hash);
            let deleted_in_aggregate = bufs
                .aggregate
                .as_ref()
                .is_some_and(|agg| agg.deleted.contains(&addr_hash));
            if deleted_in_current || deleted_in_aggregate {
                return Ok(None);
            }
        }
        let seckey = self.hash_key(key, false)?;
        if self.resolve_reads {
            let mut bufs = self.bufs()?;
            let current = bufs.current_mut();
            let already_written = current
                .storage_updates
                .get(&addr_hash)
                .is_some_and(|slots| slots.contains_key(&seckey));
            if !already_written {
                current
                    .storage_reads
                    .entry(addr_hash)
                    .or_default()
                    .insert(seckey);
            }
        }
        let composite = composite_trie_key(&addr_hash, &seckey);
        if let Some(value) = self.guard()?.t.get(&composite) {
            return Ok(value.filter(|v| !v.is_empty()));
        }
        let db_key = composite_storage_key(&addr_hash, incarnation, &seckey);
        let value = if self.historical {
            self.db.get_as_of(
                Bucket::Storage,
                Bucket::StorageHistory,
                &db_key,
                self.block_nr(),
            )?
        } else {
            self.db.get(Bucket::Storage, &db_key)?
        };
        Ok(value.filter(|v| !v.is_empty()))
    }

    fn read_account_code(
        &self,
        address: Address,
        code_hash: H256,
    ) -> Result<Option<Vec<u8>>, StateError> {
        if code_hash == *EMPTY_CODE_HASH {
            return Ok(None);
        }
        let cached = self
            .code_cache
            .lock()
            .map_err(|_| StateError::Lock)?
            .get(&code_hash)
            .cloned();
        let code = match cached {
            Some(code) => Some(code),
            None => {
                let code = self.db.get(Bucket::Code, code_hash.as_bytes())?;
                if let Some(code) = &code {
                    self.code_size_cache
                        .lock()
                        .map_err(|_| StateError::Lock)?
                        .put(code_hash, code.len());
                    self.code_cache
                        .lock()
                        .map_err(|_| StateError::Lock)?
                        .put(code_hash, code.clone());
                }
                code
            }
        };
        if self.resolve_reads {
            let addr_hash = self.hash_address(address, false)?;
            {
                let mut bufs = self.bufs()?;
                let current = bufs.current_mut();
                if !current.account_updates.contains_key(&addr_hash) {
                    current.account_reads.insert(addr_hash);
                }
            }
            if let Some(code) = &code {
                self.with_pg(|pg| pg.read_code(code_hash, code))?;
            }
        }
        Ok(code)
    }

    fn read_account_code_size(
        &self,
        address: Address,
        code_hash: H256,
    ) -> Result<usize, StateError> {
        let cached = self
            .code_size_cache
            .lock()
            .map_err(|_| StateError::Lock)?
            .get(&code_hash)
            .copied();
        match cached {
            Some(size) if !self.resolve_reads => Ok(size),
            _ => Ok(self
                .read_account_code(address, code_hash)?
                .map(|code| code.len())
                .unwrap_or(0)),
        }
    }
}

/// The key sets a resolve run needs, extracted from the aggregate buffer.
struct Touches {
    accounts: Vec<H256>,
    storage: Vec<Vec<u8>>,
    account_tombstones: Vec<H256>,
    storage_tombstones: Vec<Vec<u8>>,
}

impl Touches {
    fn build(aggregate: &Buffer, with_reads: bool) -> Touches {
        let mut accounts: BTreeSet<H256> = aggregate.account_updates.keys().copied().collect();
        if with_reads {
            accounts.extend(aggregate.account_reads.iter().copied());
        }
        accounts.extend(aggregate.deleted.iter().copied());
        accounts.extend(aggregate.created.iter().copied());

        let mut storage: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut storage_tombstones: Vec<Vec<u8>> = Vec::new();
        for (addr_hash, slots) in &aggregate.storage_updates {
            for (key_hash, value) in slots {
                let composite = composite_trie_key(addr_hash, key_hash).to_vec();
                if value.as_ref().map_or(true, |v| v.is_empty()) {
                    storage_tombstones.push(composite.clone());
                }
                storage.insert(composite);
            }
        }
        if with_reads {
            for (addr_hash, slots) in &aggregate.storage_reads {
                let written = aggregate.storage_updates.get(addr_hash);
                for key_hash in slots {
                    let repeated =
                        written.is_some_and(|slots| slots.contains_key(key_hash));
                    if !repeated {
                        storage.insert(composite_trie_key(addr_hash, key_hash).to_vec());
                    }
                }
            }
        }

        let mut account_tombstones: Vec<H256> = aggregate
            .account_updates
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        account_tombstones.extend(aggregate.deleted.iter().copied());
        account_tombstones.sort();
        account_tombstones.dedup();
        storage_tombstones.sort();
        storage_tombstones.dedup();

        Touches {
            accounts: accounts.into_iter().collect(),
            storage: storage.into_iter().collect(),
            account_tombstones,
            storage_tombstones,
        }
    }
}
