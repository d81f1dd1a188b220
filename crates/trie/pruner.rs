use std::collections::BTreeMap;
use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::Trie;

/// Recency bookkeeping for resident trie nodes.
///
/// The trie's touch callback feeds node paths into per-block generation
/// buckets; [`TriePruning::prune_to`] collapses every subtree whose generation
/// fell out of the retention window back into its hash. Since a traversal
/// touches a node's whole ancestor chain, a stale node implies an equally
/// stale subtree below it.
pub struct TriePruning {
    block_nr: u64,
    generations: BTreeMap<u64, FxHashSet<Vec<u8>>>,
    last_gen: FxHashMap<Vec<u8>, u64>,
}

impl TriePruning {
    pub fn new(block_nr: u64) -> Self {
        Self {
            block_nr,
            generations: BTreeMap::new(),
            last_gen: FxHashMap::default(),
        }
    }

    pub fn block_nr(&self) -> u64 {
        self.block_nr
    }

    pub fn set_block_nr(&mut self, block_nr: u64) {
        self.block_nr = block_nr;
    }

    /// Records a traversal entering (`del = false`) or dropping (`del = true`)
    /// the node at the given nibble path.
    pub fn touch(&mut self, hex: &[u8], del: bool) {
        if del {
            if let Some(generation) = self.last_gen.remove(hex) {
                if let Some(bucket) = self.generations.get_mut(&generation) {
                    bucket.remove(hex);
                }
            }
            return;
        }
        match self.last_gen.insert(hex.to_vec(), self.block_nr) {
            Some(previous) if previous == self.block_nr => {}
            Some(previous) => {
                if let Some(bucket) = self.generations.get_mut(&previous) {
                    bucket.remove(hex);
                }
                self.generations
                    .entry(self.block_nr)
                    .or_default()
                    .insert(hex.to_vec());
            }
            None => {
                self.generations
                    .entry(self.block_nr)
                    .or_default()
                    .insert(hex.to_vec());
            }
        }
    }

    /// Unloads every subtree not touched within the last `max_gen` blocks.
    /// Returns the number of nodes dropped from memory; the trie's root hash is
    /// unchanged.
    pub fn prune_to(&mut self, trie: &mut Trie, max_gen: u64) -> usize {
        let threshold = self.block_nr.saturating_sub(max_gen);
        let stale: Vec<u64> = self
            .generations
            .range(..threshold)
            .map(|(generation, _)| *generation)
            .collect();
        let mut prefixes: Vec<Vec<u8>> = Vec::new();
        for generation in &stale {
            if let Some(bucket) = self.generations.remove(generation) {
                prefixes.extend(bucket);
            }
        }
        // Shallow prefixes first: unloading a parent covers its children
        prefixes.sort_by_key(|prefix| prefix.len());
        let mut unloaded = 0;
        for prefix in prefixes {
            unloaded += trie.unload(&prefix, threshold);
            self.last_gen.remove(&prefix);
        }
        if unloaded > 0 {
            debug!(threshold, unloaded, "pruned cold trie nodes");
        }
        unloaded
    }

    /// Number of node paths currently tracked.
    pub fn node_count(&self) -> usize {
        self.last_gen.len()
    }

    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        for (generation, bucket) in &self.generations {
            let _ = writeln!(out, "generation {}: {} nodes", generation, bucket.len());
        }
        out
    }
}
