use std::sync::{Arc, Mutex, Weak};

use ethereum_types::H256;
use rustc_hash::FxHashMap;
use trieste_kv::Database;

use crate::database::TrieDbState;
use crate::error::StateError;

/// Caller-owned handle for reusing an in-memory trie cache across readers of
/// the same database. The cache holds weak references keyed by the database
/// id; it never owns the state, and entries die with their last strong holder.
#[derive(Default)]
pub struct StateCache {
    slots: Mutex<FxHashMap<u64, Weak<TrieDbState>>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Returns a state positioned at `(root, block_nr)` over `db`, reusing the
/// cached one when its position matches, building and registering a fresh one
/// otherwise.
pub fn get_trie_db_state(
    root: H256,
    db: Arc<dyn Database>,
    block_nr: u64,
    cache: &StateCache,
) -> Result<Arc<TrieDbState>, StateError> {
    let id = db.id();
    let existing = cache
        .slots
        .lock()
        .map_err(|_| StateError::Lock)?
        .get(&id)
        .and_then(Weak::upgrade);
    if let Some(existing) = existing {
        if existing.block_nr() == block_nr && existing.last_root()? == root {
            return Ok(existing);
        }
    }
    let state = Arc::new(TrieDbState::new(root, db, block_nr));
    cache
        .slots
        .lock()
        .map_err(|_| StateError::Lock)?
        .insert(id, Arc::downgrade(&state));
    Ok(state)
}
