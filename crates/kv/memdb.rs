use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::keys::matches_fixed_bits;
use crate::{Bucket, Database, KvError, MultiWalker, RewindEmitter, Walker};

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

const HISTORY_SUFFIX_LENGTH: usize = 8;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory implementation of the [`Database`] contract, with full history and
/// rewind support. Reference backend for tests.
pub struct MemDb {
    id: u64,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<Bucket, Table>,
    /// Per-block index of `(history bucket, key)` changes, driving rewinds.
    changes: BTreeMap<u64, BTreeSet<(Bucket, Vec<u8>)>>,
}

fn history_key(key: &[u8], block_nr: u64) -> Vec<u8> {
    let mut hkey = Vec::with_capacity(key.len() + HISTORY_SUFFIX_LENGTH);
    hkey.extend_from_slice(key);
    hkey.extend_from_slice(&block_nr.to_be_bytes());
    hkey
}

impl Inner {
    fn table(&self, bucket: Bucket) -> Option<&Table> {
        self.tables.get(&bucket)
    }

    fn table_mut(&mut self, bucket: Bucket) -> &mut Table {
        self.tables.entry(bucket).or_default()
    }

    /// First pre-image recorded for `key` at a block `>= timestamp`, if any.
    fn pre_image(&self, hist_bucket: Bucket, key: &[u8], timestamp: u64) -> Option<Vec<u8>> {
        let table = self.table(hist_bucket)?;
        let start = history_key(key, timestamp);
        table
            .range(start..)
            .next()
            .filter(|(hkey, _)| hkey.len() == key.len() + HISTORY_SUFFIX_LENGTH && &hkey[..key.len()] == key)
            .map(|(_, v)| v.clone())
    }

    fn value_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        key: &[u8],
        timestamp: u64,
    ) -> Option<Vec<u8>> {
        let value = match self.pre_image(hist_bucket, key, timestamp) {
            Some(pre) => pre,
            None => self.table(bucket)?.get(key).cloned()?,
        };
        if value.is_empty() {
            // An empty pre-image marks a key that did not exist yet
            None
        } else {
            Some(value)
        }
    }

    /// Entries of a `(start_key, fixed_bits)` range in the latest view.
    fn collect_range(
        &self,
        bucket: Bucket,
        start_key: &[u8],
        fixed_bits: u32,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let Some(table) = self.table(bucket) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (k, v) in table.range(start_key.to_vec()..) {
            if !matches_fixed_bits(k, start_key, fixed_bits) {
                break;
            }
            out.push((k.clone(), v.clone()));
        }
        out
    }

    /// Entries of a `(start_key, fixed_bits)` range in the historical view.
    fn collect_range_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        start_key: &[u8],
        fixed_bits: u32,
        timestamp: u64,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut keys: BTreeSet<Vec<u8>> = BTreeSet::new();
        if let Some(table) = self.table(bucket) {
            for (k, _) in table.range(start_key.to_vec()..) {
                if !matches_fixed_bits(k, start_key, fixed_bits) {
                    break;
                }
                keys.insert(k.clone());
            }
        }
        if let Some(table) = self.table(hist_bucket) {
            for (hkey, _) in table.range(start_key.to_vec()..) {
                if !matches_fixed_bits(hkey, start_key, fixed_bits) {
                    break;
                }
                if hkey.len() > HISTORY_SUFFIX_LENGTH {
                    keys.insert(hkey[..hkey.len() - HISTORY_SUFFIX_LENGTH].to_vec());
                }
            }
        }
        keys.into_iter()
            .filter_map(|k| {
                self.value_as_of(bucket, hist_bucket, &k, timestamp)
                    .map(|v| (k, v))
            })
            .collect()
    }
}

impl MemDb {
    pub fn new() -> Self {
        Self {
            id: NEXT_DB_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, KvError> {
        self.inner.lock().map_err(|_| KvError::Lock)
    }

    fn drive_walker(
        entries: Vec<(usize, Vec<u8>, Vec<u8>)>,
        walker: &mut MultiWalker<'_>,
    ) -> Result<(), KvError> {
        for (idx, k, v) in entries {
            if !walker(idx, &k, &v)? {
                break;
            }
        }
        Ok(())
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

impl Database for MemDb {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.lock()?.table(bucket).and_then(|t| t.get(key).cloned()))
    }

    fn get_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        key: &[u8],
        timestamp: u64,
    ) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.lock()?.value_as_of(bucket, hist_bucket, key, timestamp))
    }

    fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.lock()?
            .table_mut(bucket)
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), KvError> {
        self.lock()?.table_mut(bucket).remove(key);
        Ok(())
    }

    fn put_history(
        &self,
        hist_bucket: Bucket,
        key: &[u8],
        prev_value: &[u8],
        block_nr: u64,
        no_history: bool,
    ) -> Result<(), KvError> {
        if no_history {
            return Ok(());
        }
        let mut inner = self.lock()?;
        let hkey = history_key(key, block_nr);
        // The first write in a block carries the block's pre-image; keep it.
        inner
            .table_mut(hist_bucket)
            .entry(hkey)
            .or_insert_with(|| prev_value.to_vec());
        inner
            .changes
            .entry(block_nr)
            .or_default()
            .insert((hist_bucket, key.to_vec()));
        Ok(())
    }

    fn walk(
        &self,
        bucket: Bucket,
        start_key: &[u8],
        fixed_bits: u32,
        walker: &mut Walker<'_>,
    ) -> Result<(), KvError> {
        let entries = self.lock()?.collect_range(bucket, start_key, fixed_bits);
        for (k, v) in entries {
            if !walker(&k, &v)? {
                break;
            }
        }
        Ok(())
    }

    fn walk_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        start_key: &[u8],
        fixed_bits: u32,
        timestamp: u64,
        walker: &mut Walker<'_>,
    ) -> Result<(), KvError> {
        let entries =
            self.lock()?
                .collect_range_as_of(bucket, hist_bucket, start_key, fixed_bits, timestamp);
        for (k, v) in entries {
            if !walker(&k, &v)? {
                break;
            }
        }
        Ok(())
    }

    fn multi_walk(
        &self,
        bucket: Bucket,
        start_keys: &[Vec<u8>],
        fixed_bits: &[u32],
        walker: &mut MultiWalker<'_>,
    ) -> Result<(), KvError> {
        let mut entries = Vec::new();
        {
            let inner = self.lock()?;
            for (idx, (start, bits)) in start_keys.iter().zip(fixed_bits).enumerate() {
                for (k, v) in inner.collect_range(bucket, start, *bits) {
                    entries.push((idx, k, v));
                }
            }
        }
        Self::drive_walker(entries, walker)
    }

    fn multi_walk_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        start_keys: &[Vec<u8>],
        fixed_bits: &[u32],
        timestamp: u64,
        walker: &mut MultiWalker<'_>,
    ) -> Result<(), KvError> {
        let mut entries = Vec::new();
        {
            let inner = self.lock()?;
            for (idx, (start, bits)) in start_keys.iter().zip(fixed_bits).enumerate() {
                for (k, v) in
                    inner.collect_range_as_of(bucket, hist_bucket, start, *bits, timestamp)
                {
                    entries.push((idx, k, v));
                }
            }
        }
        Self::drive_walker(entries, walker)
    }

    fn rewind_data(
        &self,
        from: u64,
        to: u64,
        emit: &mut RewindEmitter<'_>,
    ) -> Result<(), KvError> {
        let mut records = Vec::new();
        {
            let inner = self.lock()?;
            let mut block = from;
            while block > to {
                if let Some(changed) = inner.changes.get(&block) {
                    for (bucket, key) in changed {
                        let pre = inner
                            .table(*bucket)
                            .and_then(|t| t.get(&history_key(key, block)).cloned())
                            .unwrap_or_default();
                        records.push((*bucket, key.clone(), pre));
                    }
                }
                block -= 1;
            }
        }
        // The lock is released: the emitter is expected to write back through us
        for (bucket, key, pre) in records {
            emit(bucket, &key, &pre)?;
        }
        Ok(())
    }

    fn delete_timestamp(&self, block_nr: u64) -> Result<(), KvError> {
        let mut inner = self.lock()?;
        if let Some(changed) = inner.changes.remove(&block_nr) {
            for (bucket, key) in changed {
                inner.table_mut(bucket).remove(&history_key(&key, block_nr));
            }
        }
        Ok(())
    }

    fn id(&self) -> u64 {
        self.id
    }
}
