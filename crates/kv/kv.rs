pub mod buckets;
pub mod error;
pub mod keys;
pub mod memdb;

pub use buckets::Bucket;
pub use error::KvError;
pub use memdb::MemDb;

/// Walker over a single key range. Returning `Ok(false)` stops the walk.
pub type Walker<'a> = dyn FnMut(&[u8], &[u8]) -> Result<bool, KvError> + 'a;

/// Walker over multiple key ranges. The first argument identifies the range the
/// emitted entry belongs to. Returning `Ok(false)` stops the walk.
pub type MultiWalker<'a> = dyn FnMut(usize, &[u8], &[u8]) -> Result<bool, KvError> + 'a;

/// Receiver for undo records during a rewind. Arguments are the history bucket the
/// record was found in, the changed key and its pre-image value (empty if the key
/// did not exist before the change).
pub type RewindEmitter<'a> = dyn FnMut(Bucket, &[u8], &[u8]) -> Result<(), KvError> + 'a;

/// Contract consumed from the backing key-value engine.
///
/// Prefix ranges are expressed as `(start_key, fixed_bits)`: a walk visits the keys
/// that are `>= start_key` and share the first `fixed_bits` bits with it, in
/// ascending lexicographic order. `fixed_bits` is a multiple of 4 (nibble
/// granularity) but not necessarily of 8.
pub trait Database: Send + Sync {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Value of `key` as of the given timestamp: the first pre-image recorded at a
    /// block `>= timestamp`, falling back to the latest value.
    fn get_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        key: &[u8],
        timestamp: u64,
    ) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), KvError>;

    /// Idempotent history write: records `prev_value` as the pre-image of `key` for
    /// `block_nr` and indexes the change under that block. Repeated writes for the
    /// same `(key, block_nr)` keep the first pre-image. `no_history` suppresses the
    /// record entirely.
    fn put_history(
        &self,
        hist_bucket: Bucket,
        key: &[u8],
        prev_value: &[u8],
        block_nr: u64,
        no_history: bool,
    ) -> Result<(), KvError>;

    fn walk(
        &self,
        bucket: Bucket,
        start_key: &[u8],
        fixed_bits: u32,
        walker: &mut Walker<'_>,
    ) -> Result<(), KvError>;

    fn walk_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        start_key: &[u8],
        fixed_bits: u32,
        timestamp: u64,
        walker: &mut Walker<'_>,
    ) -> Result<(), KvError>;

    /// Walks each `(start_keys[i], fixed_bits[i])` range in order, emitting entries
    /// in ascending `(range_idx, key)` order.
    fn multi_walk(
        &self,
        bucket: Bucket,
        start_keys: &[Vec<u8>],
        fixed_bits: &[u32],
        walker: &mut MultiWalker<'_>,
    ) -> Result<(), KvError>;

    fn multi_walk_as_of(
        &self,
        bucket: Bucket,
        hist_bucket: Bucket,
        start_keys: &[Vec<u8>],
        fixed_bits: &[u32],
        timestamp: u64,
        walker: &mut MultiWalker<'_>,
    ) -> Result<(), KvError>;

    /// Emits every undo record for blocks in `(to, from]`, newest block first.
    fn rewind_data(&self, from: u64, to: u64, emit: &mut RewindEmitter<'_>)
        -> Result<(), KvError>;

    /// Drops the history index entries (and pre-images) recorded for one block.
    fn delete_timestamp(&self, block_nr: u64) -> Result<(), KvError>;

    /// Unique per open database.
    fn id(&self) -> u64;
}
