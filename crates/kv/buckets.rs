/// The key spaces of the backing database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// Latest account records, keyed by `hash(address)`.
    Accounts,
    /// Account pre-images, keyed by `hash(address) ‖ block-number`.
    AccountsHistory,
    /// Latest storage slots, keyed by `hash(address) ‖ incarnation ‖ hash(slot)`.
    Storage,
    /// Storage pre-images, keyed by the storage key ‖ block-number.
    StorageHistory,
    /// Contract bytecode, keyed by code hash.
    Code,
    /// Hash pre-images, keyed by the hash.
    Preimages,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::Accounts,
        Bucket::AccountsHistory,
        Bucket::Storage,
        Bucket::StorageHistory,
        Bucket::Code,
        Bucket::Preimages,
    ];
}
