//! # kvbridge-store
//!
//! Store-facing contract for kvbridge.
//!
//! This crate provides:
//! - The [`Store`] trait: get/put/del/batch/clear/iterator over raw byte
//!   keys and values
//! - The [`StoreIterator`] cursor trait with range bounds, reverse, limit,
//!   seek, and resume-after positioning
//! - [`MemoryStore`], an ordered in-memory reference implementation

pub mod error;
pub mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use bytes::Bytes;
use kvbridge_protocol::{BatchOp, IteratorOptions, RangeOptions};

/// An ordered key/value store over raw byte keys and values.
///
/// Implementations must be shareable across tasks; interior mutability is
/// the implementation's concern.
pub trait Store: Send + Sync + 'static {
    /// Returns the value stored at `key`, or `None` when absent.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Looks up several keys at once, preserving order and absence.
    fn get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, StoreError> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Stores `value` at `key`, replacing any existing value.
    fn put(&self, key: Bytes, value: Bytes) -> Result<(), StoreError>;

    /// Removes `key`. Deleting an absent key is not an error.
    fn del(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Applies a sequence of puts and deletes as one write.
    fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Removes every key within the range, honouring reverse and limit.
    fn clear(&self, options: &RangeOptions) -> Result<(), StoreError>;

    /// Opens a cursor over the range described by `options`.
    fn iterator(&self, options: IteratorOptions) -> Result<Box<dyn StoreIterator>, StoreError>;

    /// Releases any resources held by the store.
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A cursor over an ordered range of entries.
pub trait StoreIterator: Send {
    /// Yields the next entry in iteration order, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<(Bytes, Bytes)>, StoreError>;

    /// Repositions the cursor so the next entry is the first at or past
    /// `target` in iteration order.
    fn seek(&mut self, target: &[u8]);

    /// Repositions the cursor strictly past `key` in iteration order,
    /// without yielding `key` itself again.
    fn resume_after(&mut self, key: &[u8]);
}
