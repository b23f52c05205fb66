use crate::error::Result;
use std::ops::ControlFlow;

/// Which halves of each entry an enumeration hands to its visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub keys: bool,
    pub values: bool,
}

impl Include {
    pub const ALL: Include = Include {
        keys: true,
        values: true,
    };
    pub const KEYS: Include = Include {
        keys: true,
        values: false,
    };
    pub const VALUES: Include = Include {
        keys: false,
        values: true,
    };
}

/// One entry visited by [`DatabaseOps::enumerate`]
///
/// `key`/`value` are `None` when excluded by [`Include`]. `index` counts
/// visited entries from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub index: usize,
    pub key: Option<&'a [u8]>,
    pub value: Option<&'a [u8]>,
}

/// Byte-oriented operations on one database
///
/// Implemented by the transaction-bound proxy and by the unbound proxy that
/// wraps every call in a private transaction. Structured-value adapters build
/// on this trait.
///
/// Sorted-set operations (`set_count` through `enumerate_set`) require a
/// database opened with duplicate keys. Values under one key are kept in byte
/// order and each value appears at most once; indexes address that order.
pub trait DatabaseOps {
    /// Number of distinct keys
    fn count(&mut self) -> Result<usize>;

    fn exists(&mut self, key: &[u8]) -> Result<bool>;

    fn set(&mut self, key: &[u8], data: &[u8]) -> Result<()>;

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key and every value stored under it
    ///
    /// Returns `false` if the key was absent.
    fn delete(&mut self, key: &[u8]) -> Result<bool>;

    /// Walk entries in key order, starting at the first key `>= from`
    ///
    /// Returning `ControlFlow::Break` from the visitor stops the walk.
    /// Returns the number of entries visited.
    fn enumerate<F>(&mut self, from: Option<&[u8]>, include: Include, visitor: F) -> Result<usize>
    where
        F: FnMut(Entry<'_>) -> ControlFlow<()>;

    /// Number of values stored under `key`
    fn set_count(&mut self, key: &[u8]) -> Result<usize>;

    /// Insert `data` into the set at `key`
    ///
    /// Returns `false` if the value was already present.
    fn add(&mut self, key: &[u8], data: &[u8]) -> Result<bool>;

    fn get_all(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>>;

    fn get_at(&mut self, key: &[u8], index: usize) -> Result<Vec<u8>>;

    fn first(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn last(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn replace_at(&mut self, key: &[u8], index: usize, data: &[u8]) -> Result<()>;

    /// Replace `old` with `new`; fails with `KeyNotFound` if `old` is absent
    fn replace_value(&mut self, key: &[u8], old: &[u8], new: &[u8]) -> Result<()>;

    fn remove_all(&mut self, key: &[u8]) -> Result<bool>;

    fn remove_value(&mut self, key: &[u8], data: &[u8]) -> Result<bool>;

    /// Remove and return the value at `index`
    fn remove_at(&mut self, key: &[u8], index: usize) -> Result<Vec<u8>>;

    /// Walk the values under `key` in set order
    fn enumerate_set<F>(&mut self, key: &[u8], visitor: F) -> Result<usize>
    where
        F: FnMut(usize, &[u8]) -> ControlFlow<()>;
}
