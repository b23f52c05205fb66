use lmdb::WriteFlags;
use lode_core::{DatabaseOps, Entry, Include, LodeError, Result};
use std::ops::ControlFlow;

use crate::cursor;
use crate::store::DbHandle;
use crate::txn::Transaction;

/// A database proxy bound to one transaction
///
/// Every call runs inside the transaction it was created from. Engine errors
/// raised by writes are also recorded in the transaction's error slot.
pub struct Database<'t, 'env> {
    txn: &'t mut Transaction<'env>,
    name: String,
    handle: DbHandle,
}

impl<'t, 'env> Database<'t, 'env> {
    pub(crate) fn new(txn: &'t mut Transaction<'env>, name: &str, handle: DbHandle) -> Self {
        Self {
            txn,
            name: name.to_string(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the database stores sorted sets of values per key
    pub fn allows_duplicates(&self) -> bool {
        self.handle.dup_sort
    }

    fn sorted(&self) -> Result<()> {
        if self.handle.dup_sort {
            Ok(())
        } else {
            Err(LodeError::NotSortedSet(self.name.clone()))
        }
    }

    /// Returns `false` when LMDB reports the pair already exists
    fn put(&mut self, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<bool> {
        let result = self.txn.writer()?.put(self.handle.db, &key, &data, flags);
        match result {
            Ok(()) => {
                self.txn.mark_mutated(&self.name);
                Ok(true)
            }
            Err(lmdb::Error::KeyExist) => Ok(false),
            Err(e) => Err(self.txn.record(e)),
        }
    }

    /// Returns `false` when there was nothing to delete
    fn del(&mut self, key: &[u8], data: Option<&[u8]>) -> Result<bool> {
        let db = self.handle.db;
        let txn = self.txn.writer()?;
        if key.is_empty() {
            return Ok(false);
        }
        let result = match data {
            Some(data) => txn
                .open_rw_cursor(db)
                .and_then(|mut rw| cursor::del_pair(&mut rw, key, data)),
            None => txn.del(db, &key, None),
        };
        match result {
            Ok(()) => {
                self.txn.mark_mutated(&self.name);
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(self.txn.record(e)),
        }
    }

    fn value_at(&self, key: &[u8], index: usize) -> Result<Vec<u8>> {
        let cursor = self.txn.cursor(self.handle.db)?;
        match cursor::nth_dup(&cursor, key, index)? {
            Ok(value) => Ok(value.to_vec()),
            Err(len) => Err(LodeError::IndexOutOfRange { index, len }),
        }
    }

    fn swap(&mut self, key: &[u8], old: &[u8], new: &[u8]) -> Result<()> {
        if old == new {
            return Ok(());
        }
        self.del(key, Some(old))?;
        // An existing `new` absorbs the replacement
        self.put(key, new, WriteFlags::NO_DUP_DATA)?;
        Ok(())
    }
}

impl DatabaseOps for Database<'_, '_> {
    fn count(&mut self) -> Result<usize> {
        let cursor = self.txn.cursor(self.handle.db)?;
        cursor::count_keys(&cursor)
    }

    fn exists(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.txn.get_raw(self.handle.db, key)?.is_some())
    }

    /// Store `data` under `key`, replacing whatever was there
    ///
    /// On a sorted-set database the set becomes the single value `data`.
    fn set(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        if self.handle.dup_sort {
            self.del(key, None)?;
        }
        self.put(key, data, WriteFlags::empty())?;
        Ok(())
    }

    /// On a sorted-set database this is the first value
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .txn
            .get_raw(self.handle.db, key)?
            .map(|value| value.to_vec()))
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.del(key, None)
    }

    fn enumerate<F>(&mut self, from: Option<&[u8]>, include: Include, mut visitor: F) -> Result<usize>
    where
        F: FnMut(Entry<'_>) -> ControlFlow<()>,
    {
        let cursor = self.txn.cursor(self.handle.db)?;
        let mut index = 0;
        cursor::walk(&cursor, from, |key, value| {
            let entry = Entry {
                index,
                key: include.keys.then_some(key),
                value: include.values.then_some(value),
            };
            index += 1;
            visitor(entry)
        })
    }

    fn set_count(&mut self, key: &[u8]) -> Result<usize> {
        self.sorted()?;
        let cursor = self.txn.cursor(self.handle.db)?;
        cursor::dups(&cursor, key, |_, _| ControlFlow::Continue(()))
    }

    fn add(&mut self, key: &[u8], data: &[u8]) -> Result<bool> {
        self.sorted()?;
        self.put(key, data, WriteFlags::NO_DUP_DATA)
    }

    fn get_all(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.sorted()?;
        let cursor = self.txn.cursor(self.handle.db)?;
        let mut values = Vec::new();
        cursor::dups(&cursor, key, |_, value| {
            values.push(value.to_vec());
            ControlFlow::Continue(())
        })?;
        Ok(values)
    }

    fn get_at(&mut self, key: &[u8], index: usize) -> Result<Vec<u8>> {
        self.sorted()?;
        self.value_at(key, index)
    }

    fn first(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.sorted()?;
        let cursor = self.txn.cursor(self.handle.db)?;
        Ok(cursor::first_dup(&cursor, key)?.map(|value| value.to_vec()))
    }

    fn last(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.sorted()?;
        let cursor = self.txn.cursor(self.handle.db)?;
        Ok(cursor::last_dup(&cursor, key)?.map(|value| value.to_vec()))
    }

    fn replace_at(&mut self, key: &[u8], index: usize, data: &[u8]) -> Result<()> {
        self.sorted()?;
        self.txn.writer()?;
        let old = self.value_at(key, index)?;
        self.swap(key, &old, data)
    }

    fn replace_value(&mut self, key: &[u8], old: &[u8], new: &[u8]) -> Result<()> {
        self.sorted()?;
        self.txn.writer()?;
        let present = {
            let cursor = self.txn.cursor(self.handle.db)?;
            cursor::has_pair(&cursor, key, old)?
        };
        if !present {
            return Err(LodeError::KeyNotFound);
        }
        self.swap(key, old, new)
    }

    fn remove_all(&mut self, key: &[u8]) -> Result<bool> {
        self.sorted()?;
        self.del(key, None)
    }

    fn remove_value(&mut self, key: &[u8], data: &[u8]) -> Result<bool> {
        self.sorted()?;
        self.del(key, Some(data))
    }

    fn remove_at(&mut self, key: &[u8], index: usize) -> Result<Vec<u8>> {
        self.sorted()?;
        self.txn.writer()?;
        let value = self.value_at(key, index)?;
        self.del(key, Some(&value))?;
        Ok(value)
    }

    fn enumerate_set<F>(&mut self, key: &[u8], mut visitor: F) -> Result<usize>
    where
        F: FnMut(usize, &[u8]) -> ControlFlow<()>,
    {
        self.sorted()?;
        let cursor = self.txn.cursor(self.handle.db)?;
        cursor::dups(&cursor, key, |index, value| visitor(index, value))
    }
}
