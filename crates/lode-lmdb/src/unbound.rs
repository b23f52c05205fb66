use lode_core::{DatabaseOps, Entry, Include, Result};
use std::ops::ControlFlow;

use crate::database::Database;
use crate::environment::Environment;

/// A database proxy with no transaction of its own
///
/// Each call runs in a private transaction: readonly for lookups and walks,
/// writable for mutations. Writable calls wait for the writable lane, so they
/// must not be made from a thread that holds a writable transaction.
pub struct UnboundDatabase<'e> {
    env: &'e Environment,
    name: String,
}

impl<'e> UnboundDatabase<'e> {
    pub(crate) fn new(env: &'e Environment, name: &str) -> Self {
        Self {
            env,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read<R>(&self, op: impl FnOnce(&mut Database<'_, '_>) -> Result<R>) -> Result<R> {
        self.env.read(|txn| op(&mut txn.db(&self.name)?))
    }

    fn write<R>(&self, op: impl FnOnce(&mut Database<'_, '_>) -> Result<R>) -> Result<R> {
        self.env.write(|txn| op(&mut txn.db(&self.name)?))
    }
}

impl DatabaseOps for UnboundDatabase<'_> {
    fn count(&mut self) -> Result<usize> {
        self.read(|db| db.count())
    }

    fn exists(&mut self, key: &[u8]) -> Result<bool> {
        self.read(|db| db.exists(key))
    }

    fn set(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        self.write(|db| db.set(key, data))
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|db| db.get(key))
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.write(|db| db.delete(key))
    }

    fn enumerate<F>(&mut self, from: Option<&[u8]>, include: Include, visitor: F) -> Result<usize>
    where
        F: FnMut(Entry<'_>) -> ControlFlow<()>,
    {
        self.read(move |db| db.enumerate(from, include, visitor))
    }

    fn set_count(&mut self, key: &[u8]) -> Result<usize> {
        self.read(|db| db.set_count(key))
    }

    fn add(&mut self, key: &[u8], data: &[u8]) -> Result<bool> {
        self.write(|db| db.add(key, data))
    }

    fn get_all(&mut self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.read(|db| db.get_all(key))
    }

    fn get_at(&mut self, key: &[u8], index: usize) -> Result<Vec<u8>> {
        self.read(|db| db.get_at(key, index))
    }

    fn first(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|db| db.first(key))
    }

    fn last(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(|db| db.last(key))
    }

    fn replace_at(&mut self, key: &[u8], index: usize, data: &[u8]) -> Result<()> {
        self.write(|db| db.replace_at(key, index, data))
    }

    fn replace_value(&mut self, key: &[u8], old: &[u8], new: &[u8]) -> Result<()> {
        self.write(|db| db.replace_value(key, old, new))
    }

    fn remove_all(&mut self, key: &[u8]) -> Result<bool> {
        self.write(|db| db.remove_all(key))
    }

    fn remove_value(&mut self, key: &[u8], data: &[u8]) -> Result<bool> {
        self.write(|db| db.remove_value(key, data))
    }

    fn remove_at(&mut self, key: &[u8], index: usize) -> Result<Vec<u8>> {
        self.write(|db| db.remove_at(key, index))
    }

    fn enumerate_set<F>(&mut self, key: &[u8], visitor: F) -> Result<usize>
    where
        F: FnMut(usize, &[u8]) -> ControlFlow<()>,
    {
        self.read(move |db| db.enumerate_set(key, visitor))
    }
}
