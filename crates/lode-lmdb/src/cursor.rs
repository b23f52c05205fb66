//! Cursor walks over LMDB databases
//!
//! `lmdb::Iter` panics when a positioning call finds nothing, so walks here
//! drive `Cursor::get` with raw operation codes and treat `NotFound` as the
//! end of the walk. LMDB rejects zero-length keys, and no such key can be
//! stored, so lookups by an empty key find nothing.

use lmdb::{Cursor, RwCursor, WriteFlags};
use lmdb_sys as ffi;
use lode_core::Result;
use std::ops::ControlFlow;
use std::os::raw::c_uint;

use crate::error::engine;

type Step<'txn> = Option<(Option<&'txn [u8]>, &'txn [u8])>;

fn step<'txn, C>(cursor: &C, key: Option<&[u8]>, data: Option<&[u8]>, op: c_uint) -> Result<Step<'txn>>
where
    C: Cursor<'txn>,
{
    match cursor.get(key, data, op) {
        Ok(pair) => Ok(Some(pair)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(engine(e)),
    }
}

/// Visit every key/value pair in key order, starting at the first key `>= from`
///
/// For duplicate-key databases each value is visited as its own pair.
pub(crate) fn walk<'txn, C, F>(cursor: &C, from: Option<&[u8]>, mut visit: F) -> Result<usize>
where
    C: Cursor<'txn>,
    F: FnMut(&'txn [u8], &'txn [u8]) -> ControlFlow<()>,
{
    let mut next = match from {
        Some(start) if !start.is_empty() => step(cursor, Some(start), None, ffi::MDB_SET_RANGE)?,
        _ => step(cursor, None, None, ffi::MDB_FIRST)?,
    };
    let mut visited = 0;
    while let Some((key, value)) = next {
        let key = match key {
            Some(key) => key,
            None => break,
        };
        visited += 1;
        if visit(key, value).is_break() {
            break;
        }
        next = step(cursor, None, None, ffi::MDB_NEXT)?;
    }
    Ok(visited)
}

/// Number of distinct keys
pub(crate) fn count_keys<'txn, C>(cursor: &C) -> Result<usize>
where
    C: Cursor<'txn>,
{
    let mut next = step(cursor, None, None, ffi::MDB_FIRST)?;
    let mut count = 0;
    while next.is_some() {
        count += 1;
        next = step(cursor, None, None, ffi::MDB_NEXT_NODUP)?;
    }
    Ok(count)
}

/// Visit the values stored under `key` in set order
pub(crate) fn dups<'txn, C, F>(cursor: &C, key: &[u8], mut visit: F) -> Result<usize>
where
    C: Cursor<'txn>,
    F: FnMut(usize, &'txn [u8]) -> ControlFlow<()>,
{
    if key.is_empty() {
        return Ok(0);
    }
    let mut next = step(cursor, Some(key), None, ffi::MDB_SET_KEY)?;
    let mut index = 0;
    while let Some((_, value)) = next {
        let flow = visit(index, value);
        index += 1;
        if flow.is_break() {
            break;
        }
        next = step(cursor, None, None, ffi::MDB_NEXT_DUP)?;
    }
    Ok(index)
}

/// Value at `index` under `key`, or the number of values when out of range
pub(crate) fn nth_dup<'txn, C>(cursor: &C, key: &[u8], index: usize) -> Result<std::result::Result<&'txn [u8], usize>>
where
    C: Cursor<'txn>,
{
    let mut found = None;
    let len = dups(cursor, key, |i, value| {
        if i == index {
            found = Some(value);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    Ok(found.ok_or(len))
}

pub(crate) fn first_dup<'txn, C>(cursor: &C, key: &[u8]) -> Result<Option<&'txn [u8]>>
where
    C: Cursor<'txn>,
{
    if key.is_empty() {
        return Ok(None);
    }
    Ok(step(cursor, Some(key), None, ffi::MDB_SET_KEY)?.map(|(_, value)| value))
}

pub(crate) fn last_dup<'txn, C>(cursor: &C, key: &[u8]) -> Result<Option<&'txn [u8]>>
where
    C: Cursor<'txn>,
{
    if key.is_empty() || step(cursor, Some(key), None, ffi::MDB_SET_KEY)?.is_none() {
        return Ok(None);
    }
    Ok(step(cursor, None, None, ffi::MDB_LAST_DUP)?.map(|(_, value)| value))
}

/// Whether `value` is stored under `key`
pub(crate) fn has_pair<'txn, C>(cursor: &C, key: &[u8], value: &[u8]) -> Result<bool>
where
    C: Cursor<'txn>,
{
    if key.is_empty() {
        return Ok(false);
    }
    Ok(step(cursor, Some(key), Some(value), ffi::MDB_GET_BOTH)?.is_some())
}

/// Delete the single `value` stored under `key`
///
/// `RwTransaction::del` hands LMDB a pointer to an already dropped copy of
/// its data argument, so one value is removed by positioning a cursor on the
/// pair instead. Fails with `NotFound` when the pair is absent.
pub(crate) fn del_pair(cursor: &mut RwCursor<'_>, key: &[u8], value: &[u8]) -> lmdb::Result<()> {
    if key.is_empty() {
        return Err(lmdb::Error::NotFound);
    }
    cursor.get(Some(key), Some(value), ffi::MDB_GET_BOTH)?;
    cursor.del(WriteFlags::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmdb::{DatabaseFlags, Environment, Transaction, WriteFlags};
    use tempfile::TempDir;

    fn fixture(flags: DatabaseFlags, pairs: &[(&str, &str)]) -> (TempDir, Environment, lmdb::Database) {
        let dir = TempDir::new().unwrap();
        let env = Environment::new().set_max_dbs(2).open(dir.path()).unwrap();
        let db = env.create_db(Some("t"), flags).unwrap();
        let mut txn = env.begin_rw_txn().unwrap();
        for (k, v) in pairs {
            txn.put(db, k, v, WriteFlags::empty()).unwrap();
        }
        txn.commit().unwrap();
        (dir, env, db)
    }

    #[test]
    fn test_walk_from_key() {
        let (_dir, env, db) = fixture(DatabaseFlags::empty(), &[("a", "1"), ("c", "3"), ("e", "5")]);
        let txn = env.begin_ro_txn().unwrap();
        let cursor = txn.open_ro_cursor(db).unwrap();

        let mut keys = Vec::new();
        let visited = walk(&cursor, Some(b"b"), |k, _| {
            keys.push(k.to_vec());
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(keys, vec![b"c".to_vec(), b"e".to_vec()]);
    }

    #[test]
    fn test_walk_past_end_and_empty() {
        let (_dir, env, db) = fixture(DatabaseFlags::empty(), &[("a", "1")]);
        let txn = env.begin_ro_txn().unwrap();
        let cursor = txn.open_ro_cursor(db).unwrap();
        assert_eq!(walk(&cursor, Some(b"z"), |_, _| ControlFlow::Continue(())).unwrap(), 0);

        let (_dir2, env2, db2) = fixture(DatabaseFlags::empty(), &[]);
        let txn2 = env2.begin_ro_txn().unwrap();
        let cursor2 = txn2.open_ro_cursor(db2).unwrap();
        assert_eq!(walk(&cursor2, None, |_, _| ControlFlow::Continue(())).unwrap(), 0);
        assert_eq!(count_keys(&cursor2).unwrap(), 0);
    }

    #[test]
    fn test_walk_stops_on_break() {
        let (_dir, env, db) = fixture(DatabaseFlags::empty(), &[("a", "1"), ("b", "2"), ("c", "3")]);
        let txn = env.begin_ro_txn().unwrap();
        let cursor = txn.open_ro_cursor(db).unwrap();
        let visited = walk(&cursor, None, |_, _| ControlFlow::Break(())).unwrap();
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_duplicate_helpers() {
        let (_dir, env, db) = fixture(
            DatabaseFlags::DUP_SORT,
            &[("k", "b"), ("k", "a"), ("k", "c"), ("m", "z")],
        );
        let txn = env.begin_ro_txn().unwrap();
        let cursor = txn.open_ro_cursor(db).unwrap();

        assert_eq!(count_keys(&cursor).unwrap(), 2);

        let mut values = Vec::new();
        let n = dups(&cursor, b"k", |_, v| {
            values.push(v.to_vec());
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        assert_eq!(first_dup(&cursor, b"k").unwrap(), Some(&b"a"[..]));
        assert_eq!(last_dup(&cursor, b"k").unwrap(), Some(&b"c"[..]));
        assert_eq!(nth_dup(&cursor, b"k", 1).unwrap(), Ok(&b"b"[..]));
        assert_eq!(nth_dup(&cursor, b"k", 5).unwrap(), Err(3));
        assert!(has_pair(&cursor, b"k", b"b").unwrap());
        assert!(!has_pair(&cursor, b"k", b"x").unwrap());
        assert_eq!(first_dup(&cursor, b"missing").unwrap(), None);
        assert_eq!(last_dup(&cursor, b"missing").unwrap(), None);
    }

    #[test]
    fn test_empty_key_finds_nothing() {
        let (_dir, env, db) = fixture(DatabaseFlags::DUP_SORT, &[("a", "1"), ("b", "2")]);
        let txn = env.begin_ro_txn().unwrap();
        let cursor = txn.open_ro_cursor(db).unwrap();

        let visited = walk(&cursor, Some(b""), |_, _| ControlFlow::Continue(())).unwrap();
        assert_eq!(visited, 2);
        assert_eq!(dups(&cursor, b"", |_, _| ControlFlow::Continue(())).unwrap(), 0);
        assert_eq!(first_dup(&cursor, b"").unwrap(), None);
        assert_eq!(last_dup(&cursor, b"").unwrap(), None);
        assert!(!has_pair(&cursor, b"", b"1").unwrap());
    }

    #[test]
    fn test_del_pair_removes_one_value() {
        let (_dir, env, db) = fixture(DatabaseFlags::DUP_SORT, &[("k", "a"), ("k", "b"), ("k", "c")]);
        let mut txn = env.begin_rw_txn().unwrap();
        {
            let mut cursor = txn.open_rw_cursor(db).unwrap();
            del_pair(&mut cursor, b"k", b"b").unwrap();
            assert_eq!(del_pair(&mut cursor, b"k", b"x"), Err(lmdb::Error::NotFound));
            assert_eq!(del_pair(&mut cursor, b"", b"a"), Err(lmdb::Error::NotFound));
        }
        txn.commit().unwrap();

        let txn = env.begin_ro_txn().unwrap();
        let cursor = txn.open_ro_cursor(db).unwrap();
        let mut values = Vec::new();
        dups(&cursor, b"k", |_, v| {
            values.push(v.to_vec());
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(values, vec![b"a".to_vec(), b"c".to_vec()]);
    }
}
