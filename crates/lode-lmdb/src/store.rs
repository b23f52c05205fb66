use lmdb::{DatabaseFlags, EnvironmentFlags, Transaction};
use lode_core::{
    config::SyncMode, observe, EnvironmentConfig, LodeError, Notifier, Result, DEFAULT_DATABASE,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cursor;
use crate::error::engine;

/// An open database handle and whether it stores sorted sets
#[derive(Debug, Clone, Copy)]
pub(crate) struct DbHandle {
    pub(crate) db: lmdb::Database,
    pub(crate) dup_sort: bool,
}

/// Handle-table change staged by a writable transaction
///
/// Applied to the shared table only when the outermost transaction commits.
#[derive(Debug, Clone)]
pub(crate) enum HandleChange {
    Created(String, DbHandle),
    Dropped(String),
}

/// Shared state of one open LMDB environment
///
/// Owned through an `Arc` by the environment and the scheduler workers.
pub(crate) struct Store {
    pub(crate) env: lmdb::Environment,
    pub(crate) path: PathBuf,
    pub(crate) notifier: Arc<Notifier>,
    handles: RwLock<HashMap<String, DbHandle>>,
    // Single writer
    lane: Mutex<()>,
}

impl Store {
    pub(crate) fn open(config: &EnvironmentConfig, notifier: Arc<Notifier>) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;

        let mut env_builder = lmdb::Environment::new();
        env_builder.set_max_dbs(config.max_databases);
        env_builder.set_map_size(config.map_size);
        env_builder.set_max_readers(config.max_readers);

        // Read transactions may be created on one thread and finished on another
        let mut flags = EnvironmentFlags::NO_TLS;
        match config.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => flags.insert(EnvironmentFlags::NO_META_SYNC),
            SyncMode::NoSync => flags.insert(EnvironmentFlags::NO_SYNC),
        }
        env_builder.set_flags(flags);

        let env = env_builder.open(&config.path).map_err(engine)?;

        let mut handles = discover(&env)?;
        if !handles.contains_key(DEFAULT_DATABASE) {
            let db = env
                .create_db(Some(DEFAULT_DATABASE), DatabaseFlags::empty())
                .map_err(engine)?;
            handles.insert(
                DEFAULT_DATABASE.to_string(),
                DbHandle {
                    db,
                    dup_sort: false,
                },
            );
        }

        tracing::debug!(
            path = %config.path.display(),
            databases = handles.len(),
            "opened LMDB environment"
        );

        Ok(Self {
            env,
            path: config.path.clone(),
            notifier,
            handles: RwLock::new(handles),
            lane: Mutex::new(()),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the writable lane
    ///
    /// Every LMDB write transaction, including the ones `lmdb::Environment`
    /// begins internally for `create_db`, runs while this guard is held.
    pub(crate) fn lane(&self) -> MutexGuard<'_, ()> {
        if let Some(guard) = self.lane.try_lock() {
            return guard;
        }
        let start = Instant::now();
        let guard = self.lane.lock();
        let waited = start.elapsed();
        observe::record_lane_wait(waited);
        tracing::trace!(?waited, "acquired writable lane");
        guard
    }

    pub(crate) fn handle(&self, name: &str) -> Option<DbHandle> {
        self.handles.read().get(name).copied()
    }

    pub(crate) fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply handle changes from a committed outermost transaction
    ///
    /// The caller holds the writable lane.
    pub(crate) fn publish(&self, changes: Vec<HandleChange>) {
        if changes.is_empty() {
            return;
        }
        let mut handles = self.handles.write();
        for change in changes {
            match change {
                HandleChange::Created(name, handle) => {
                    handles.insert(name, handle);
                }
                HandleChange::Dropped(name) => {
                    handles.remove(&name);
                }
            }
        }
    }

    /// Reopen a cached database whose handle an uncommitted drop closed
    ///
    /// The caller holds the writable lane.
    pub(crate) fn restore(&self, name: &str) {
        if self.handle(name).is_none() {
            return;
        }
        let reopened = self
            .env
            .open_db(Some(name))
            .and_then(|db| Ok((db, self.env.get_db_flags(db)?)));
        match reopened {
            Ok((db, flags)) => {
                let handle = DbHandle {
                    db,
                    dup_sort: flags.contains(DatabaseFlags::DUP_SORT),
                };
                self.handles.write().insert(name.to_string(), handle);
                tracing::debug!(name, "restored database handle after aborted drop");
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "database vanished after aborted drop");
                self.handles.write().remove(name);
            }
        }
    }

    /// Open or create a named database outside of any caller transaction
    pub(crate) fn open_database(&self, name: &str, allow_duplicates: bool) -> Result<DbHandle> {
        let _lane = self.lane();

        if let Some(handle) = self.handle(name) {
            return if handle.dup_sort == allow_duplicates {
                Ok(handle)
            } else {
                Err(mismatch(name, handle.dup_sort))
            };
        }

        let flags = if allow_duplicates {
            DatabaseFlags::DUP_SORT
        } else {
            DatabaseFlags::empty()
        };
        let db = self.env.create_db(Some(name), flags).map_err(engine)?;
        let actual = self.env.get_db_flags(db).map_err(engine)?;
        let handle = DbHandle {
            db,
            dup_sort: actual.contains(DatabaseFlags::DUP_SORT),
        };
        if handle.dup_sort != allow_duplicates {
            return Err(mismatch(name, handle.dup_sort));
        }

        self.handles.write().insert(name.to_string(), handle);
        tracing::debug!(name, allow_duplicates, "opened database");
        Ok(handle)
    }
}

fn mismatch(name: &str, dup_sort: bool) -> LodeError {
    let existing = if dup_sort { "allows" } else { "does not allow" };
    LodeError::Config(format!(
        "Database {name} already exists and {existing} duplicate keys"
    ))
}

/// Open every named database recorded in the main database
fn discover(env: &lmdb::Environment) -> Result<HashMap<String, DbHandle>> {
    let main = env.open_db(None).map_err(engine)?;
    let mut names = Vec::new();
    {
        let txn = env.begin_ro_txn().map_err(engine)?;
        let cursor = txn.open_ro_cursor(main).map_err(engine)?;
        cursor::walk(&cursor, None, |key, _| {
            if let Ok(name) = std::str::from_utf8(key) {
                names.push(name.to_string());
            }
            ControlFlow::Continue(())
        })?;
    }

    let mut handles = HashMap::with_capacity(names.len());
    for name in names {
        match env.open_db(Some(&name)) {
            Ok(db) => {
                let flags = env.get_db_flags(db).map_err(engine)?;
                handles.insert(
                    name,
                    DbHandle {
                        db,
                        dup_sort: flags.contains(DatabaseFlags::DUP_SORT),
                    },
                );
            }
            Err(lmdb::Error::Incompatible) => {
                tracing::warn!(key = %name, "main database key is not a named database; skipping");
            }
            Err(e) => return Err(engine(e)),
        }
    }
    Ok(handles)
}
