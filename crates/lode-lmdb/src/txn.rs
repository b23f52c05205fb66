use lmdb::{DatabaseFlags, RoCursor, RoTransaction, RwTransaction, Transaction as _};
use lode_core::{observe, ErrorKind, LodeError, Notification, Result, DEFAULT_DATABASE};
use parking_lot::MutexGuard;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::database::Database;
use crate::error::{commit as commit_error, engine, unknown_handle};
use crate::store::{DbHandle, HandleChange, Store};

enum Inner<'env> {
    Read(RoTransaction<'env>),
    Write(RwTransaction<'env>),
    // Readonly child of a readonly parent: shares the parent's snapshot
    Snapshot(&'env RoTransaction<'env>),
}

/// What a writable transaction changed, handed to its parent on commit
#[derive(Default)]
struct Journal {
    mutated: BTreeSet<String>,
    handles: Vec<HandleChange>,
}

impl Journal {
    fn absorb(&mut self, child: Journal) {
        self.mutated.extend(child.mutated);
        self.handles.extend(child.handles);
    }
}

/// A transaction over one environment
///
/// Readonly transactions see a stable snapshot and run concurrently with
/// everything else. An outermost writable transaction holds the environment's
/// writable lane from `begin` until it commits, aborts or is dropped, so a
/// thread that already holds one must nest instead of calling
/// [`Environment::begin`](crate::Environment::begin) again.
///
/// The first engine error raised by a write is kept in an error slot; once
/// set, `commit` aborts and returns it. Dropping an unfinished transaction
/// aborts it.
pub struct Transaction<'env> {
    store: &'env Store,
    inner: Option<Inner<'env>>,
    readonly: bool,
    depth: usize,
    error: Option<LodeError>,
    rollback: bool,
    journal: Journal,
    // Handle changes staged by uncommitted ancestors
    inherited: Vec<HandleChange>,
    parent: Option<&'env mut Journal>,
    _lane: Option<MutexGuard<'env, ()>>,
}

impl<'env> Transaction<'env> {
    pub(crate) fn begin(store: &'env Store, readonly: bool) -> Result<Self> {
        if readonly {
            let txn = store.env.begin_ro_txn().map_err(engine)?;
            Ok(Self::outermost(store, Inner::Read(txn), true, None))
        } else {
            let lane = store.lane();
            let txn = store.env.begin_rw_txn().map_err(engine)?;
            Ok(Self::outermost(store, Inner::Write(txn), false, Some(lane)))
        }
    }

    /// Begin a writable transaction while the caller already holds the lane
    pub(crate) fn begin_in_lane(store: &'env Store) -> Result<Self> {
        let txn = store.env.begin_rw_txn().map_err(engine)?;
        Ok(Self::outermost(store, Inner::Write(txn), false, None))
    }

    fn outermost(
        store: &'env Store,
        inner: Inner<'env>,
        readonly: bool,
        lane: Option<MutexGuard<'env, ()>>,
    ) -> Self {
        Self {
            store,
            inner: Some(inner),
            readonly,
            depth: 0,
            error: None,
            rollback: false,
            journal: Journal::default(),
            inherited: Vec::new(),
            parent: None,
            _lane: lane,
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Nesting depth; zero for an outermost transaction
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The recorded error, if any
    pub fn error(&self) -> Option<&LodeError> {
        self.error.as_ref()
    }

    /// Record an error so that `commit` aborts; the first error wins
    pub fn set_error(&mut self, err: LodeError) {
        if self.error.is_none() {
            tracing::debug!(error = %err, depth = self.depth, "transaction error recorded");
            self.error = Some(err);
        }
    }

    /// Ask the scheduler to abort this transaction after its work returns
    pub fn request_rollback(&mut self) {
        self.rollback = true;
    }

    pub fn rollback_requested(&self) -> bool {
        self.rollback
    }

    /// Bind a proxy to the named database
    ///
    /// A writable transaction creates the database on first use; readonly
    /// transactions fail with `DatabaseNotFound` for unknown names.
    pub fn db(&mut self, name: &str) -> Result<Database<'_, 'env>> {
        let handle = self.resolve(name)?;
        Ok(Database::new(self, name, handle))
    }

    pub fn default_db(&mut self) -> Result<Database<'_, 'env>> {
        self.db(DEFAULT_DATABASE)
    }

    /// Begin a child transaction
    ///
    /// A child of a readonly transaction is readonly. A writable child's
    /// changes become part of this transaction when the child commits and are
    /// discarded when it aborts.
    pub fn begin_nested(&mut self, readonly: bool) -> Result<Transaction<'_>> {
        let readonly = readonly || self.readonly;
        let store = self.store;
        let depth = self.depth + 1;
        let mut inherited = self.inherited.clone();
        inherited.extend(self.journal.handles.iter().cloned());

        let (inner, parent) = match self.inner.as_mut() {
            Some(Inner::Write(txn)) => {
                let child = txn.begin_nested_txn().map_err(engine)?;
                let parent = if readonly {
                    None
                } else {
                    Some(&mut self.journal)
                };
                (Inner::Write(child), parent)
            }
            Some(Inner::Read(txn)) => (Inner::Snapshot(&*txn), None),
            Some(Inner::Snapshot(txn)) => (Inner::Snapshot(*txn), None),
            None => return Err(finished()),
        };

        tracing::trace!(depth, readonly, "began nested transaction");
        Ok(Transaction {
            store,
            inner: Some(inner),
            readonly,
            depth,
            error: None,
            rollback: false,
            journal: Journal::default(),
            inherited,
            parent,
            _lane: None,
        })
    }

    /// Run `work` in a child transaction, committing it unless `work` fails
    /// or requests a rollback
    pub fn run_nested<R, W>(&mut self, readonly: bool, work: W) -> Result<R>
    where
        W: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        let mut child = self.begin_nested(readonly)?;
        let outcome = work(&mut child);
        child.settle(outcome)
    }

    /// Drop the named database and everything in it
    ///
    /// Only an outermost transaction may drop: LMDB closes the handle at once,
    /// and an aborted child would leave its parent with a closed handle.
    pub fn drop_database(&mut self, name: &str) -> Result<()> {
        self.writer()?;
        if self.depth > 0 {
            return Err(LodeError::Config(
                "databases can only be dropped by an outermost transaction".into(),
            ));
        }
        if name == DEFAULT_DATABASE {
            return Err(LodeError::Config(format!(
                "{DEFAULT_DATABASE} cannot be dropped"
            )));
        }
        let handle = self
            .lookup(name)
            .ok_or_else(|| LodeError::DatabaseNotFound(name.to_string()))?;

        let txn = self.writer()?;
        // SAFETY: the writable lane is held and the handle is not used again
        // by this transaction once it is staged as dropped
        let dropped = unsafe { txn.drop_db(handle.db) };
        dropped.map_err(|e| self.record(e))?;

        self.journal
            .handles
            .push(HandleChange::Dropped(name.to_string()));
        self.mark_mutated(name);
        tracing::debug!(name, "dropped database");
        Ok(())
    }

    /// Commit the transaction
    ///
    /// Aborts instead and returns the recorded error if the error slot is set.
    /// A readonly child of a writable transaction is discarded.
    pub fn commit(mut self) -> Result<()> {
        let Some(inner) = self.inner.take() else {
            return Err(finished());
        };

        if let Some(err) = self.error.take() {
            drop(inner);
            tracing::debug!(error = %err, depth = self.depth, "aborting transaction with recorded error");
            if err.is_size_limit() {
                self.report_size_limit(err.kind());
            }
            return Err(err);
        }

        let txn = match inner {
            Inner::Write(txn) if !self.readonly => txn,
            Inner::Read(txn) => return txn.commit().map_err(engine),
            _ => return Ok(()),
        };

        let start = Instant::now();
        let result = txn.commit();
        observe::record_commit(start.elapsed(), result.is_ok());

        match result {
            Ok(()) => {
                self.finish();
                Ok(())
            }
            Err(e) => {
                let err = commit_error(e);
                tracing::warn!(error = %err, depth = self.depth, "commit failed");
                if err.is_size_limit() {
                    self.report_size_limit(err.kind());
                }
                Err(err)
            }
        }
    }

    /// Abort the transaction, discarding its changes
    pub fn abort(mut self) {
        if self.inner.take().is_some() {
            tracing::trace!(depth = self.depth, "transaction aborted");
        }
    }

    /// Finish according to what the work returned
    pub(crate) fn settle<R>(self, outcome: Result<R>) -> Result<R> {
        match outcome {
            Ok(value) if self.rollback => {
                self.abort();
                Ok(value)
            }
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                let recorded = self
                    .error
                    .as_ref()
                    .filter(|e| e.is_size_limit())
                    .map(LodeError::kind);
                if let Some(kind) = recorded {
                    self.report_size_limit(kind);
                }
                self.abort();
                Err(err)
            }
        }
    }

    fn finish(&mut self) {
        let journal = std::mem::take(&mut self.journal);
        match self.parent.as_mut() {
            Some(parent) => parent.absorb(journal),
            None => {
                self.store.publish(journal.handles);
                if !journal.mutated.is_empty() {
                    self.store.notifier.emit(Notification::Committed {
                        environment: self.store.path.clone(),
                        databases: journal.mutated,
                    });
                }
            }
        }
    }

    fn report_size_limit(&self, kind: ErrorKind) {
        tracing::warn!(
            path = %self.store.path.display(),
            ?kind,
            "environment size limit reached"
        );
        observe::record_size_limit();
        self.store.notifier.emit(Notification::SizeLimitReached {
            environment: self.store.path.clone(),
            kind,
        });
    }

    /// Keep the first engine error and return it mapped
    pub(crate) fn record(&mut self, err: lmdb::Error) -> LodeError {
        self.set_error(engine(err));
        engine(err)
    }

    pub(crate) fn mark_mutated(&mut self, name: &str) {
        if !self.journal.mutated.contains(name) {
            self.journal.mutated.insert(name.to_string());
        }
    }

    pub(crate) fn writer(&mut self) -> Result<&mut RwTransaction<'env>> {
        match self.inner.as_mut() {
            Some(Inner::Write(txn)) if !self.readonly => Ok(txn),
            Some(_) => Err(LodeError::WriteOnReadOnly),
            None => Err(finished()),
        }
    }

    pub(crate) fn get_raw(&self, db: lmdb::Database, key: &[u8]) -> Result<Option<&[u8]>> {
        if key.is_empty() {
            return self.inner.as_ref().map(|_| None).ok_or_else(finished);
        }
        let found = match self.inner.as_ref() {
            Some(Inner::Read(txn)) => txn.get(db, &key),
            Some(Inner::Write(txn)) => txn.get(db, &key),
            Some(Inner::Snapshot(txn)) => txn.get(db, &key),
            None => return Err(finished()),
        };
        match found {
            Ok(bytes) => Ok(Some(bytes)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(engine(e)),
        }
    }

    pub(crate) fn cursor(&self, db: lmdb::Database) -> Result<RoCursor<'_>> {
        let cursor = match self.inner.as_ref() {
            Some(Inner::Read(txn)) => txn.open_ro_cursor(db),
            Some(Inner::Write(txn)) => txn.open_ro_cursor(db),
            Some(Inner::Snapshot(txn)) => txn.open_ro_cursor(db),
            None => return Err(finished()),
        };
        cursor.map_err(engine)
    }

    fn lookup(&self, name: &str) -> Option<DbHandle> {
        let staged = self
            .journal
            .handles
            .iter()
            .rev()
            .chain(self.inherited.iter().rev())
            .find_map(|change| match change {
                HandleChange::Created(n, handle) if n == name => Some(Some(*handle)),
                HandleChange::Dropped(n) if n == name => Some(None),
                _ => None,
            });
        match staged {
            Some(found) => found,
            None => self.store.handle(name),
        }
    }

    /// Reject cached handles for databases created after this snapshot began
    fn visible(&self, name: &str, handle: DbHandle) -> Result<DbHandle> {
        let flags = match self.inner.as_ref() {
            Some(Inner::Read(txn)) => txn.db_flags(handle.db),
            Some(Inner::Snapshot(txn)) => txn.db_flags(handle.db),
            Some(Inner::Write(_)) => return Ok(handle),
            None => return Err(finished()),
        };
        match flags {
            Ok(_) => Ok(handle),
            Err(e) if unknown_handle(&e) => Err(LodeError::DatabaseNotFound(name.to_string())),
            Err(e) => Err(engine(e)),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<DbHandle> {
        if let Some(handle) = self.lookup(name) {
            return self.visible(name, handle);
        }

        let created = match self.inner.as_ref() {
            Some(Inner::Write(txn)) if !self.readonly => {
                // SAFETY: the writable lane is held, so no other transaction
                // opens or closes database handles concurrently
                unsafe { txn.create_db(Some(name), DatabaseFlags::empty()) }
            }
            _ => return Err(LodeError::DatabaseNotFound(name.to_string())),
        };
        let db = created.map_err(|e| self.record(e))?;

        let handle = DbHandle {
            db,
            dup_sort: false,
        };
        self.journal
            .handles
            .push(HandleChange::Created(name.to_string(), handle));
        tracing::debug!(name, "created database");
        Ok(handle)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if matches!(inner, Inner::Write(_)) && !self.readonly {
                tracing::debug!(depth = self.depth, "writable transaction dropped without commit; aborting");
            }
        }

        // Anything still journaled here was not committed. The lane is
        // still held, since the guard is dropped after this body.
        if self.depth == 0 {
            for change in self.journal.handles.drain(..) {
                if let HandleChange::Dropped(name) = change {
                    self.store.restore(&name);
                }
            }
        }
    }
}

fn finished() -> LodeError {
    LodeError::Unknown("transaction already finished".into())
}
