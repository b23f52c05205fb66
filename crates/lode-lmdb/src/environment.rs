//! Environment manager
//!
//! Owns the configuration, the LMDB environment once open, the scheduler
//! and the notifier.

use crossbeam::channel::Receiver;
use lode_core::{EnvironmentConfig, LodeError, Notification, Notifier, Result, DEFAULT_DATABASE};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backup;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::txn::Transaction;
use crate::unbound::UnboundDatabase;

struct Opened {
    // Dropped first: workers finish before the store goes away
    scheduler: Scheduler,
    store: Arc<Store>,
}

/// An LMDB environment and its transaction scheduler
///
/// # Example
///
/// ```no_run
/// use lode_lmdb::prelude::*;
///
/// # fn main() -> Result<()> {
/// let env = Environment::at("./data", true)?;
///
/// env.write(|txn| txn.db("users")?.set(b"alice", b"admin"))?;
///
/// let role = env.read(|txn| txn.db("users")?.get(b"alice"))?;
/// assert_eq!(role.as_deref(), Some(&b"admin"[..]));
/// # Ok(())
/// # }
/// ```
pub struct Environment {
    config: EnvironmentConfig,
    notifier: Arc<Notifier>,
    opened: Option<Opened>,
}

impl Environment {
    /// Create an environment, opening it immediately when `auto_start` is set
    pub fn new(config: EnvironmentConfig, auto_start: bool) -> Result<Self> {
        config.validate()?;
        let mut env = Self {
            config,
            notifier: Arc::new(Notifier::new()),
            opened: None,
        };
        if auto_start {
            env.open()?;
        }
        Ok(env)
    }

    /// Create an environment at `path` with default settings
    pub fn at<P: AsRef<Path>>(path: P, auto_start: bool) -> Result<Self> {
        Self::new(EnvironmentConfig::new(path.as_ref()), auto_start)
    }

    /// Open with the configured limits; a no-op if already open
    pub fn open(&mut self) -> Result<()> {
        self.open_with(None, None)
    }

    /// Open, overriding the map size and database limit
    ///
    /// Overrides are ignored if the environment is already open.
    pub fn open_with(&mut self, map_size: Option<usize>, max_databases: Option<u32>) -> Result<()> {
        if self.opened.is_some() {
            tracing::debug!(path = %self.config.path.display(), "environment already open");
            return Ok(());
        }

        let mut config = self.config.clone();
        if let Some(map_size) = map_size {
            config.map_size = map_size;
        }
        if let Some(max_databases) = max_databases {
            config.max_databases = max_databases;
        }
        config.validate()?;

        let store = Arc::new(Store::open(&config, self.notifier.clone())?);
        let scheduler = Scheduler::start(store.clone(), config.reader_threads)?;

        tracing::info!(
            path = %config.path.display(),
            map_size = config.map_size,
            max_databases = config.max_databases,
            "environment opened"
        );
        self.config = config;
        self.opened = Some(Opened { scheduler, store });
        Ok(())
    }

    /// Finish queued work, stop the workers and release the environment
    ///
    /// A no-op if the environment is not open. Borrowed transactions and
    /// proxies must be gone before this can be called.
    pub fn close(&mut self) {
        let Some(Opened { scheduler, store }) = self.opened.take() else {
            return;
        };
        scheduler.shutdown();
        if Arc::strong_count(&store) > 1 {
            tracing::warn!("environment store still shared after scheduler shutdown");
        }
        drop(store);
        tracing::info!(path = %self.config.path.display(), "environment closed");
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    pub fn path(&self) -> &PathBuf {
        &self.config.path
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Receive commit and size-limit notifications for this environment
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.notifier.subscribe()
    }

    fn store(&self) -> Result<&Store> {
        self.opened
            .as_ref()
            .map(|opened| opened.store.as_ref())
            .ok_or(LodeError::EnvironmentClosed)
    }

    /// Begin an outermost transaction on the calling thread
    ///
    /// A writable transaction waits for the writable lane, so a thread that
    /// already holds a writable transaction must use
    /// [`Transaction::begin_nested`] instead.
    pub fn begin(&self, readonly: bool) -> Result<Transaction<'_>> {
        Transaction::begin(self.store()?, readonly)
    }

    /// Run `work` in a readonly transaction
    pub fn read<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        let mut txn = self.begin(true)?;
        let outcome = work(&mut txn);
        txn.settle(outcome)
    }

    /// Run `work` in a writable transaction
    ///
    /// Commits when `work` returns `Ok` without requesting a rollback.
    pub fn write<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R>,
    {
        let mut txn = self.begin(false)?;
        let outcome = work(&mut txn);
        txn.settle(outcome)
    }

    /// Queue `work` for a background worker
    ///
    /// Writable work runs one item at a time in submission order. Readonly
    /// work runs concurrently on a pool of `reader_threads` workers; the
    /// queue is unbounded, so submission never blocks, but once every reader
    /// is busy further readonly items wait for the next free worker.
    /// `completion` runs on the worker with the outcome, or immediately with
    /// `EnvironmentClosed` if the environment is not open.
    pub fn submit<W, C>(&self, readonly: bool, work: W, completion: C)
    where
        W: FnOnce(&mut Transaction<'_>) -> Result<()> + Send + 'static,
        C: FnOnce(Result<()>) + Send + 'static,
    {
        match self.opened.as_ref() {
            Some(opened) => opened.scheduler.submit(readonly, work, completion),
            None => completion(Err(LodeError::EnvironmentClosed)),
        }
    }

    /// Submitted work items whose completion has not returned yet
    pub fn active_count(&self) -> usize {
        self.opened
            .as_ref()
            .map_or(0, |opened| opened.scheduler.active_count())
    }

    /// Block until every submitted work item has completed
    ///
    /// Must not be called from a work item or a completion.
    pub fn wait_idle(&self) {
        if let Some(opened) = self.opened.as_ref() {
            opened.scheduler.wait_idle();
        }
    }

    /// Open or create a named database
    ///
    /// `allow_duplicates` makes it a sorted-set database. Reopening an
    /// existing database with the other setting fails with `Config`.
    pub fn open_database(&self, name: &str, allow_duplicates: bool) -> Result<()> {
        self.store()?.open_database(name, allow_duplicates)?;
        Ok(())
    }

    /// Drop a named database in its own writable transaction
    pub fn drop_database(&self, name: &str) -> Result<()> {
        self.write(|txn| txn.drop_database(name))
    }

    /// Names of every open database, sorted
    pub fn databases(&self) -> Result<Vec<String>> {
        Ok(self.store()?.database_names())
    }

    /// A proxy that runs each call in its own transaction
    pub fn db(&self, name: &str) -> UnboundDatabase<'_> {
        UnboundDatabase::new(self, name)
    }

    pub fn default_db(&self) -> UnboundDatabase<'_> {
        self.db(DEFAULT_DATABASE)
    }

    /// Write a consistent copy of the environment into `dir`
    ///
    /// Runs alongside other transactions. Returns the size of the copied data
    /// file in bytes.
    pub fn copy_to<P: AsRef<Path>>(&self, dir: P) -> Result<u64> {
        backup::copy_to(self.store()?, dir.as_ref())
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}
