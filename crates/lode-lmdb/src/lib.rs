//! LMDB-backed transactional access layer
//!
//! Key features:
//! - Environments opened on demand with configurable map size and database limit
//! - Readonly transactions that run concurrently with one serialized writer
//! - Nested transactions with an error slot that turns commit into abort
//! - Background work queue with completion callbacks and an active count
//! - Bound and unbound database proxies with sorted-set operations
//! - Commit and size-limit notifications
//! - Hot copy via `mdb_env_copy`

mod backup;
mod cursor;
pub mod database;
pub mod environment;
mod error;
pub mod prelude;
mod scheduler;
mod store;
pub mod txn;
pub mod unbound;

pub use database::Database;
pub use environment::Environment;
pub use txn::Transaction;
pub use unbound::UnboundDatabase;

pub use lode_core::{
    DatabaseOps, Entry, EnvironmentConfig, ErrorKind, Include, LodeError, Notification, Result,
    SyncMode, DEFAULT_DATABASE,
};
