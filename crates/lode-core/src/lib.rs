//! Lode Core: types shared by the lode storage access layer
//!
//! This crate defines the engine-agnostic pieces:
//! - Error taxonomy (`LodeError`, `ErrorKind`)
//! - Environment configuration
//! - Commit and size-limit notifications
//! - `DatabaseOps`: the byte-oriented surface of a database proxy
//! - Optional metrics (`observe` feature)

pub mod config;
pub mod error;
pub mod notification;
pub mod observe;
pub mod traits;

pub use config::{EnvironmentConfig, SyncMode, DEFAULT_DATABASE};
pub use error::{ErrorKind, LodeError, Result};
pub use notification::{Notification, Notifier};
pub use traits::{DatabaseOps, Entry, Include};
