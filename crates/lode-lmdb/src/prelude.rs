//! Commonly used types and traits
//!
//! ```
//! use lode_lmdb::prelude::*;
//! ```

pub use crate::{Database, Environment, Transaction, UnboundDatabase};

pub use lode_core::{
    DatabaseOps, Entry, EnvironmentConfig, ErrorKind, Include, LodeError, Notification, Result,
    SyncMode, DEFAULT_DATABASE,
};

pub use std::ops::ControlFlow;
