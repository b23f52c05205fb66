use crate::error::{LodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the database that always exists once an environment is open
pub const DEFAULT_DATABASE: &str = "__default__";

/// Configuration for an LMDB environment and its transaction scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Directory holding `data.mdb` and `lock.mdb`
    pub path: PathBuf,

    /// Maximum map size for LMDB (in bytes)
    /// Default: 1GB
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Maximum number of named databases, `__default__` included
    /// Default: 32
    #[serde(default = "default_max_databases")]
    pub max_databases: u32,

    /// Maximum number of concurrent readers (LMDB specific)
    /// Default: 126
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    /// Sync mode for durability
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Worker threads serving background readonly transactions (default: 4)
    ///
    /// Writable background work always runs on a single dedicated worker.
    #[serde(default = "default_reader_threads")]
    pub reader_threads: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Full durability – calls `fsync()` on every commit.
    Full,

    /// Skips syncing the LMDB meta-page on each commit (default).
    ///
    /// Data pages are still synced. After an OS crash the last transaction
    /// _may_ be lost, but the database stays consistent.
    #[default]
    NoMetaSync,

    /// Disables `fsync()` entirely – the OS page cache decides when to flush.
    ///
    /// **WARNING**: no durability beyond the process lifetime. Only use this
    /// for ephemeral or test workloads.
    NoSync,
}

fn default_map_size() -> usize {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_databases() -> u32 {
    32
}

fn default_max_readers() -> u32 {
    126
}

fn default_reader_threads() -> usize {
    4
}

impl EnvironmentConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size: default_map_size(),
            max_databases: default_max_databases(),
            max_readers: default_max_readers(),
            sync_mode: SyncMode::default(),
            reader_threads: default_reader_threads(),
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_max_databases(mut self, max_databases: u32) -> Self {
        self.max_databases = max_databases;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Set the number of background reader workers
    pub fn with_reader_threads(mut self, reader_threads: usize) -> Self {
        self.reader_threads = reader_threads;
        self
    }

    /// Reject settings LMDB or the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.map_size == 0 {
            return Err(LodeError::Config("map_size must be positive".into()));
        }
        // __default__ occupies one slot
        if self.max_databases == 0 {
            return Err(LodeError::Config("max_databases must be at least 1".into()));
        }
        if self.max_readers == 0 {
            return Err(LodeError::Config("max_readers must be positive".into()));
        }
        if self.reader_threads == 0 {
            return Err(LodeError::Config("reader_threads must be positive".into()));
        }
        Ok(())
    }
}
