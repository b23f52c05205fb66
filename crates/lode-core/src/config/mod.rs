pub mod environment;

pub use environment::{EnvironmentConfig, SyncMode, DEFAULT_DATABASE};
