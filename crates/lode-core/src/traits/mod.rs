pub mod database;

pub use database::{DatabaseOps, Entry, Include};
