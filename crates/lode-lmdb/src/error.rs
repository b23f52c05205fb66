//! Mapping from LMDB result codes onto [`LodeError`]

use lode_core::LodeError;

/// Map an error raised by a read, write or open call
pub(crate) fn engine(err: lmdb::Error) -> LodeError {
    match err {
        lmdb::Error::MapFull => LodeError::DatabaseFull,
        lmdb::Error::TxnFull => LodeError::TransactionFull,
        other => LodeError::Unknown(other.to_string()),
    }
}

/// Map an error raised by `mdb_txn_commit`
pub(crate) fn commit(err: lmdb::Error) -> LodeError {
    match err {
        lmdb::Error::MapFull => LodeError::DatabaseFull,
        lmdb::Error::TxnFull => LodeError::TransactionFull,
        other => LodeError::CommitFailed(other.to_string()),
    }
}

/// Whether LMDB rejected a database handle the transaction cannot see
///
/// Readers whose snapshot predates `mdb_dbi_open` get `EINVAL` for the handle.
pub(crate) fn unknown_handle(err: &lmdb::Error) -> bool {
    match err {
        lmdb::Error::Other(code) => {
            std::io::Error::from_raw_os_error(*code).kind() == std::io::ErrorKind::InvalidInput
        }
        _ => false,
    }
}
