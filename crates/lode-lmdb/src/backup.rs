use lmdb_sys as ffi;
use lode_core::{LodeError, Result};
use std::ffi::CString;
use std::path::Path;

use crate::error::engine;
use crate::store::Store;

/// Hot-copy the environment into `dir` with `mdb_env_copy`
///
/// The copy is taken from a read snapshot, so it is consistent even while
/// writers keep committing. `dir` is created if needed and must not already
/// hold a data file.
pub(crate) fn copy_to(store: &Store, dir: &Path) -> Result<u64> {
    std::fs::create_dir_all(dir)?;

    let target = dir.join("data.mdb");
    if target.exists() {
        return Err(LodeError::Config(format!(
            "{} already contains an LMDB data file",
            dir.display()
        )));
    }

    let path = dir
        .to_str()
        .ok_or_else(|| LodeError::Config(format!("copy path is not UTF-8: {}", dir.display())))?;
    let path = CString::new(path)
        .map_err(|_| LodeError::Config("copy path contains a NUL byte".into()))?;

    // SAFETY: the environment handle stays open for the lifetime of `store`
    // and `path` is a valid NUL-terminated string
    let rc = unsafe { ffi::mdb_env_copy(store.env.env(), path.as_ptr()) };
    if rc != 0 {
        return Err(engine(lmdb::Error::from_err_code(rc)));
    }

    let size_bytes = std::fs::metadata(&target)?.len();
    tracing::info!(
        from = %store.path().display(),
        to = %dir.display(),
        size_bytes,
        "environment copied"
    );
    Ok(size_bytes)
}
