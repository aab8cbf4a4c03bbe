//! JSON file persistence shared by the stores.
//!
//! Writes go to a temporary file in the target directory which is then
//! renamed over the destination, so a crash mid-write leaves either the old
//! file or the new one, never a truncated mix.

use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use vaultsort_core::{Error, Result};

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)?;
    debug!(path = %path.display(), "State file written");
    Ok(())
}

/// Atomically replace `path` with raw bytes.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Read a JSON state file.
///
/// Returns `Ok(None)` when the file does not exist and
/// `Err(Error::LedgerCorruption)` when it exists but cannot be decoded.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::LedgerCorruption(format!("{}: {}", path.display(), e)))
}

/// Read a JSON state file, treating corruption as a cold start.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> Result<T> {
    match read_json(path) {
        Ok(Some(v)) => Ok(v),
        Ok(None) => {
            debug!(path = %path.display(), "No {} file, starting empty", what);
            Ok(T::default())
        }
        Err(Error::LedgerCorruption(msg)) => {
            warn!(
                path = %path.display(),
                error = %msg,
                "Corrupted {} file, starting empty",
                what
            );
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
///
/// Store state stays structurally valid across a panic (every mutation is a
/// single map operation), so continuing with the inner value is safe.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
