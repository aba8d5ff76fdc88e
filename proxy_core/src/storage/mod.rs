pub mod data_store;
pub mod errors;
pub mod kv;
pub mod profile;
pub mod profile_store;
pub mod selector;

pub use errors::StorageError;

use std::{fs, io, path::Path};

/// Directory (under a storage root) holding databases and key-value files.
pub const DATABASES_DIR: &str = "databases";

/// Replace `path` with `bytes` without ever exposing a half-written file:
/// write a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
