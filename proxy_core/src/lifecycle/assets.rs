//! Copies bundled rule lists into writable storage after install/update.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use log::{debug, error, info, warn};

use crate::storage::data_store::DataStore;

/// Logical directory of the bundled ACL rule lists.
pub const ACL_ASSET_DIR: &str = "acl";

/// A read-only, enumerable bundle of files.
pub trait AssetSource: Send + Sync {
    /// File names directly under `dir`.
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;
    /// Open `path` (`dir/name`) for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// Assets shipped as a plain directory next to the binary.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for DirAssetSource {
    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join(dir))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.root.join(path))?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSyncOutcome {
    /// Stored timestamp already matches the package.
    UpToDate,
    /// Every file was copied and the timestamp advanced.
    Complete { copied: usize },
    /// Some copies failed; the timestamp was left alone.
    Incomplete { copied: usize, failed: usize },
    /// The bundle could not be listed; nothing was copied.
    Unlisted,
}

/// Copy the ACL bundle into `dest` when the package changed since the last
/// complete copy. The timestamp only advances once every file made it, so
/// a partial copy is retried on the next start.
pub fn sync_assets(
    source: &dyn AssetSource,
    dest: &Path,
    data_store: &DataStore,
    package_time: i64,
) -> AssetSyncOutcome {
    if data_store.asset_update_time() == Some(package_time) {
        debug!("Assets up to date for package time {package_time}");
        return AssetSyncOutcome::UpToDate;
    }

    let files = match source.list(ACL_ASSET_DIR) {
        Ok(files) => files,
        Err(e) => {
            error!("Cannot list bundled assets: {e}");
            return AssetSyncOutcome::Unlisted;
        }
    };
    if let Err(e) = fs::create_dir_all(dest) {
        error!("Cannot create {:?}: {e}", dest);
        return AssetSyncOutcome::Incomplete {
            copied: 0,
            failed: files.len(),
        };
    }

    let mut copied = 0;
    let mut failed = 0;
    for file in &files {
        match copy_asset(source, &format!("{ACL_ASSET_DIR}/{file}"), &dest.join(file)) {
            Ok(bytes) => {
                debug!("Copied asset {file} ({bytes} bytes)");
                copied += 1;
            }
            Err(e) => {
                error!("Failed to copy asset {file}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        warn!("{failed} asset(s) failed to copy; will retry on next start");
        return AssetSyncOutcome::Incomplete { copied, failed };
    }

    if let Err(e) = data_store.set_asset_update_time(package_time) {
        error!("Copied assets but could not record package time: {e}");
    }
    info!("Synced {copied} asset(s) for package time {package_time}");
    AssetSyncOutcome::Complete { copied }
}

fn copy_asset(source: &dyn AssetSource, path: &str, target: &Path) -> io::Result<u64> {
    let mut input = source.open(path)?;
    let mut output = File::create(target)?;
    io::copy(&mut input, &mut output)
}
