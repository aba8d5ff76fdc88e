use std::{
    fs, io,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{data_store::PUBLIC_STORE_NAME, DATABASES_DIR};
use crate::platform::DeviceCapabilities;

/// The two candidate storage roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRoots {
    /// Ordinary storage, only readable once the user has unlocked.
    pub default_root: PathBuf,
    /// Device-protected storage, readable before unlock.
    pub device_root: PathBuf,
}

impl StorageRoots {
    pub fn new(default_root: impl Into<PathBuf>, device_root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: default_root.into(),
            device_root: device_root.into(),
        }
    }

    /// `~/.local/share/proxy_rs` (+ `device_protected` under the local data
    /// dir) on Linux, `%APPDATA%\proxy_rs\data` on Windows, etc.
    pub fn from_project_dirs() -> io::Result<Self> {
        let proj = ProjectDirs::from("", "", "proxy_rs")
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Unable to locate data dir"))?;
        Ok(Self::new(
            proj.data_dir(),
            proj.data_local_dir().join("device_protected"),
        ))
    }
}

/// The storage root everything else reads and writes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHandle {
    root: PathBuf,
    credential_root: PathBuf,
    device_protected: bool,
}

impl StorageHandle {
    /// Where flags, snapshots and assets live.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ordinary storage; profile records always stay here.
    pub fn credential_root(&self) -> &Path {
        &self.credential_root
    }

    pub fn is_device_protected(&self) -> bool {
        self.device_protected
    }

    pub fn public_store_path(&self) -> PathBuf {
        self.root.join(DATABASES_DIR).join(PUBLIC_STORE_NAME)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.credential_root.join(DATABASES_DIR).join("profiles")
    }

    /// Files that are regenerated from the package and never backed up.
    pub fn no_backup_dir(&self) -> PathBuf {
        self.root.join("no_backup")
    }

    pub fn direct_boot_dir(&self) -> PathBuf {
        self.root.join("direct_boot")
    }

    /// Move database `name` over from `legacy_root` unless it is already
    /// here. Returns whether a move happened; failures are logged only.
    pub fn move_database_from(&self, legacy_root: &Path, name: &str) -> bool {
        let source = legacy_root.join(DATABASES_DIR).join(name);
        let target = self.root.join(DATABASES_DIR).join(name);
        if source == target || !source.exists() {
            return false;
        }
        if target.exists() {
            debug!("{:?} already present in {:?}; leaving legacy copy", name, self.root);
            return false;
        }
        match move_path(&source, &target) {
            Ok(()) => {
                info!("Migrated {:?} to {:?}", source, target);
                true
            }
            Err(e) => {
                warn!("Failed to migrate {:?} to {:?}: {e}", source, target);
                false
            }
        }
    }
}

/// Picks the storage root from the platform's capabilities.
pub struct StorageSelector<'a> {
    capabilities: &'a dyn DeviceCapabilities,
}

impl<'a> StorageSelector<'a> {
    pub fn new(capabilities: &'a dyn DeviceCapabilities) -> Self {
        Self { capabilities }
    }

    /// Resolve the root, migrating the public store out of the default
    /// root the first time device-protected storage is used.
    pub fn resolve(&self, roots: &StorageRoots) -> StorageHandle {
        if !self.capabilities.supports_pre_unlock_storage() {
            debug!("No pre-unlock storage; using {:?}", roots.default_root);
            return StorageHandle {
                root: roots.default_root.clone(),
                credential_root: roots.default_root.clone(),
                device_protected: false,
            };
        }
        let handle = StorageHandle {
            root: roots.device_root.clone(),
            credential_root: roots.default_root.clone(),
            device_protected: true,
        };
        handle.move_database_from(&roots.default_root, PUBLIC_STORE_NAME);
        handle
    }
}

/// Rename, falling back to copy + remove only across filesystems.
fn move_path(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            copy_into_place(source, target)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

/// Copy next to `target`, then rename over it. `target` only ever
/// appears complete; a failed copy leaves no trace.
fn copy_into_place(source: &Path, target: &Path) -> io::Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = target.with_file_name(format!(".{file_name}.tmp"));
    let copied = fs::copy(source, &tmp).and_then(|_| fs::rename(&tmp, target));
    if copied.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    copied.map(|_| ())
}
