//! Host-side settings for the command-line front-end.
//!
//! A desktop host has no encryption or lock-state APIs, so the answers
//! the core asks for are read from a small JSON file instead:
//!
//! ```json
//! {
//!   "device": { "pre_unlock_storage": true, "encrypted": true, "unlocked": false },
//!   "asset_dir": "/usr/share/proxy-rs/assets",
//!   "builtin_subscription_urls": ["https://example.org/servers.json"]
//! }
//! ```
//!
//! Every field is optional; a missing file means all defaults.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use directories::ProjectDirs;
use log::{debug, warn};
use proxy_core::{
    lifecycle::{
        assets::DirAssetSource, errors::CoreError, notifications::ChannelRegistry,
        subscription::NoopSyncer,
    },
    platform::{ProcTcpFastOpen, StaticCapabilities},
    storage::selector::StorageRoots,
    CoreConfig, PackageInfo, Platform,
};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Overrides the per-user data directories.
    pub storage: Option<StorageRoots>,
    /// Directory holding the `acl/` bundle; defaults to `assets/` next to
    /// the executable.
    pub asset_dir: Option<PathBuf>,
    /// Package timestamp in ms; defaults to the executable's mtime.
    pub package_update_time: Option<i64>,
    pub subscription_sync_period_secs: Option<u64>,
    pub builtin_subscription_urls: Vec<String>,
    pub tcp_fastopen_path: Option<PathBuf>,
    pub device: StaticCapabilities,
}

impl Settings {
    /// `~/.config/proxy_rs/settings.json` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "proxy_rs").map(|proj| proj.config_dir().join(SETTINGS_FILE))
    }

    /// Load settings from `path`, or the default location when `None`.
    /// A file that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No settings at {:?}; using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    pub fn core_config(&self) -> Result<CoreConfig, CoreError> {
        let storage = match &self.storage {
            Some(roots) => roots.clone(),
            None => StorageRoots::from_project_dirs()?,
        };
        let package = PackageInfo {
            last_update_time: self.package_update_time.unwrap_or_else(executable_mtime),
        };
        let mut config = CoreConfig::new(storage, package);
        if let Some(secs) = self.subscription_sync_period_secs {
            config.subscription_sync_period_secs = secs;
        }
        config.builtin_subscription_urls = self.builtin_subscription_urls.clone();
        Ok(config)
    }

    pub fn platform(&self) -> Platform {
        let network = match &self.tcp_fastopen_path {
            Some(path) => ProcTcpFastOpen::with_path(path),
            None => ProcTcpFastOpen::new(),
        };
        Platform {
            capabilities: Arc::new(self.device),
            network: Arc::new(network),
            notifications: Arc::new(ChannelRegistry::new()),
            assets: Arc::new(DirAssetSource::new(self.asset_dir())),
            subscriptions: Arc::new(NoopSyncer),
        }
    }

    fn asset_dir(&self) -> PathBuf {
        if let Some(dir) = &self.asset_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("assets")))
            .unwrap_or_else(|| PathBuf::from("assets"))
    }
}

/// Modification time of the running binary in ms, standing in for the
/// package install time. `0` when it cannot be determined.
fn executable_mtime() -> i64 {
    let modified = std::env::current_exe()
        .and_then(fs::metadata)
        .and_then(|meta| meta.modified());
    match modified {
        Ok(time) => time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
        Err(e) => {
            warn!("Cannot read executable timestamp: {e}");
            0
        }
    }
}
