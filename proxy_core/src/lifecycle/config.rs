use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use super::{errors::CoreError, subscription::DEFAULT_SYNC_PERIOD};
use crate::storage::selector::StorageRoots;

/// Identity of the installed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Last install/update time in milliseconds since the Unix epoch.
    pub last_update_time: i64,
}

/// Static process configuration handed to [`AppContext::init`](super::AppContext::init).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub storage: StorageRoots,
    pub package: PackageInfo,
    #[serde(default = "default_sync_period_secs")]
    pub subscription_sync_period_secs: u64,
    /// Tried in order by `update_builtin_servers` until one is accepted.
    #[serde(default)]
    pub builtin_subscription_urls: Vec<String>,
}

fn default_sync_period_secs() -> u64 {
    DEFAULT_SYNC_PERIOD.as_secs()
}

impl CoreConfig {
    pub fn new(storage: StorageRoots, package: PackageInfo) -> Self {
        Self {
            storage,
            package,
            subscription_sync_period_secs: default_sync_period_secs(),
            builtin_subscription_urls: Vec::new(),
        }
    }

    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    pub fn subscription_sync_period(&self) -> Duration {
        Duration::from_secs(self.subscription_sync_period_secs)
    }
}
