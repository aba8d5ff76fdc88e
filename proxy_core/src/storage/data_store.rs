use std::{path::PathBuf, sync::Arc};

use serde_json::Value;

use super::{
    kv::{JsonFileStore, KeyValueStore},
    StorageError,
};

/// File name of the public key-value database inside `databases/`.
pub const PUBLIC_STORE_NAME: &str = "config.json";

/// Keys used in the public store.
pub mod key {
    pub const PROFILE_ID: &str = "profileId";
    pub const DIRECT_BOOT_AWARE: &str = "directBootAware";
    pub const SUBSCRIPTION_AUTO_UPDATE: &str = "subscriptionAutoUpdate";
    pub const TCP_FAST_OPEN: &str = "tcp_fastopen";
    pub const ASSET_UPDATE_TIME: &str = "assetUpdateTime";
}

/// Typed accessors over the public key-value store.
#[derive(Clone)]
pub struct DataStore {
    store: Arc<dyn KeyValueStore>,
}

impl DataStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Open (or create) a JSON-backed store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(JsonFileStore::open(path)?)))
    }

    pub fn raw(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Id of the active profile; `0` when nothing was ever selected.
    pub fn profile_id(&self) -> i64 {
        self.get_i64(key::PROFILE_ID).unwrap_or(0)
    }

    pub fn set_profile_id(&self, id: i64) -> Result<(), StorageError> {
        self.store.put(key::PROFILE_ID, Value::from(id))
    }

    pub fn direct_boot_aware(&self) -> bool {
        self.get_bool(key::DIRECT_BOOT_AWARE).unwrap_or(false)
    }

    pub fn set_direct_boot_aware(&self, enabled: bool) -> Result<(), StorageError> {
        self.store.put(key::DIRECT_BOOT_AWARE, Value::from(enabled))
    }

    pub fn subscription_auto_update(&self) -> bool {
        self.get_bool(key::SUBSCRIPTION_AUTO_UPDATE).unwrap_or(false)
    }

    pub fn set_subscription_auto_update(&self, enabled: bool) -> Result<(), StorageError> {
        self.store.put(key::SUBSCRIPTION_AUTO_UPDATE, Value::from(enabled))
    }

    pub fn tcp_fast_open(&self) -> bool {
        self.get_bool(key::TCP_FAST_OPEN).unwrap_or(false)
    }

    pub fn set_tcp_fast_open(&self, enabled: bool) -> Result<(), StorageError> {
        self.store.put(key::TCP_FAST_OPEN, Value::from(enabled))
    }

    /// Package timestamp recorded after the last complete asset copy.
    pub fn asset_update_time(&self) -> Option<i64> {
        self.get_i64(key::ASSET_UPDATE_TIME)
    }

    pub fn set_asset_update_time(&self, time: i64) -> Result<(), StorageError> {
        self.store.put(key::ASSET_UPDATE_TIME, Value::from(time))
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.store.get(key).and_then(|v| v.as_i64())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.store.get(key).and_then(|v| v.as_bool())
    }
}
