//! Deterministic **in‑process stand‑ins** for everything `AppContext::init`
//! asks the host for.
//!
//! *  Storage roots live in a fresh temp dir per [`Harness`].
//! *  Calling [`Harness::init`] twice on the same harness simulates a process
//!    restart: same disks, new context.
//! *  Every fake records what the core did to it so tests can assert on it.

use std::{
    io::{self, Cursor, Read},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use log::LevelFilter;
use proxy_core::{
    lifecycle::{
        assets::{AssetSource, ACL_ASSET_DIR},
        notifications::ChannelRegistry,
        service::{self, ServiceCommand},
        subscription::SubscriptionSyncer,
    },
    platform::{DeviceCapabilities, NetworkTweaks, PlatformError},
    storage::selector::StorageRoots,
    AppContext, CoreConfig, PackageInfo, Platform,
};
use tempfile::TempDir;
use tokio::{runtime::Handle, sync::mpsc::UnboundedReceiver};

/// Logs appear only with `-- --nocapture` or when a test fails.
pub fn init_test_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub struct FakeCapabilities {
    pub pre_unlock_storage: bool,
    pub encrypted: bool,
    pub unlocked: AtomicBool,
}

impl FakeCapabilities {
    /// A desktop-like host: no pre-unlock storage, no encryption.
    pub fn plain() -> Self {
        Self {
            pre_unlock_storage: false,
            encrypted: false,
            unlocked: AtomicBool::new(true),
        }
    }

    /// File-based encryption with the user still locked out.
    pub fn encrypted_locked() -> Self {
        Self {
            pre_unlock_storage: true,
            encrypted: true,
            unlocked: AtomicBool::new(false),
        }
    }

    pub fn set_unlocked(&self, unlocked: bool) {
        self.unlocked.store(unlocked, Ordering::SeqCst);
    }
}

impl DeviceCapabilities for FakeCapabilities {
    fn supports_pre_unlock_storage(&self) -> bool {
        self.pre_unlock_storage
    }

    fn is_device_encrypted(&self) -> bool {
        self.encrypted
    }

    fn is_user_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    pub enabled: AtomicBool,
    pub refuse: AtomicBool,
    pub enable_calls: AtomicUsize,
}

impl NetworkTweaks for FakeNetwork {
    fn tcp_fast_open_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn enable_tcp_fast_open(&self) -> Result<(), PlatformError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "not root").into());
        }
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// An in-memory asset bundle that can be told to fail on one file.
pub struct ScriptedAssets {
    files: Vec<(String, String)>,
    pub fail_on: Mutex<Option<String>>,
    pub opened: AtomicUsize,
}

impl ScriptedAssets {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, body)| (name.to_string(), body.to_string()))
                .collect(),
            fail_on: Mutex::new(None),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(&self, name: Option<&str>) {
        *self.fail_on.lock().unwrap() = name.map(str::to_owned);
    }
}

impl AssetSource for ScriptedAssets {
    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        if dir != ACL_ASSET_DIR {
            return Err(io::Error::new(io::ErrorKind::NotFound, dir.to_owned()));
        }
        Ok(self.files.iter().map(|(name, _)| name.clone()).collect())
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let name = path.trim_start_matches(&format!("{ACL_ASSET_DIR}/")).to_owned();
        if self.fail_on.lock().unwrap().as_deref() == Some(name.as_str()) {
            return Err(io::Error::new(io::ErrorKind::Other, "forced failure"));
        }
        let body = self
            .files
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_owned()))?;
        Ok(Box::new(Cursor::new(body.into_bytes())))
    }
}

/// Counts syncs and accepts exactly one built-in URL.
#[derive(Default)]
pub struct CountingSyncer {
    pub syncs: AtomicUsize,
    pub accepted_url: Option<String>,
    pub offered: Mutex<Vec<String>>,
}

impl SubscriptionSyncer for CountingSyncer {
    fn sync_all(&self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn add_builtin(&self, url: &str) -> bool {
        self.offered.lock().unwrap().push(url.to_owned());
        self.accepted_url.as_deref() == Some(url)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub caps: Arc<FakeCapabilities>,
    pub network: Arc<FakeNetwork>,
    pub notifications: Arc<ChannelRegistry>,
    pub assets: Arc<ScriptedAssets>,
    pub syncer: Arc<CountingSyncer>,
    pub package_time: i64,
    pub builtin_urls: Vec<String>,
}

impl Harness {
    pub fn new(caps: FakeCapabilities) -> Self {
        init_test_logging();
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            caps: Arc::new(caps),
            network: Arc::new(FakeNetwork::default()),
            notifications: Arc::new(ChannelRegistry::new()),
            assets: Arc::new(ScriptedAssets::new(&[
                ("bypass-lan.acl", "[bypass_all]\n"),
                ("gfwlist.acl", "[proxy_all]\n"),
            ])),
            syncer: Arc::new(CountingSyncer::default()),
            package_time: 1_000,
            builtin_urls: Vec::new(),
        }
    }

    pub fn roots(&self) -> StorageRoots {
        StorageRoots::new(self.dir.path().join("ce"), self.dir.path().join("de"))
    }

    pub fn platform(&self) -> Platform {
        Platform {
            capabilities: self.caps.clone(),
            network: self.network.clone(),
            notifications: self.notifications.clone(),
            assets: self.assets.clone(),
            subscriptions: self.syncer.clone(),
        }
    }

    pub fn config(&self) -> CoreConfig {
        let mut config = CoreConfig::new(
            self.roots(),
            PackageInfo {
                last_update_time: self.package_time,
            },
        );
        config.builtin_subscription_urls = self.builtin_urls.clone();
        config
    }

    /// Start a "process". Must run inside a tokio runtime.
    pub fn init(&self) -> (AppContext, UnboundedReceiver<ServiceCommand>) {
        let (control, commands) = service::channel();
        let context = AppContext::init(self.config(), self.platform(), control, Handle::current())
            .expect("init should succeed");
        (context, commands)
    }
}
