use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::runtime::Handle;

use super::{
    assets::{self, AssetSource, AssetSyncOutcome},
    config::{CoreConfig, PackageInfo},
    direct_boot::DirectBootMirror,
    errors::CoreError,
    notifications::{self, NotificationHost},
    service::ServiceControl,
    subscription::{self, SubscriptionSyncer},
    work::{JobScheduler, TaskExecutor, TokioExecutor},
};
use crate::{
    platform::{DeviceCapabilities, NetworkTweaks},
    storage::{
        data_store::DataStore,
        profile::{Profile, TrafficStats},
        profile_store::ProfileStore,
        selector::{StorageHandle, StorageSelector},
    },
    utils::logging::install_panic_logger,
};

/// The host-provided collaborators.
#[derive(Clone)]
pub struct Platform {
    pub capabilities: Arc<dyn DeviceCapabilities>,
    pub network: Arc<dyn NetworkTweaks>,
    pub notifications: Arc<dyn NotificationHost>,
    pub assets: Arc<dyn AssetSource>,
    pub subscriptions: Arc<dyn SubscriptionSyncer>,
}

/// Process-wide state of the proxy client.
///
/// Built exactly once by [`AppContext::init`] and passed by reference to
/// whatever needs it; every operation below therefore runs after the
/// startup sequence. Cloning is not offered: the context lives as long
/// as the process.
pub struct AppContext {
    storage: StorageHandle,
    data_store: DataStore,
    profiles: ProfileStore,
    direct_boot: DirectBootMirror,
    platform: Platform,
    executor: Arc<dyn TaskExecutor>,
    scheduler: JobScheduler,
    service: ServiceControl,
    package: PackageInfo,
    sync_period: Duration,
    builtin_subscription_urls: Vec<String>,
}

impl AppContext {
    /// Run the startup sequence and return the context.
    ///
    /// Every step is safe to repeat on the next start if the process dies
    /// half-way: migrations check before moving, scheduling is keyed, and
    /// the asset timestamp is written last.
    pub fn init(
        config: CoreConfig,
        platform: Platform,
        service: ServiceControl,
        runtime: Handle,
    ) -> Result<Self, CoreError> {
        info!("Initializing proxy core");

        // storage root + one-time public store migration
        let storage = StorageSelector::new(platform.capabilities.as_ref()).resolve(&config.storage);
        let data_store = DataStore::open(storage.public_store_path())?;
        let profiles = ProfileStore::open(storage.profiles_dir())?;

        install_panic_logger();

        let executor: Arc<dyn TaskExecutor> = Arc::new(TokioExecutor::new(runtime.clone()));
        let scheduler = JobScheduler::new(runtime, Arc::clone(&executor));

        let direct_boot = DirectBootMirror::new(
            &storage.direct_boot_dir(),
            Arc::clone(&platform.capabilities),
            data_store.direct_boot_aware(),
        );

        let context = Self {
            storage,
            data_store,
            profiles,
            direct_boot,
            platform,
            executor,
            scheduler,
            service,
            package: config.package,
            sync_period: config.subscription_sync_period(),
            builtin_subscription_urls: config.builtin_subscription_urls,
        };

        if context.data_store.subscription_auto_update() {
            context.schedule_subscription_sync();
        }

        // restored data or a crash may have left counters behind
        if context.direct_boot.is_enabled() && context.platform.capabilities.is_user_unlocked() {
            context.flush_direct_boot();
        }

        if context.data_store.tcp_fast_open() {
            context.apply_tcp_fast_open();
        }

        context.sync_assets();
        context.update_notification_channels();

        info!(
            "Proxy core ready (storage {:?}, direct boot {:?})",
            context.storage.root(),
            context.direct_boot.state()
        );
        Ok(context)
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn data_store(&self) -> &DataStore {
        &self.data_store
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn direct_boot(&self) -> &DirectBootMirror {
        &self.direct_boot
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn package(&self) -> PackageInfo {
        self.package
    }

    // ── profile selection ────────────────────────────────────────────────

    /// Ids whose traffic the networking service must track: the active
    /// profile and its live fallback, if any.
    pub fn active_profile_ids(&self) -> Vec<i64> {
        let Some(profile) = self.profiles.get_profile(self.data_store.profile_id()) else {
            return Vec::new();
        };
        match self.profiles.expand(profile) {
            (profile, Some(fallback)) => vec![profile.id, fallback.id],
            (profile, None) => vec![profile.id],
        }
    }

    /// The active profile and its UDP fallback. While the device is locked
    /// the direct-boot snapshot answers instead of the profile store.
    pub fn current_profile(&self) -> Option<(Profile, Option<Profile>)> {
        if self.serving_from_snapshot() {
            if let Some(pair) = self.direct_boot.device_profile() {
                return Some(pair);
            }
        }
        let profile = self.profiles.get_profile(self.data_store.profile_id())?;
        Some(self.profiles.expand(profile))
    }

    /// Make `id` active. An unknown id gets a brand-new default profile,
    /// which becomes active instead; the result is always a live profile.
    pub fn switch_profile(&self, id: i64) -> Result<Profile, CoreError> {
        let profile = match self.profiles.get_profile(id) {
            Some(profile) => profile,
            None => {
                info!("Profile {id} does not exist; creating a default profile");
                self.profiles.create_profile(None)?
            }
        };
        self.data_store.set_profile_id(profile.id)?;
        info!("Switched to profile {} ({})", profile.id, profile.display_name());
        self.refresh_direct_boot();
        Ok(profile)
    }

    pub fn create_profile(&self, template: Option<&Profile>) -> Result<Profile, CoreError> {
        Ok(self.profiles.create_profile(template)?)
    }

    pub fn update_profile(&self, profile: &Profile) -> Result<(), CoreError> {
        self.profiles.update_profile(profile)?;
        if self.active_profile_ids().contains(&profile.id) {
            self.refresh_direct_boot();
        }
        Ok(())
    }

    /// Delete a profile. Deleting the active one selects the first
    /// remaining profile, or a new default profile when none is left.
    pub fn delete_profile(&self, id: i64) -> Result<bool, CoreError> {
        let was_active = self.data_store.profile_id() == id;
        if !self.profiles.delete_profile(id)? {
            return Ok(false);
        }
        if was_active {
            let next = self
                .profiles
                .list_profiles()?
                .first()
                .map(|p| p.id)
                .unwrap_or(0);
            self.switch_profile(next)?;
        } else {
            self.refresh_direct_boot();
        }
        Ok(true)
    }

    /// Account traffic for a profile: into the snapshot while it is being
    /// served, into the profile store otherwise.
    pub fn record_traffic(&self, id: i64, stats: TrafficStats) -> Result<(), CoreError> {
        if self.serving_from_snapshot() && self.direct_boot.add_traffic(id, stats)? {
            return Ok(());
        }
        if !self.profiles.add_traffic(id, stats)? {
            debug!("Dropping traffic for unknown profile {id}");
        }
        Ok(())
    }

    // ── direct boot ──────────────────────────────────────────────────────

    /// Opt in or out of direct-boot awareness. Returns the resulting
    /// setting; enabling on an unsupported platform leaves it off.
    pub fn set_direct_boot_aware(&self, enabled: bool) -> Result<bool, CoreError> {
        if enabled && !self.platform.capabilities.direct_boot_supported() {
            warn!("Direct boot is not supported on this device");
            return Ok(false);
        }
        self.data_store.set_direct_boot_aware(enabled)?;
        if enabled {
            self.direct_boot.arm();
            self.refresh_direct_boot();
        } else {
            self.direct_boot.disable()?;
        }
        Ok(enabled)
    }

    /// Merge snapshot traffic into the profile store, then mirror the
    /// current profile afresh for the next locked boot.
    pub fn flush_direct_boot(&self) {
        if let Err(e) = self.direct_boot.flush_traffic_stats(&self.profiles) {
            warn!("Failed to flush direct-boot traffic: {e}");
        }
        self.refresh_direct_boot();
    }

    fn serving_from_snapshot(&self) -> bool {
        self.direct_boot.is_enabled() && !self.platform.capabilities.is_user_unlocked()
    }

    fn refresh_direct_boot(&self) {
        if !self.direct_boot.is_enabled() {
            return;
        }
        let current = self
            .profiles
            .get_profile(self.data_store.profile_id())
            .map(|profile| self.profiles.expand(profile));
        if let Err(e) = self.direct_boot.update(current) {
            warn!("Failed to mirror profile for direct boot: {e}");
        }
    }

    // ── background work ──────────────────────────────────────────────────

    pub fn schedule_subscription_sync(&self) -> bool {
        subscription::schedule(
            &self.scheduler,
            Arc::clone(&self.platform.subscriptions),
            self.sync_period,
        )
    }

    pub fn set_subscription_auto_update(&self, enabled: bool) -> Result<(), CoreError> {
        self.data_store.set_subscription_auto_update(enabled)?;
        if enabled {
            self.schedule_subscription_sync();
        } else {
            subscription::cancel(&self.scheduler);
        }
        Ok(())
    }

    /// Offer the configured built-in subscriptions in the background.
    pub fn update_builtin_servers(&self) {
        let syncer = Arc::clone(&self.platform.subscriptions);
        let urls = self.builtin_subscription_urls.clone();
        self.executor.submit(Box::new(move || {
            if subscription::add_first_builtin(syncer.as_ref(), &urls).is_none() {
                warn!("No built-in subscription could be added");
            }
        }));
    }

    // ── startup helpers ──────────────────────────────────────────────────

    fn apply_tcp_fast_open(&self) {
        if self.platform.network.tcp_fast_open_enabled() {
            debug!("TCP Fast Open already enabled");
            return;
        }
        match self.platform.network.enable_tcp_fast_open() {
            Ok(()) => info!("Enabled TCP Fast Open"),
            Err(e) => warn!("Could not enable TCP Fast Open: {e}"),
        }
    }

    /// Copy bundled assets if the package changed since the last full copy.
    pub fn sync_assets(&self) -> AssetSyncOutcome {
        assets::sync_assets(
            self.platform.assets.as_ref(),
            &self.storage.no_backup_dir(),
            &self.data_store,
            self.package.last_update_time,
        )
    }

    pub fn update_notification_channels(&self) {
        notifications::update_notification_channels(self.platform.notifications.as_ref());
    }

    // ── service control ──────────────────────────────────────────────────

    pub fn start_service(&self) {
        self.service.start();
    }

    pub fn reload_service(&self) {
        self.service.reload();
    }

    pub fn stop_service(&self) {
        self.service.stop();
    }
}
