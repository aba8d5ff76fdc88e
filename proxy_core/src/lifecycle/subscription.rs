//! When and how often subscriptions are refreshed. Fetching and parsing
//! remote profile lists belongs to the [`SubscriptionSyncer`] implementor.

use std::{sync::Arc, time::Duration};

use log::{debug, info};

use super::work::JobScheduler;

/// Stable scheduler key of the periodic sync.
pub const SYNC_JOB_KEY: &str = "subscription-sync";

pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

pub trait SubscriptionSyncer: Send + Sync {
    /// Refresh every subscribed profile list.
    fn sync_all(&self);

    /// Register a built-in subscription; `true` once one is accepted.
    fn add_builtin(&self, url: &str) -> bool;
}

/// Register the periodic sync (no-op if it is already scheduled).
pub fn schedule(
    scheduler: &JobScheduler,
    syncer: Arc<dyn SubscriptionSyncer>,
    period: Duration,
) -> bool {
    scheduler.register_periodic(SYNC_JOB_KEY, period, Arc::new(move || syncer.sync_all()))
}

pub fn cancel(scheduler: &JobScheduler) -> bool {
    scheduler.cancel(SYNC_JOB_KEY)
}

/// Offer `urls` in order and stop at the first one accepted.
pub fn add_first_builtin(syncer: &dyn SubscriptionSyncer, urls: &[String]) -> Option<String> {
    for url in urls {
        if syncer.add_builtin(url) {
            info!("Added built-in subscription {url}");
            return Some(url.clone());
        }
        debug!("Built-in subscription {url} rejected");
    }
    None
}

/// Syncer for hosts without subscription support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSyncer;

impl SubscriptionSyncer for NoopSyncer {
    fn sync_all(&self) {
        debug!("Subscription sync requested; nothing to do");
    }

    fn add_builtin(&self, _url: &str) -> bool {
        false
    }
}
