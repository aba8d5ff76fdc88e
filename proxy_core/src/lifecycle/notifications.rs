//! Notification channels the service posts to.

use std::{collections::BTreeMap, sync::Mutex};

use log::{debug, info};

use crate::utils::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Importance {
    Min,
    Low,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: &'static str,
    pub name: &'static str,
    pub importance: Importance,
    pub show_badge: bool,
    pub allow_bubbles: bool,
}

impl NotificationChannel {
    const fn quiet(id: &'static str, name: &'static str, importance: Importance) -> Self {
        Self {
            id,
            name,
            importance,
            show_badge: false,
            allow_bubbles: false,
        }
    }
}

pub const CHANNELS: [NotificationChannel; 4] = [
    NotificationChannel::quiet("service-vpn", "VPN Service", Importance::Min),
    NotificationChannel::quiet("service-proxy", "Proxy Service", Importance::Low),
    NotificationChannel::quiet("service-transproxy", "Transproxy Service", Importance::Min),
    NotificationChannel::quiet("update", "Update", Importance::Default),
];

/// The host's notification system. Declaring a channel id twice must be
/// harmless.
pub trait NotificationHost: Send + Sync {
    fn create_channels(&self, channels: &[NotificationChannel]);
}

pub fn update_notification_channels(host: &dyn NotificationHost) {
    host.create_channels(&CHANNELS);
}

/// In-process channel table, de-duplicated by id.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<BTreeMap<&'static str, NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        lock(&self.channels).values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<NotificationChannel> {
        lock(&self.channels).get(id).cloned()
    }
}

impl NotificationHost for ChannelRegistry {
    fn create_channels(&self, channels: &[NotificationChannel]) {
        let mut table = lock(&self.channels);
        for channel in channels {
            if table.get(channel.id) == Some(channel) {
                debug!("Notification channel '{}' unchanged", channel.id);
                continue;
            }
            info!("Declared notification channel '{}'", channel.id);
            table.insert(channel.id, channel.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclaring_is_a_noop() {
        let registry = ChannelRegistry::new();
        update_notification_channels(&registry);
        update_notification_channels(&registry);

        let channels = registry.channels();
        assert_eq!(channels.len(), 4);
        assert!(channels.iter().all(|c| !c.show_badge && !c.allow_bubbles));
        assert_eq!(registry.get("update").unwrap().importance, Importance::Default);
        assert_eq!(registry.get("service-proxy").unwrap().importance, Importance::Low);
    }
}
