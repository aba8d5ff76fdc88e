use serde::{Deserialize, Serialize};

/// A stored proxy-server configuration.
///
/// Records are serialized with camelCase keys and every field defaulted, so
/// files written by older builds (missing newer fields) still load:
/// `{ "id":1, "host":"198.51.100.7", "remotePort":8388, "udpFallback":2, ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub name: Option<String>,
    pub host: String,
    pub remote_port: u16,
    pub password: String,
    pub method: String,
    pub route: String,
    pub remote_dns: String,
    pub ipv6: bool,
    /// Profile used for UDP traffic when this one cannot carry it.
    pub udp_fallback: Option<i64>,
    pub user_order: i64,
    /// Bytes uploaded through this profile.
    pub tx: u64,
    /// Bytes downloaded through this profile.
    pub rx: u64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            id: 0,
            name: None,
            host: "198.51.100.1".into(),
            remote_port: 8388,
            password: "u1rRWTssNv0p".into(),
            method: "aes-256-gcm".into(),
            route: "all".into(),
            remote_dns: "dns.google".into(),
            ipv6: false,
            udp_fallback: None,
            user_order: 0,
            tx: 0,
            rx: 0,
        }
    }
}

impl Profile {
    /// Returns the user-facing label: the name if set, the host otherwise.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.host,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn formatted_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.remote_port)
        } else {
            format!("{}:{}", self.host, self.remote_port)
        }
    }

    pub fn add_traffic(&mut self, stats: TrafficStats) {
        self.tx = self.tx.saturating_add(stats.tx);
        self.rx = self.rx.saturating_add(stats.rx);
    }

    pub fn traffic(&self) -> TrafficStats {
        TrafficStats {
            tx: self.tx,
            rx: self.rx,
        }
    }
}

/// Upload / download byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub tx: u64,
    pub rx: u64,
}

impl TrafficStats {
    pub fn new(tx: u64, rx: u64) -> Self {
        Self { tx, rx }
    }

    pub fn is_zero(&self) -> bool {
        self.tx == 0 && self.rx == 0
    }

    pub fn accumulate(&mut self, other: TrafficStats) {
        self.tx = self.tx.saturating_add(other.tx);
        self.rx = self.rx.saturating_add(other.rx);
    }
}
