//! Capability queries and best-effort platform tweaks.
//!
//! Everything the core needs to know about the host (encryption status,
//! lock state, kernel TCP settings) goes through the traits here, so the
//! storage selector and the direct-boot mirror only ever see booleans.

use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected value in {path:?}: {value:?}")]
    Parse { path: PathBuf, value: String },
}

/// What the host can tell us about storage encryption and lock state.
pub trait DeviceCapabilities: Send + Sync {
    /// A storage area readable before the user unlocks the device exists.
    fn supports_pre_unlock_storage(&self) -> bool;

    /// Storage is encrypted per user (file-based encryption).
    fn is_device_encrypted(&self) -> bool;

    /// The user has unlocked the device since boot.
    fn is_user_unlocked(&self) -> bool;

    /// Direct-boot mirroring only makes sense with both of the above.
    fn direct_boot_supported(&self) -> bool {
        self.supports_pre_unlock_storage() && self.is_device_encrypted()
    }
}

/// Fixed answers, read from configuration on hosts without real
/// encryption APIs (desktop Linux, CI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticCapabilities {
    pub pre_unlock_storage: bool,
    pub encrypted: bool,
    pub unlocked: bool,
}

impl Default for StaticCapabilities {
    fn default() -> Self {
        Self {
            pre_unlock_storage: false,
            encrypted: false,
            unlocked: true,
        }
    }
}

impl DeviceCapabilities for StaticCapabilities {
    fn supports_pre_unlock_storage(&self) -> bool {
        self.pre_unlock_storage
    }

    fn is_device_encrypted(&self) -> bool {
        self.encrypted
    }

    fn is_user_unlocked(&self) -> bool {
        self.unlocked
    }
}

/// Network-level optimizations the core may switch on at startup.
pub trait NetworkTweaks: Send + Sync {
    fn tcp_fast_open_enabled(&self) -> bool;
    fn enable_tcp_fast_open(&self) -> Result<(), PlatformError>;
}

/// TCP Fast Open through the Linux sysctl file.
///
/// Bit 0 of the value enables TFO for outgoing connections, bit 1 for
/// listeners; enabling writes `3` so both directions are covered.
#[derive(Debug, Clone)]
pub struct ProcTcpFastOpen {
    path: PathBuf,
}

impl Default for ProcTcpFastOpen {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcTcpFastOpen {
    pub const DEFAULT_PATH: &'static str = "/proc/sys/net/ipv4/tcp_fastopen";
    const CLIENT_BIT: u32 = 1;
    const CLIENT_AND_SERVER: u32 = 3;

    pub fn new() -> Self {
        Self::with_path(Self::DEFAULT_PATH)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_mode(&self) -> Result<u32, PlatformError> {
        let raw = fs::read_to_string(&self.path)?;
        raw.trim().parse().map_err(|_| PlatformError::Parse {
            path: self.path.clone(),
            value: raw.trim().to_owned(),
        })
    }
}

impl NetworkTweaks for ProcTcpFastOpen {
    fn tcp_fast_open_enabled(&self) -> bool {
        match self.read_mode() {
            Ok(mode) => mode & Self::CLIENT_BIT != 0,
            Err(e) => {
                debug!("Cannot read {:?}: {e}", self.path);
                false
            }
        }
    }

    fn enable_tcp_fast_open(&self) -> Result<(), PlatformError> {
        let mode = self.read_mode().unwrap_or(0) | Self::CLIENT_AND_SERVER;
        fs::write(&self.path, format!("{mode}\n"))?;
        Ok(())
    }
}
