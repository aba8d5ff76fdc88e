//! Keeps the active profile readable before the device is unlocked.
//!
//! ```text
//!  Disabled ──arm──▶ Armed ──update──▶ LockedMirrored ──flush──▶ UnlockedSynced
//!     ▲                                                            │
//!     └──────────────────────── disable ◀──────────────────────────┘
//! ```
//!
//! The snapshot lives in the device-protected root. While the device is
//! locked it stands in for the profile store and collects traffic deltas;
//! after unlock those deltas are added to the normal store and the
//! snapshot is removed.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    platform::DeviceCapabilities,
    storage::{
        profile::{Profile, TrafficStats},
        profile_store::ProfileStore,
        write_atomic, StorageError,
    },
    utils::sync::lock,
};

pub const SNAPSHOT_FILE: &str = "profile.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Disabled,
    Armed,
    LockedMirrored,
    UnlockedSynced,
}

/// What the pre-unlock storage holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectBootSnapshot {
    pub profile: Profile,
    pub fallback: Option<Profile>,
    /// Traffic accumulated per profile id since the snapshot was written.
    #[serde(default)]
    pub traffic: BTreeMap<i64, TrafficStats>,
}

pub struct DirectBootMirror {
    path: PathBuf,
    capabilities: Arc<dyn DeviceCapabilities>,
    state: Mutex<MirrorState>,
}

impl DirectBootMirror {
    /// A mirror over `dir`. It starts `Disabled` unless the user opted in
    /// (`aware`) and the platform supports direct boot; an existing
    /// snapshot means a previous run mirrored a profile.
    pub fn new(dir: &Path, capabilities: Arc<dyn DeviceCapabilities>, aware: bool) -> Self {
        let path = dir.join(SNAPSHOT_FILE);
        let state = if !(aware && capabilities.direct_boot_supported()) {
            MirrorState::Disabled
        } else if path.exists() {
            MirrorState::LockedMirrored
        } else {
            MirrorState::Armed
        };
        debug!("Direct-boot mirror at {:?} starts {:?}", path, state);
        Self {
            path,
            capabilities,
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> MirrorState {
        *lock(&self.state)
    }

    pub fn is_enabled(&self) -> bool {
        self.state() != MirrorState::Disabled
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.path
    }

    /// `Disabled → Armed`. Returns `false` when the platform cannot do it.
    pub fn arm(&self) -> bool {
        if !self.capabilities.direct_boot_supported() {
            return false;
        }
        let mut state = lock(&self.state);
        if *state == MirrorState::Disabled {
            *state = MirrorState::Armed;
            info!("Direct-boot mirror armed");
        }
        true
    }

    /// Drop the snapshot and go back to `Disabled`.
    pub fn disable(&self) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        self.remove_snapshot()?;
        *state = MirrorState::Disabled;
        info!("Direct-boot mirror disabled");
        Ok(())
    }

    /// Mirror the current profile pair. Pending traffic is carried over so
    /// switching profiles while locked loses nothing. `None` removes the
    /// snapshot.
    pub fn update(&self, current: Option<(Profile, Option<Profile>)>) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        if *state == MirrorState::Disabled {
            return Ok(());
        }
        let Some((profile, fallback)) = current else {
            self.remove_snapshot()?;
            if *state == MirrorState::LockedMirrored {
                *state = MirrorState::Armed;
            }
            return Ok(());
        };
        let traffic = self.read_snapshot().map(|s| s.traffic).unwrap_or_default();
        let snapshot = DirectBootSnapshot {
            profile,
            fallback,
            traffic,
        };
        self.write_snapshot(&snapshot)?;
        debug!("Mirrored profile {} for direct boot", snapshot.profile.id);
        if *state == MirrorState::Armed {
            *state = MirrorState::LockedMirrored;
        }
        Ok(())
    }

    /// The mirrored profile pair, or `None` when there is no usable snapshot.
    pub fn device_profile(&self) -> Option<(Profile, Option<Profile>)> {
        if !self.is_enabled() {
            return None;
        }
        self.read_snapshot().map(|s| (s.profile, s.fallback))
    }

    /// Read the snapshot; missing or corrupt files read as `None`.
    pub fn read_snapshot(&self) -> Option<DirectBootSnapshot> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read direct-boot snapshot {:?}: {e}", self.path);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Ignoring corrupt direct-boot snapshot {:?}: {e}", self.path);
                None
            }
        }
    }

    /// Record traffic against the snapshot (`Ok(false)` unless a snapshot
    /// is being served).
    pub fn add_traffic(&self, id: i64, stats: TrafficStats) -> Result<bool, StorageError> {
        let state = lock(&self.state);
        if *state != MirrorState::LockedMirrored {
            return Ok(false);
        }
        let Some(mut snapshot) = self.read_snapshot() else {
            return Ok(false);
        };
        snapshot.traffic.entry(id).or_default().accumulate(stats);
        self.write_snapshot(&snapshot)?;
        Ok(true)
    }

    /// Add the snapshot's traffic onto `store`, then remove the snapshot.
    /// Returns how many profiles received traffic.
    ///
    /// A failure part-way writes back only the deltas that were not
    /// merged yet, so a retry never adds the same traffic twice.
    pub fn flush_traffic_stats(&self, store: &ProfileStore) -> Result<usize, StorageError> {
        let mut state = lock(&self.state);
        if *state == MirrorState::Disabled {
            return Ok(0);
        }
        let mut merged = 0;
        if let Some(mut snapshot) = self.read_snapshot() {
            let pending: Vec<(i64, TrafficStats)> =
                snapshot.traffic.iter().map(|(&id, &stats)| (id, stats)).collect();
            for (id, stats) in pending {
                if !stats.is_zero() {
                    match store.add_traffic(id, stats) {
                        Ok(true) => merged += 1,
                        Ok(false) => warn!("Profile {id} no longer exists; dropping {stats:?}"),
                        Err(e) => {
                            self.write_snapshot(&snapshot)?;
                            return Err(e);
                        }
                    }
                }
                snapshot.traffic.remove(&id);
            }
        }
        self.remove_snapshot()?;
        *state = MirrorState::UnlockedSynced;
        info!("Flushed direct-boot traffic for {merged} profile(s)");
        Ok(merged)
    }

    fn write_snapshot(&self, snapshot: &DirectBootSnapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    fn remove_snapshot(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::StaticCapabilities;

    fn encrypted() -> Arc<dyn DeviceCapabilities> {
        Arc::new(StaticCapabilities {
            pre_unlock_storage: true,
            encrypted: true,
            unlocked: false,
        })
    }

    #[test]
    fn unsupported_platform_stays_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DirectBootMirror::new(dir.path(), Arc::new(StaticCapabilities::default()), true);
        assert_eq!(mirror.state(), MirrorState::Disabled);
        assert!(!mirror.arm());

        mirror.update(Some((Profile::default(), None))).unwrap();
        assert!(!mirror.snapshot_path().exists());
        assert_eq!(mirror.device_profile(), None);
    }

    #[test]
    fn walks_the_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("profiles")).unwrap();
        let profile = store.create_profile(None).unwrap();

        let mirror = DirectBootMirror::new(dir.path(), encrypted(), false);
        assert_eq!(mirror.state(), MirrorState::Disabled);
        assert!(mirror.arm());
        assert_eq!(mirror.state(), MirrorState::Armed);

        mirror.update(Some((profile.clone(), None))).unwrap();
        assert_eq!(mirror.state(), MirrorState::LockedMirrored);
        assert!(mirror.add_traffic(profile.id, TrafficStats::new(3, 4)).unwrap());

        assert_eq!(mirror.flush_traffic_stats(&store).unwrap(), 1);
        assert_eq!(mirror.state(), MirrorState::UnlockedSynced);
        assert_eq!(mirror.read_snapshot(), None);
        assert_eq!(
            store.get_profile(profile.id).unwrap().traffic(),
            TrafficStats::new(3, 4)
        );

        mirror.disable().unwrap();
        assert_eq!(mirror.state(), MirrorState::Disabled);
    }

    #[test]
    fn switching_while_locked_keeps_pending_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DirectBootMirror::new(dir.path(), encrypted(), true);
        let first = Profile { id: 1, ..Profile::default() };
        let second = Profile { id: 2, ..Profile::default() };

        mirror.update(Some((first, None))).unwrap();
        mirror.add_traffic(1, TrafficStats::new(10, 20)).unwrap();
        mirror.update(Some((second, None))).unwrap();

        let snapshot = mirror.read_snapshot().unwrap();
        assert_eq!(snapshot.profile.id, 2);
        assert_eq!(snapshot.traffic.get(&1), Some(&TrafficStats::new(10, 20)));
    }

    #[test]
    fn interrupted_flush_keeps_only_unmerged_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("profiles")).unwrap();
        let first = store.create_profile(None).unwrap();
        let second = store.create_profile(None).unwrap();

        let mirror = DirectBootMirror::new(dir.path(), encrypted(), true);
        mirror.update(Some((first.clone(), None))).unwrap();
        mirror.add_traffic(first.id, TrafficStats::new(5, 5)).unwrap();
        mirror.add_traffic(second.id, TrafficStats::new(7, 7)).unwrap();

        // the second record becomes unreadable
        let record = store.dir().join(format!("{}.json", second.id));
        let parked = dir.path().join("parked.json");
        fs::rename(&record, &parked).unwrap();
        fs::create_dir(&record).unwrap();

        assert!(mirror.flush_traffic_stats(&store).is_err());
        assert_eq!(mirror.state(), MirrorState::LockedMirrored);
        let left = mirror.read_snapshot().unwrap().traffic;
        assert_eq!(left.get(&first.id), None);
        assert_eq!(left.get(&second.id), Some(&TrafficStats::new(7, 7)));

        fs::remove_dir(&record).unwrap();
        fs::rename(&parked, &record).unwrap();
        assert_eq!(mirror.flush_traffic_stats(&store).unwrap(), 1);
        assert_eq!(store.get_profile(first.id).unwrap().traffic(), TrafficStats::new(5, 5));
        assert_eq!(store.get_profile(second.id).unwrap().traffic(), TrafficStats::new(7, 7));
    }

    #[test]
    fn corrupt_snapshot_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), b"\x00garbage").unwrap();

        let mirror = DirectBootMirror::new(dir.path(), encrypted(), true);
        assert_eq!(mirror.state(), MirrorState::LockedMirrored);
        assert_eq!(mirror.device_profile(), None);
        assert!(!mirror.add_traffic(1, TrafficStats::new(1, 1)).unwrap());
    }
}
