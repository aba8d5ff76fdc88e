use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};

use super::{
    profile::{Profile, TrafficStats},
    write_atomic, StorageError,
};
use crate::utils::sync::lock;

const NEXT_ID_FILE: &str = "next_id";

/// One JSON file per profile (`<id>.json`) plus a persisted id counter.
///
/// The counter mutex is held across every read-modify-write, which makes
/// id allocation collision-free and keeps fallback validation consistent
/// with the records it inspected. Plain reads take no lock; records are
/// replaced atomically so a reader sees either the old or the new file.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    next_id: Arc<Mutex<i64>>,
}

impl ProfileStore {
    /// Open the store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let stored = fs::read_to_string(dir.join(NEXT_ID_FILE))
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(1);
        let next_id = Self::scan_ids(&dir)?
            .into_iter()
            .fold(stored.max(1), |next, id| match id.checked_add(1) {
                Some(after) => next.max(after),
                None => {
                    warn!("Ignoring profile id {id} in {:?}: no id can follow it", dir);
                    next
                }
            });
        debug!("Opened profile store {:?} (next id {next_id})", dir);

        Ok(Self {
            dir,
            next_id: Arc::new(Mutex::new(next_id)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan_ids(dir: &Path) -> io::Result<Vec<i64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn file_for(&self, id: i64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read(&self, id: i64) -> Result<Option<Profile>, StorageError> {
        match fs::read(self.file_for(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, profile: &Profile) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(profile)?;
        write_atomic(&self.file_for(profile.id), &bytes)?;
        Ok(())
    }

    /// Returns the profile, or `None` if it is missing or unreadable.
    pub fn get_profile(&self, id: i64) -> Option<Profile> {
        match self.read(id) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Could not read profile {id}: {e}");
                None
            }
        }
    }

    /// Returns every stored profile ordered by `user_order`, then id
    /// (silently skips malformed files).
    pub fn list_profiles(&self) -> Result<Vec<Profile>, StorageError> {
        let mut out = Vec::new();
        for id in Self::scan_ids(&self.dir)? {
            if let Some(profile) = self.get_profile(id) {
                out.push(profile);
            }
        }
        out.sort_by_key(|p| (p.user_order, p.id));
        Ok(out)
    }

    /// Persist a new profile built from `template` (or defaults) under a
    /// freshly allocated id. Traffic counters always start at zero.
    pub fn create_profile(&self, template: Option<&Profile>) -> Result<Profile, StorageError> {
        let mut next_id = lock(&self.next_id);
        let id = *next_id;
        let following = id.checked_add(1).ok_or(StorageError::IdsExhausted)?;

        let mut profile = template.cloned().unwrap_or_default();
        profile.id = id;
        profile.tx = 0;
        profile.rx = 0;
        if profile.user_order == 0 {
            profile.user_order = id;
        }
        if let Some(fallback) = profile.udp_fallback {
            self.validate_fallback(id, fallback)?;
        }

        write_atomic(&self.dir.join(NEXT_ID_FILE), following.to_string().as_bytes())?;
        *next_id = following;
        self.write(&profile)?;
        info!("Created profile {id} ({})", profile.formatted_address());
        Ok(profile)
    }

    /// Overwrite an existing profile.
    pub fn update_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        let _guard = lock(&self.next_id);
        if self.read(profile.id)?.is_none() {
            return Err(StorageError::ProfileNotFound(profile.id));
        }
        if let Some(fallback) = profile.udp_fallback {
            self.validate_fallback(profile.id, fallback)?;
        }
        self.write(profile)
    }

    /// Delete a profile (`Ok(true)` if removed, `Ok(false)` if it didn't
    /// exist). Fallback references to it are cleared.
    pub fn delete_profile(&self, id: i64) -> Result<bool, StorageError> {
        let _guard = lock(&self.next_id);
        match fs::remove_file(self.file_for(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        for other in Self::scan_ids(&self.dir)? {
            let Some(mut profile) = self.get_profile(other) else {
                continue;
            };
            if profile.udp_fallback == Some(id) {
                debug!("Clearing UDP fallback of profile {other}");
                profile.udp_fallback = None;
                self.write(&profile)?;
            }
        }
        info!("Deleted profile {id}");
        Ok(true)
    }

    /// Add to a profile's counters (`Ok(false)` if the profile is gone).
    pub fn add_traffic(&self, id: i64, stats: TrafficStats) -> Result<bool, StorageError> {
        let _guard = lock(&self.next_id);
        let Some(mut profile) = self.read(id)? else {
            return Ok(false);
        };
        profile.add_traffic(stats);
        self.write(&profile)?;
        Ok(true)
    }

    /// Pair a profile with its UDP fallback. A fallback that no longer
    /// resolves yields `None` rather than an error.
    pub fn expand(&self, profile: Profile) -> (Profile, Option<Profile>) {
        let fallback = profile
            .udp_fallback
            .filter(|&fallback| fallback != profile.id)
            .and_then(|fallback| self.get_profile(fallback));
        (profile, fallback)
    }

    /// Fallback chains are one level deep: the target must exist and carry
    /// no fallback of its own, and `id` must not already serve as someone
    /// else's fallback. Caller holds the store lock.
    fn validate_fallback(&self, id: i64, fallback: i64) -> Result<(), StorageError> {
        let invalid = |reason| StorageError::InvalidFallback {
            id,
            fallback,
            reason,
        };
        if fallback == id {
            return Err(invalid("a profile cannot be its own fallback"));
        }
        let target = self
            .read(fallback)?
            .ok_or_else(|| invalid("fallback profile does not exist"))?;
        if target.udp_fallback.is_some() {
            return Err(invalid("fallback profile has a fallback of its own"));
        }
        for other in Self::scan_ids(&self.dir)? {
            if other == id {
                continue;
            }
            if self.get_profile(other).and_then(|p| p.udp_fallback) == Some(id) {
                return Err(invalid("profile is already used as a fallback"));
            }
        }
        Ok(())
    }
}
