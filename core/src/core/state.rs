/// Snapshot persistence for diff mode.
///
/// One JSON file per platform under a store directory. Writes go to a `.tmp`
/// file first and are renamed over the real file, so a killed process never
/// leaves a half-written snapshot behind. A lock file guards the directory
/// against a second poll process.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::scope::ProgramData;
use crate::error::StoreError;
use crate::modules::{Handle, Platform};

const LOCK_FILE: &str = ".scopewatch.lock";

/// Every program of one platform at one point in time, keyed by program URL.
///
/// `handles` maps a program URL to the handle it was fetched under, for
/// platforms whose URLs do not spell out the handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub platform: Platform,
    pub taken_at: u64,
    pub programs: BTreeMap<String, ProgramData>,
    #[serde(default)]
    pub handles: BTreeMap<String, Handle>,
}

impl Snapshot {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            taken_at: now_unix(),
            programs: BTreeMap::new(),
            handles: BTreeMap::new(),
        }
    }

    /// Builds a snapshot; a URL seen twice keeps its last program.
    pub fn from_programs(platform: Platform, programs: impl IntoIterator<Item = ProgramData>) -> Self {
        let mut snapshot = Self::new(platform);
        for program in programs {
            snapshot.programs.insert(program.url.clone(), program);
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Where snapshots live between polls.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing was ever saved for `platform`.
    fn load(&self, platform: Platform) -> Result<Option<Snapshot>, StoreError>;

    /// Replaces the stored snapshot of `snapshot.platform` wholesale.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// JSON-file [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, platform: Platform) -> PathBuf {
        self.dir.join(format!("{}.json", platform))
    }

    /// Takes the single-writer lock for this store's directory.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.dir)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self, platform: Platform) -> Result<Option<Snapshot>, StoreError> {
        let path = self.path_for(platform);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let snapshot: Snapshot = serde_json::from_str(&data).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        debug!("loaded {} snapshot with {} programs", platform, snapshot.len());
        Ok(Some(snapshot))
    }

    /// Atomic write: serialize to .tmp, then rename over the real file.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.path_for(snapshot.platform);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(snapshot).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!("saved {} snapshot with {} programs", snapshot.platform, snapshot.len());
        Ok(())
    }
}

/// Exclusive lock file; removed again when dropped.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(LOCK_FILE);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(StoreError::Locked(path)),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to release store lock {}: {}", self.path.display(), e);
        }
    }
}

fn now_unix() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::ScopeElement;

    fn sample() -> Snapshot {
        let mut program = ProgramData::new("https://hackerone.com/acme");
        program.in_scope.push(ScopeElement::new("*.acme.com", "WILDCARD").bounty(true));
        program.out_of_scope.push(ScopeElement::new("blog.acme.com", "URL"));
        Snapshot::from_programs(Platform::HackerOne, vec![program])
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        assert!(store.load(Platform::Bugcrowd).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested"));
        let snapshot = sample();

        store.save(&snapshot).unwrap();
        assert!(store.path_for(Platform::HackerOne).exists());
        assert!(!store.path_for(Platform::HackerOne).with_extension("json.tmp").exists());
        assert_eq!(store.load(Platform::HackerOne).unwrap(), Some(snapshot));
    }

    #[test]
    fn test_save_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        store.save(&sample()).unwrap();
        store.save(&Snapshot::new(Platform::HackerOne)).unwrap();
        assert!(store.load(Platform::HackerOne).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        fs::write(store.path_for(Platform::Intigriti), "{not json").unwrap();
        assert!(matches!(store.load(Platform::Intigriti), Err(StoreError::Serde { .. })));
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());

        let lock = store.lock().unwrap();
        assert!(lock.path().exists());
        assert!(matches!(store.lock(), Err(StoreError::Locked(_))));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_snapshot_without_handle_map_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("handles");
        fs::write(store.path_for(Platform::HackerOne), value.to_string()).unwrap();

        let loaded = store.load(Platform::HackerOne).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.handles.is_empty());
    }

    #[test]
    fn test_from_programs_last_url_wins() {
        let mut first = ProgramData::new("https://x/a");
        first.in_scope.push(ScopeElement::new("old.com", "URL"));
        let mut second = ProgramData::new("https://x/a");
        second.in_scope.push(ScopeElement::new("new.com", "URL"));

        let snapshot = Snapshot::from_programs(Platform::Test, vec![first, second]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.programs["https://x/a"].in_scope[0].target, "new.com");
    }
}
