//! File-based state store for persistent state.

use crate::backend::StateStore;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// A file-based state store.
///
/// Each key is stored as one file inside a state directory. Writes go to
/// a temporary file that is synced and then renamed over the target, so
/// a crash mid-write never leaves a torn value behind.
///
/// # Single writer
///
/// The directory is guarded by an advisory `fs2` lock taken at open time.
/// A second process opening the same directory gets
/// [`StoreError::Locked`] instead of silently sharing state.
///
/// # Example
///
/// ```no_run
/// use clinsync_store::{StateStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-state")).unwrap();
/// store.put("queue", b"[]").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    // Held for the lifetime of the store; dropping releases the lock.
    _lock: File,
    write_guard: Mutex<()>,
}

impl FileStore {
    /// Opens or creates a state directory and takes its writer lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or if
    /// another process already holds the lock.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked {
            path: dir.display().to_string(),
        })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            write_guard: Mutex::new(()),
        })
    }

    /// Returns the state directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid || key == LOCK_FILE {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.dir.join(key))
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!("{key}.tmp"));

        let _guard = self.write_guard.lock();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_guard.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get("queue").unwrap(), None);
        store.put("queue", b"[1,2,3]").unwrap();
        assert_eq!(store.get("queue").unwrap(), Some(b"[1,2,3]".to_vec()));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put("dead-letter", b"[]").unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("dead-letter").unwrap(), Some(b"[]".to_vec()));
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("queue", b"old").unwrap();
        store.put("queue", b"new").unwrap();
        assert_eq!(store.get("queue").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("queue", b"x").unwrap();
        store.remove("queue").unwrap();
        store.remove("queue").unwrap();
        assert_eq!(store.get("queue").unwrap(), None);
    }

    #[test]
    fn second_opener_is_rejected() {
        let dir = tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();

        let err = FileStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.put("../escape", b"x"),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.put("", b"x"),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.put(".lock", b"x"),
            Err(StoreError::InvalidKey { .. })
        ));
    }
}
