//! File-backed progress store.
//!
//! Each record lives in `<root>/<gallery>/<user>.json` and is written with the
//! atomic temp-file-then-rename scheme from `persistence::record`. Conditional
//! saves hold a per-record lock across the version check and the write, so
//! two writers for different users never wait on each other. A record's lock
//! only exists while a save for it is in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::{ProgressStore, StorageError};
use crate::persistence::{save_record_atomic, try_load_record};
use crate::types::{GalleryId, UserId, WorkflowProgress};

type RecordKey = (UserId, GalleryId);

/// Progress store keeping one JSON file per record.
#[derive(Debug)]
pub struct FileProgressStore {
    root: PathBuf,
    locks: Mutex<HashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl FileProgressStore {
    /// Creates a store rooted at `root`. Directories are created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileProgressStore {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the directory this store writes to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file holding the record of `user` in `gallery`.
    pub fn record_path(&self, user: UserId, gallery: GalleryId) -> PathBuf {
        self.root
            .join(gallery.0.to_string())
            .join(format!("{}.json", user.0))
    }

    fn record_lock(&self, key: RecordKey) -> Result<Arc<Mutex<()>>, StorageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StorageError::Poisoned("progress file locks"))?;
        Ok(Arc::clone(locks.entry(key).or_default()))
    }

    /// Drops the lock entry once no other save is using it.
    fn release_record_lock(&self, key: RecordKey, lock: Arc<Mutex<()>>) -> Result<(), StorageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StorageError::Poisoned("progress file locks"))?;
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        Ok(())
    }

    fn save_checked(&self, progress: &WorkflowProgress) -> Result<WorkflowProgress, StorageError> {
        let path = self.record_path(progress.user_id, progress.gallery_id);
        let found = try_load_record::<WorkflowProgress>(&path)?
            .map(|p| p.version)
            .unwrap_or(0);
        if found != progress.version {
            return Err(StorageError::VersionConflict {
                user: progress.user_id,
                gallery: progress.gallery_id,
                expected: progress.version,
                found,
            });
        }

        let mut stored = progress.clone();
        stored.version += 1;
        save_record_atomic(&path, &stored)?;
        trace!(path = %path.display(), version = stored.version, "Progress record written");
        Ok(stored)
    }
}

impl ProgressStore for FileProgressStore {
    fn load(
        &self,
        user: UserId,
        gallery: GalleryId,
    ) -> Result<Option<WorkflowProgress>, StorageError> {
        Ok(try_load_record(&self.record_path(user, gallery))?)
    }

    fn save(&self, progress: &WorkflowProgress) -> Result<WorkflowProgress, StorageError> {
        let key = (progress.user_id, progress.gallery_id);
        let lock = self.record_lock(key)?;
        let result = match lock.lock() {
            Ok(_guard) => self.save_checked(progress),
            Err(_) => Err(StorageError::Poisoned("progress file")),
        };
        self.release_record_lock(key, lock)?;
        result
    }
}
