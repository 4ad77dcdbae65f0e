//! In-memory storage adapters.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use super::{CasOutcome, PoolRegistry, ProgressStore, StorageError};
use crate::types::{Gallery, GalleryId, MediaId, Ownership, UserId, WorkflowProgress};

/// In-memory progress store.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<(UserId, GalleryId), WorkflowProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(
        &self,
        user: UserId,
        gallery: GalleryId,
    ) -> Result<Option<WorkflowProgress>, StorageError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StorageError::Poisoned("progress store"))?;
        Ok(records.get(&(user, gallery)).cloned())
    }

    fn save(&self, progress: &WorkflowProgress) -> Result<WorkflowProgress, StorageError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StorageError::Poisoned("progress store"))?;
        let key = (progress.user_id, progress.gallery_id);

        let found = records.get(&key).map(|p| p.version).unwrap_or(0);
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
        records.insert(key, stored.clone());
        Ok(stored)
    }
}

/// One gallery's pool. Every item has its own lock so swaps on different
/// items never wait on each other.
#[derive(Debug)]
struct GalleryPool {
    gallery: Gallery,
    items: HashMap<MediaId, Mutex<Ownership>>,
}

impl GalleryPool {
    fn new(gallery: Gallery, previous: Option<&GalleryPool>) -> Result<Self, StorageError> {
        let mut items = HashMap::with_capacity(gallery.media.len());
        for media in &gallery.media {
            let ownership = match previous.and_then(|p| p.items.get(media)) {
                Some(item) => *item
                    .lock()
                    .map_err(|_| StorageError::Poisoned("pool item"))?,
                None => Ownership::Unclaimed,
            };
            items.insert(*media, Mutex::new(ownership));
        }
        Ok(GalleryPool { gallery, items })
    }
}

/// In-memory pool registry with per-item compare-and-swap.
///
/// The gallery map is behind a `RwLock` that swaps only ever take for
/// reading; the write lock is taken when galleries are registered. The
/// compare-and-swap itself holds just the item's own mutex.
#[derive(Debug, Default)]
pub struct MemoryPoolRegistry {
    pools: RwLock<HashMap<GalleryId, GalleryPool>>,
}

impl MemoryPoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare-and-swap that runs `on_swap` while the item is still locked
    /// and only applies the new state if `on_swap` succeeds.
    ///
    /// Used by durable wrappers to record the change before it becomes visible.
    pub(crate) fn swap_with(
        &self,
        gallery: GalleryId,
        media: MediaId,
        expected: Ownership,
        new: Ownership,
        on_swap: impl FnOnce() -> Result<(), StorageError>,
    ) -> Result<CasOutcome, StorageError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        let pool = pools
            .get(&gallery)
            .ok_or(StorageError::UnknownGallery(gallery))?;
        let item = pool
            .items
            .get(&media)
            .ok_or(StorageError::UnknownMedia { gallery, media })?;
        let mut current = item
            .lock()
            .map_err(|_| StorageError::Poisoned("pool item"))?;

        if *current != expected {
            return Ok(CasOutcome::Conflict { actual: *current });
        }

        on_swap()?;
        *current = new;
        Ok(CasOutcome::Swapped)
    }

    /// Registers (or replaces) a gallery, running `on_register` while the
    /// gallery map is write-locked. The new pool is installed only if
    /// `on_register` succeeds, and no swap can run in between.
    pub(crate) fn register_with(
        &self,
        gallery: Gallery,
        on_register: impl FnOnce(&Gallery) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut pools = self
            .pools
            .write()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        on_register(&gallery)?;
        let id = gallery.id;
        let pool = GalleryPool::new(gallery, pools.get(&id))?;
        pools.insert(id, pool);
        Ok(())
    }

    /// Sets an item's ownership unconditionally. Used when replaying a journal.
    pub(crate) fn restore(
        &self,
        gallery: GalleryId,
        media: MediaId,
        ownership: Ownership,
    ) -> Result<(), StorageError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        let item = pools
            .get(&gallery)
            .ok_or(StorageError::UnknownGallery(gallery))?
            .items
            .get(&media)
            .ok_or(StorageError::UnknownMedia { gallery, media })?;
        *item
            .lock()
            .map_err(|_| StorageError::Poisoned("pool item"))? = ownership;
        Ok(())
    }
}

impl PoolRegistry for MemoryPoolRegistry {
    fn register_gallery(&self, gallery: Gallery) -> Result<(), StorageError> {
        self.register_with(gallery, |_| Ok(()))
    }

    fn gallery(&self, gallery: GalleryId) -> Result<Option<Gallery>, StorageError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        Ok(pools.get(&gallery).map(|p| p.gallery.clone()))
    }

    fn galleries(&self) -> Result<Vec<GalleryId>, StorageError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        let mut ids: Vec<GalleryId> = pools.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn ownership(&self, gallery: GalleryId, media: MediaId) -> Result<Ownership, StorageError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        let item = pools
            .get(&gallery)
            .ok_or(StorageError::UnknownGallery(gallery))?
            .items
            .get(&media)
            .ok_or(StorageError::UnknownMedia { gallery, media })?;
        let ownership = *item
            .lock()
            .map_err(|_| StorageError::Poisoned("pool item"))?;
        Ok(ownership)
    }

    fn ownerships(&self, gallery: GalleryId) -> Result<BTreeMap<MediaId, Ownership>, StorageError> {
        let pools = self
            .pools
            .read()
            .map_err(|_| StorageError::Poisoned("pool registry"))?;
        let pool = pools
            .get(&gallery)
            .ok_or(StorageError::UnknownGallery(gallery))?;
        let mut result = BTreeMap::new();
        for (media, item) in &pool.items {
            let ownership = *item
                .lock()
                .map_err(|_| StorageError::Poisoned("pool item"))?;
            result.insert(*media, ownership);
        }
        Ok(result)
    }

    fn compare_and_swap(
        &self,
        gallery: GalleryId,
        media: MediaId,
        expected: Ownership,
        new: Ownership,
    ) -> Result<CasOutcome, StorageError> {
        self.swap_with(gallery, media, expected, new, || Ok(()))
    }
}
