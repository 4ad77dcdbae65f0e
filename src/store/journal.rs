//! Pool registry backed by an append-only journal.
//!
//! Ownership lives in a `MemoryPoolRegistry`; every change is appended to the
//! pool journal while the affected item is still locked, and only becomes
//! visible once the append succeeded. On open the journal is replayed to
//! rebuild the registry.
//!
//! The journal file itself is a single append stream, so appends are
//! serialized. The swap decision is still made per item: two finalizers
//! racing for different photos never observe each other.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use super::{CasOutcome, MemoryPoolRegistry, PoolRegistry, StorageError};
use crate::persistence::{EventLog, PoolEvent, PoolEventPayload, ReleaseReason};
use crate::types::{Gallery, GalleryId, MediaId, Ownership, UserId};

/// A durable pool registry.
#[derive(Debug)]
pub struct JournaledPoolRegistry {
    inner: MemoryPoolRegistry,
    log: Mutex<EventLog>,
}

impl JournaledPoolRegistry {
    /// Opens (or creates) the journal at `path` and replays it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let (log, events) = EventLog::open(path.as_ref())?;
        Self::from_replay(log, events)
    }

    /// Like `open`, but critical events are not fsync'd.
    pub fn open_without_sync(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let (log, events) = EventLog::open(path.as_ref())?;
        Self::from_replay(log.without_sync(), events)
    }

    fn from_replay(log: EventLog, events: Vec<PoolEvent>) -> Result<Self, StorageError> {
        let inner = MemoryPoolRegistry::new();
        let replayed = events.len();
        for event in events {
            apply(&inner, event.payload)?;
        }
        info!(
            path = %log.path().display(),
            replayed,
            next_seq = log.next_seq(),
            "Pool journal replayed"
        );
        Ok(JournaledPoolRegistry {
            inner,
            log: Mutex::new(log),
        })
    }

    fn append(&self, payload: PoolEventPayload) -> Result<(), StorageError> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| StorageError::Poisoned("pool journal"))?;
        let event = log.append(payload)?;
        debug!(seq = event.seq, "Pool journal append");
        Ok(())
    }

    fn swap_logged(
        &self,
        gallery: GalleryId,
        media: MediaId,
        expected: Ownership,
        new: Ownership,
        reason: ReleaseReason,
    ) -> Result<CasOutcome, StorageError> {
        let payload = match (expected, new) {
            (_, Ownership::ReservedBy(user)) => Some(PoolEventPayload::ItemReserved {
                gallery,
                media,
                user,
            }),
            (Ownership::ReservedBy(user), Ownership::Unclaimed) => {
                Some(PoolEventPayload::ItemReleased {
                    gallery,
                    media,
                    user,
                    reason,
                })
            }
            (Ownership::Unclaimed, Ownership::Unclaimed) => None,
        };

        self.inner
            .swap_with(gallery, media, expected, new, || match payload {
                Some(payload) => self.append(payload),
                None => Ok(()),
            })
    }
}

/// Applies a replayed event to the in-memory registry.
///
/// Ownership events for media a later registration dropped are skipped.
fn apply(registry: &MemoryPoolRegistry, payload: PoolEventPayload) -> Result<(), StorageError> {
    let (gallery, media, ownership) = match payload {
        PoolEventPayload::GalleryRegistered {
            gallery,
            max_retouch_photos,
            media,
        } => return registry.register_gallery(Gallery::new(gallery, max_retouch_photos, media)),
        PoolEventPayload::ItemReserved {
            gallery,
            media,
            user,
        } => (gallery, media, Ownership::ReservedBy(user)),
        PoolEventPayload::ItemReleased { gallery, media, .. } => {
            (gallery, media, Ownership::Unclaimed)
        }
    };

    match registry.restore(gallery, media, ownership) {
        Err(StorageError::UnknownMedia { gallery, media }) => {
            warn!(
                gallery = %gallery,
                media = %media,
                "Skipping journaled ownership of media no longer in the gallery"
            );
            Ok(())
        }
        other => other,
    }
}

impl PoolRegistry for JournaledPoolRegistry {
    fn register_gallery(&self, gallery: Gallery) -> Result<(), StorageError> {
        self.inner.register_with(gallery, |gallery| {
            self.append(PoolEventPayload::GalleryRegistered {
                gallery: gallery.id,
                max_retouch_photos: gallery.max_retouch_photos,
                media: gallery.media.iter().copied().collect(),
            })
        })
    }

    fn gallery(&self, gallery: GalleryId) -> Result<Option<Gallery>, StorageError> {
        self.inner.gallery(gallery)
    }

    fn galleries(&self) -> Result<Vec<GalleryId>, StorageError> {
        self.inner.galleries()
    }

    fn ownership(&self, gallery: GalleryId, media: MediaId) -> Result<Ownership, StorageError> {
        self.inner.ownership(gallery, media)
    }

    fn ownerships(&self, gallery: GalleryId) -> Result<BTreeMap<MediaId, Ownership>, StorageError> {
        self.inner.ownerships(gallery)
    }

    fn compare_and_swap(
        &self,
        gallery: GalleryId,
        media: MediaId,
        expected: Ownership,
        new: Ownership,
    ) -> Result<CasOutcome, StorageError> {
        self.swap_logged(gallery, media, expected, new, ReleaseReason::Rollback)
    }

    fn release(
        &self,
        gallery: GalleryId,
        media: MediaId,
        holder: UserId,
        reason: ReleaseReason,
    ) -> Result<CasOutcome, StorageError> {
        self.swap_logged(
            gallery,
            media,
            Ownership::ReservedBy(holder),
            Ownership::Unclaimed,
            reason,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reserve(registry: &JournaledPoolRegistry, media: u64, user: u64) -> CasOutcome {
        registry
            .compare_and_swap(
                GalleryId(1),
                MediaId(media),
                Ownership::Unclaimed,
                Ownership::ReservedBy(UserId(user)),
            )
            .unwrap()
    }

    #[test]
    fn reservations_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        {
            let registry = JournaledPoolRegistry::open(&path).unwrap();
            registry
                .register_gallery(Gallery::new(GalleryId(1), 5, (1..=3).map(MediaId)))
                .unwrap();
            assert!(reserve(&registry, 1, 10).is_swapped());
            assert!(reserve(&registry, 2, 11).is_swapped());
            registry
                .release(GalleryId(1), MediaId(2), UserId(11), ReleaseReason::Rollback)
                .unwrap();
        }

        let registry = JournaledPoolRegistry::open(&path).unwrap();
        let ownerships = registry.ownerships(GalleryId(1)).unwrap();
        assert_eq!(ownerships[&MediaId(1)], Ownership::ReservedBy(UserId(10)));
        assert_eq!(ownerships[&MediaId(2)], Ownership::Unclaimed);
        assert_eq!(ownerships[&MediaId(3)], Ownership::Unclaimed);
        assert_eq!(registry.galleries().unwrap(), vec![GalleryId(1)]);
    }

    #[test]
    fn replay_skips_ownership_of_dropped_media() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        {
            let (mut log, _) = EventLog::open(&path).unwrap();
            log.append(PoolEventPayload::GalleryRegistered {
                gallery: GalleryId(1),
                max_retouch_photos: 5,
                media: vec![MediaId(1), MediaId(2)],
            })
            .unwrap();
            log.append(PoolEventPayload::GalleryRegistered {
                gallery: GalleryId(1),
                max_retouch_photos: 5,
                media: vec![MediaId(1)],
            })
            .unwrap();
            log.append(PoolEventPayload::ItemReserved {
                gallery: GalleryId(1),
                media: MediaId(2),
                user: UserId(10),
            })
            .unwrap();
        }

        let registry = JournaledPoolRegistry::open(&path).unwrap();
        let ownerships = registry.ownerships(GalleryId(1)).unwrap();
        assert_eq!(ownerships.len(), 1);
        assert_eq!(ownerships[&MediaId(1)], Ownership::Unclaimed);
    }

    #[test]
    fn reregistration_is_journaled_before_later_swaps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        {
            let registry = JournaledPoolRegistry::open_without_sync(&path).unwrap();
            registry
                .register_gallery(Gallery::new(GalleryId(1), 5, (1..=2).map(MediaId)))
                .unwrap();
            assert!(reserve(&registry, 2, 10).is_swapped());
            registry
                .register_gallery(Gallery::new(GalleryId(1), 5, [MediaId(2)]))
                .unwrap();
            assert!(!reserve(&registry, 2, 11).is_swapped());
        }

        let registry = JournaledPoolRegistry::open(&path).unwrap();
        assert_eq!(
            registry.ownership(GalleryId(1), MediaId(2)).unwrap(),
            Ownership::ReservedBy(UserId(10))
        );
        assert!(registry.ownership(GalleryId(1), MediaId(1)).is_err());
    }

    #[test]
    fn conflicts_are_not_journaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        let registry = JournaledPoolRegistry::open_without_sync(&path).unwrap();
        registry
            .register_gallery(Gallery::new(GalleryId(1), 5, [MediaId(1)]))
            .unwrap();
        assert!(reserve(&registry, 1, 10).is_swapped());
        assert!(!reserve(&registry, 1, 11).is_swapped());
        drop(registry);

        let (events, _) = EventLog::replay(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].payload,
            PoolEventPayload::ItemReserved {
                user: UserId(10),
                ..
            }
        ));
    }

    #[test]
    fn sweep_release_records_reason() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        let registry = JournaledPoolRegistry::open_without_sync(&path).unwrap();
        registry
            .register_gallery(Gallery::new(GalleryId(1), 5, [MediaId(1)]))
            .unwrap();
        reserve(&registry, 1, 10);
        registry
            .release(
                GalleryId(1),
                MediaId(1),
                UserId(10),
                ReleaseReason::Reconciliation,
            )
            .unwrap();
        drop(registry);

        let (events, _) = EventLog::replay(&path).unwrap();
        assert!(matches!(
            events.last().map(|e| &e.payload),
            Some(PoolEventPayload::ItemReleased {
                reason: ReleaseReason::Reconciliation,
                ..
            })
        ));
    }
}
