//! Storage interfaces and adapters.
//!
//! The engine talks to storage through two narrow traits:
//! - `ProgressStore`: one `WorkflowProgress` per (user, gallery), with
//!   version-checked conditional saves
//! - `PoolRegistry`: gallery metadata and per-item ownership, with an atomic
//!   compare-and-swap per media item
//!
//! Adapters:
//! - `MemoryProgressStore` / `MemoryPoolRegistry`: in-process, used by tests
//!   and embedders that bring their own durability
//! - `FileProgressStore`: one atomically written JSON file per record
//! - `JournaledPoolRegistry`: in-memory registry backed by an fsync'd event log

pub mod file;
pub mod journal;
pub mod memory;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::persistence::{EventLogError, RecordError, ReleaseReason};
use crate::types::{Gallery, GalleryId, MediaId, Ownership, UserId, WorkflowProgress};

pub use file::FileProgressStore;
pub use journal::JournaledPoolRegistry;
pub use memory::{MemoryPoolRegistry, MemoryProgressStore};

/// Errors raised by storage adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A conditional save found a different version than expected.
    #[error(
        "progress of {user} in {gallery} changed concurrently: expected version {expected}, found {found}"
    )]
    VersionConflict {
        user: UserId,
        gallery: GalleryId,
        expected: u64,
        found: u64,
    },

    /// The gallery is not registered.
    #[error("{0} is not registered")]
    UnknownGallery(GalleryId),

    /// The media item is not part of the gallery.
    #[error("{media} does not belong to {gallery}")]
    UnknownMedia { gallery: GalleryId, media: MediaId },

    /// Record file error.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Journal error.
    #[error("journal error: {0}")]
    Journal(#[from] EventLogError),

    /// A lock was poisoned by a panicking thread.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Result of a compare-and-swap on one media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The item held the expected state and now holds the new one.
    Swapped,

    /// The item held a different state; nothing changed.
    Conflict { actual: Ownership },
}

impl CasOutcome {
    pub fn is_swapped(&self) -> bool {
        matches!(self, CasOutcome::Swapped)
    }
}

/// Durable keyed storage of workflow progress.
pub trait ProgressStore: Send + Sync {
    /// Loads the progress of a user in a gallery.
    fn load(
        &self,
        user: UserId,
        gallery: GalleryId,
    ) -> Result<Option<WorkflowProgress>, StorageError>;

    /// Saves progress if the stored version still equals `progress.version`
    /// (an absent record counts as version 0).
    ///
    /// Returns the stored record, whose version is one higher.
    fn save(&self, progress: &WorkflowProgress) -> Result<WorkflowProgress, StorageError>;
}

/// Per-gallery pool of media items and their exclusive ownership.
///
/// `compare_and_swap` must be atomic per media item. Implementations must not
/// serialize swaps on different items behind one lock.
pub trait PoolRegistry: Send + Sync {
    /// Registers a gallery. Re-registering keeps the ownership of media that
    /// is still part of the pool.
    fn register_gallery(&self, gallery: Gallery) -> Result<(), StorageError>;

    /// Returns the gallery metadata.
    fn gallery(&self, gallery: GalleryId) -> Result<Option<Gallery>, StorageError>;

    /// Lists every registered gallery.
    fn galleries(&self) -> Result<Vec<GalleryId>, StorageError>;

    /// Returns the ownership of one item.
    fn ownership(&self, gallery: GalleryId, media: MediaId) -> Result<Ownership, StorageError>;

    /// Returns the ownership of every item of the gallery.
    fn ownerships(&self, gallery: GalleryId) -> Result<BTreeMap<MediaId, Ownership>, StorageError>;

    /// Atomically replaces the ownership of one item if it equals `expected`.
    fn compare_and_swap(
        &self,
        gallery: GalleryId,
        media: MediaId,
        expected: Ownership,
        new: Ownership,
    ) -> Result<CasOutcome, StorageError>;

    /// Gives a reservation held by `holder` back to the pool.
    fn release(
        &self,
        gallery: GalleryId,
        media: MediaId,
        holder: UserId,
        _reason: ReleaseReason,
    ) -> Result<CasOutcome, StorageError> {
        self.compare_and_swap(
            gallery,
            media,
            Ownership::ReservedBy(holder),
            Ownership::Unclaimed,
        )
    }
}
