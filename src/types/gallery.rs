//! Gallery and media ownership types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::{GalleryId, MediaId, UserId};

/// A tablo gallery: the shared pool of photos guests select from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gallery {
    pub id: GalleryId,

    /// Upper bound on the number of photos a guest may pick for retouching.
    pub max_retouch_photos: usize,

    /// Every media item that belongs to this gallery, reserved or not.
    pub media: BTreeSet<MediaId>,
}

impl Gallery {
    pub fn new(
        id: GalleryId,
        max_retouch_photos: usize,
        media: impl IntoIterator<Item = MediaId>,
    ) -> Self {
        Gallery {
            id,
            max_retouch_photos,
            media: media.into_iter().collect(),
        }
    }

    /// Returns true if the media item belongs to this gallery.
    pub fn contains(&self, media: MediaId) -> bool {
        self.media.contains(&media)
    }
}

/// Exclusive ownership state of a single media item.
///
/// `ReservedBy` is only ever produced by finalization. Claims made during the
/// earlier workflow steps never show up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "user", rename_all = "snake_case")]
pub enum Ownership {
    Unclaimed,
    ReservedBy(UserId),
}

impl Ownership {
    /// Returns true if nobody holds the item.
    pub fn is_unclaimed(&self) -> bool {
        matches!(self, Ownership::Unclaimed)
    }

    /// Returns true if a user other than `user` holds the item.
    pub fn is_held_by_other(&self, user: UserId) -> bool {
        matches!(self, Ownership::ReservedBy(holder) if *holder != user)
    }
}
