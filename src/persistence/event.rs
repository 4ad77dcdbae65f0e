//! Event types for the pool journal.
//!
//! These events are appended to the journal in JSON Lines format.
//! Each event has a monotonic sequence number and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GalleryId, MediaId, UserId};

/// An event in the pool journal.
///
/// The payload is flattened into the event object.
///
/// Example JSON:
/// ```json
/// {"seq":4,"ts":"2026-03-02T10:00:00Z","type":"item_reserved","gallery":1,"media":7,"user":12}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEvent {
    /// Monotonic sequence number. Used for replay ordering.
    pub seq: u64,

    /// Timestamp when the event was created (UTC).
    pub ts: DateTime<Utc>,

    #[serde(flatten)]
    pub payload: PoolEventPayload,
}

impl PoolEvent {
    /// Creates a new event with the given sequence number and payload.
    /// Timestamp is set to the current time.
    pub fn new(seq: u64, payload: PoolEventPayload) -> Self {
        PoolEvent {
            seq,
            ts: Utc::now(),
            payload,
        }
    }

    /// Returns true if this event must be durable before the operation returns.
    pub fn is_critical(&self) -> bool {
        self.payload.is_critical()
    }
}

/// Why a reservation was given back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// A finalize call failed and undid its own reservations.
    Rollback,

    /// The reconciliation sweep released a reservation that no finalized
    /// progress record accounts for.
    Reconciliation,
}

/// Event payload types for the pool journal.
///
/// Serialized with internal tagging: `{"type": "item_reserved", "gallery": 1, ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEventPayload {
    /// A gallery and its pool were registered (or re-registered with new media).
    GalleryRegistered {
        gallery: GalleryId,
        max_retouch_photos: usize,
        media: Vec<MediaId>,
    },

    /// A media item moved from unclaimed to reserved.
    ItemReserved {
        gallery: GalleryId,
        media: MediaId,
        user: UserId,
    },

    /// A reserved media item went back to unclaimed.
    ItemReleased {
        gallery: GalleryId,
        media: MediaId,
        user: UserId,
        reason: ReleaseReason,
    },
}

impl PoolEventPayload {
    /// Returns true if this event type requires immediate fsync.
    ///
    /// Rollback releases are not: losing one in a crash leaves the item
    /// reserved by a user whose progress never finalized, which the
    /// reconciliation sweep already detects and releases.
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            PoolEventPayload::ItemReleased {
                reason: ReleaseReason::Rollback,
                ..
            }
        )
    }
}
