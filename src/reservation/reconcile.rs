//! Reconciliation of the pool against finalized progress.
//!
//! A reservation is committed when the holder's progress is finalized and
//! its record lists the item. A reservation without that backing was left by
//! a finalize that crashed between the swaps and the commit.
//!
//! A finalize still in flight looks exactly like an orphan, so the sweep
//! should only run while no finalize can be running for the gallery (the
//! binary runs it offline).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::coordinator::ReservationCoordinator;
use crate::persistence::ReleaseReason;
use crate::store::{CasOutcome, PoolRegistry, ProgressStore, StorageError};
use crate::types::{GalleryId, MediaId, Ownership, UserId};

/// Reservation state of one media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "user", rename_all = "snake_case")]
pub enum ReservationState {
    Unclaimed,

    /// Reserved and recorded in the holder's finalized progress.
    Committed(UserId),

    /// Reserved, but the holder's progress does not account for it.
    Orphaned(UserId),
}

impl ReservationState {
    pub fn is_orphaned(&self) -> bool {
        matches!(self, ReservationState::Orphaned(_))
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Unclaimed => write!(f, "unclaimed"),
            ReservationState::Committed(user) => write!(f, "committed by {}", user),
            ReservationState::Orphaned(user) => write!(f, "orphaned by {}", user),
        }
    }
}

/// An orphaned reservation released by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedReservation {
    pub media: MediaId,
    pub user: UserId,
}

impl<'a, S, P> ReservationCoordinator<'a, S, P>
where
    S: ProgressStore + ?Sized,
    P: PoolRegistry + ?Sized,
{
    /// Classifies every item of the gallery.
    pub fn reservation_state(
        &self,
        gallery: GalleryId,
    ) -> Result<BTreeMap<MediaId, ReservationState>, StorageError> {
        let ownerships = self.pool.ownerships(gallery)?;
        let mut holders: BTreeMap<UserId, Option<BTreeSet<MediaId>>> = BTreeMap::new();
        let mut states = BTreeMap::new();

        for (media, ownership) in ownerships {
            let state = match ownership {
                Ownership::Unclaimed => ReservationState::Unclaimed,
                Ownership::ReservedBy(user) => {
                    let committed = match holders.get(&user) {
                        Some(reserved) => reserved.clone(),
                        None => {
                            let reserved = self
                                .store
                                .load(user, gallery)?
                                .and_then(|p| p.finalized().map(|r| r.reserved.clone()));
                            holders.insert(user, reserved.clone());
                            reserved
                        }
                    };
                    if committed.is_some_and(|reserved| reserved.contains(&media)) {
                        ReservationState::Committed(user)
                    } else {
                        ReservationState::Orphaned(user)
                    }
                }
            };
            states.insert(media, state);
        }

        Ok(states)
    }

    /// Releases every orphaned reservation of the gallery.
    ///
    /// Returns what was released. An item whose ownership changed since it
    /// was classified is skipped.
    #[instrument(skip(self), fields(gallery = %gallery))]
    pub fn release_orphaned(
        &self,
        gallery: GalleryId,
    ) -> Result<Vec<OrphanedReservation>, StorageError> {
        let mut released = Vec::new();

        for (media, state) in self.reservation_state(gallery)? {
            let ReservationState::Orphaned(user) = state else {
                continue;
            };
            match self
                .pool
                .release(gallery, media, user, ReleaseReason::Reconciliation)?
            {
                CasOutcome::Swapped => {
                    info!(media = %media, user = %user, "Released orphaned reservation");
                    released.push(OrphanedReservation { media, user });
                }
                CasOutcome::Conflict { actual } => {
                    warn!(media = %media, ?actual, "Orphan changed hands before release, skipping");
                }
            }
        }

        Ok(released)
    }
}
