//! Conversion of a soft claim into exclusive reservations.
//!
//! `ReservationCoordinator` is the only component that writes to the shared
//! pool. Finalization walks the claimed set and tries a compare-and-swap
//! `Unclaimed → ReservedBy(user)` on each item; the first successful swap wins
//! the item. Contention is per item, so guests whose claims don't overlap
//! never wait on each other.
//!
//! Finalization is all-or-nothing from the caller's point of view: if the
//! final photo was lost, a swap fails, or the progress commit fails, every
//! item swapped by the call is released again before the error is returned.
//! Anything a crash leaves behind is classified as orphaned by
//! `reservation_state` and released by the reconciliation sweep.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::WorkflowError;
use crate::persistence::ReleaseReason;
use crate::state::TransitionError;
use crate::store::{CasOutcome, PoolRegistry, ProgressStore, StorageError};
use crate::types::{
    FinalizedRecord, GalleryId, MediaId, Ownership, UserId, WorkflowProgress, WorkflowStatus,
    WorkflowStep,
};

/// Outcome of a successful finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeResult {
    /// Items now exclusively reserved by the user.
    pub reserved: BTreeSet<MediaId>,

    /// Claimed items another user reserved first.
    pub conflicted: BTreeSet<MediaId>,

    /// Replacement final photo. Always `None`: a lost final photo is
    /// rejected with `FinalSelectionConflict` instead of being substituted.
    pub remapped_final_media_id: Option<MediaId>,

    /// The stored, finalized progress.
    pub progress: WorkflowProgress,
}

impl FinalizeResult {
    /// Builds the result stored in a finalized record.
    ///
    /// Hands the progress back unchanged if it is still in progress.
    pub fn from_progress(progress: WorkflowProgress) -> Result<Self, WorkflowProgress> {
        let (reserved, conflicted) = match progress.finalized() {
            Some(record) => (record.reserved.clone(), record.conflicted.clone()),
            None => return Err(progress),
        };
        Ok(FinalizeResult {
            reserved,
            conflicted,
            remapped_final_media_id: None,
            progress,
        })
    }
}

/// Per-item swap results of one finalize attempt.
#[derive(Debug, Default)]
struct SwapTally {
    /// Items this attempt moved from unclaimed to reserved.
    swapped: BTreeSet<MediaId>,

    /// Items already reserved by this user before the attempt (left over by
    /// an interrupted earlier attempt).
    already_held: BTreeSet<MediaId>,

    /// Items reserved by someone else, or no longer part of the gallery.
    conflicted: BTreeSet<MediaId>,
}

impl SwapTally {
    fn reserved(&self) -> BTreeSet<MediaId> {
        self.swapped.union(&self.already_held).copied().collect()
    }
}

/// Owns every write to the shared pool.
#[derive(Debug)]
pub struct ReservationCoordinator<'a, S: ?Sized, P: ?Sized> {
    pub(crate) store: &'a S,
    pub(crate) pool: &'a P,
}

impl<'a, S, P> ReservationCoordinator<'a, S, P>
where
    S: ProgressStore + ?Sized,
    P: PoolRegistry + ?Sized,
{
    pub fn new(store: &'a S, pool: &'a P) -> Self {
        ReservationCoordinator { store, pool }
    }

    /// Turns the user's claim into exclusive reservations.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the user has no progress in this gallery
    /// - `GalleryNotFound`: the gallery is not registered
    /// - `InvalidTransition`: nothing claimed, or no final photo chosen
    /// - `InvariantViolation`: the final photo breaks its membership rule
    /// - `FinalSelectionConflict`: another user reserved the final photo first;
    ///   the progress stays in progress and nothing stays reserved
    /// - `StorageFailure`: pool or store error; reservations taken are released
    ///
    /// Calling this again after success returns the stored outcome without
    /// touching the pool.
    #[instrument(skip(self), fields(user = %user, gallery = %gallery))]
    pub fn finalize(
        &self,
        user: UserId,
        gallery: GalleryId,
    ) -> Result<FinalizeResult, WorkflowError> {
        let progress = self
            .store
            .load(user, gallery)?
            .ok_or(WorkflowError::NotFound { user, gallery })?;

        let progress = match FinalizeResult::from_progress(progress) {
            Ok(done) => {
                debug!("Already finalized, returning stored outcome");
                return Ok(done);
            }
            Err(progress) => progress,
        };

        let final_media = check_preconditions(&progress)?;

        if self.pool.gallery(gallery)?.is_none() {
            return Err(WorkflowError::GalleryNotFound(gallery));
        }

        let tally = self.reserve_claims(&progress)?;

        if tally.conflicted.contains(&final_media) {
            self.release_unrecorded(gallery, user, &tally.swapped);
            info!(
                final_media = %final_media,
                conflicted = tally.conflicted.len(),
                "Final photo lost to another user"
            );
            return Err(WorkflowError::FinalSelectionConflict {
                final_media,
                conflicted: tally.conflicted.iter().copied().collect(),
                available: tally.reserved().into_iter().collect(),
            });
        }

        let reserved = tally.reserved();
        let mut next = progress;
        next.claimed = reserved.clone();
        next.retouch.retain(|m| reserved.contains(m));
        next.current_step = WorkflowStep::Completed;
        next.status = WorkflowStatus::Finalized(FinalizedRecord {
            finalized_at: Utc::now(),
            final_media_id: final_media,
            reserved: reserved.clone(),
            conflicted: tally.conflicted.clone(),
        });
        next.touch();

        match self.store.save(&next) {
            Ok(stored) => {
                info!(
                    reserved = reserved.len(),
                    conflicted = tally.conflicted.len(),
                    "Workflow finalized"
                );
                Ok(FinalizeResult {
                    reserved,
                    conflicted: tally.conflicted,
                    remapped_final_media_id: None,
                    progress: stored,
                })
            }
            Err(e @ StorageError::VersionConflict { .. }) => {
                self.resolve_commit_race(user, gallery, tally, e)
            }
            Err(e) => {
                warn!(error = %e, "Finalize commit failed, releasing reservations");
                self.release_unrecorded(gallery, user, &tally.swapped);
                Err(e.into())
            }
        }
    }

    /// Tries to reserve every claimed item.
    ///
    /// On a backend error every item swapped so far is released before the
    /// error is returned.
    fn reserve_claims(&self, progress: &WorkflowProgress) -> Result<SwapTally, WorkflowError> {
        let user = progress.user_id;
        let gallery = progress.gallery_id;
        let mut tally = SwapTally::default();

        for &media in &progress.claimed {
            let outcome = self.pool.compare_and_swap(
                gallery,
                media,
                Ownership::Unclaimed,
                Ownership::ReservedBy(user),
            );
            match outcome {
                Ok(CasOutcome::Swapped) => {
                    tally.swapped.insert(media);
                }
                Ok(CasOutcome::Conflict {
                    actual: Ownership::ReservedBy(holder),
                }) if holder == user => {
                    tally.already_held.insert(media);
                }
                Ok(CasOutcome::Conflict { actual }) => {
                    debug!(media = %media, ?actual, "Claimed item already reserved");
                    tally.conflicted.insert(media);
                }
                Err(StorageError::UnknownMedia { .. }) => {
                    warn!(media = %media, "Claimed item is no longer part of the gallery");
                    tally.conflicted.insert(media);
                }
                Err(e) => {
                    warn!(media = %media, error = %e, "Reservation failed, releasing");
                    self.release_unrecorded(gallery, user, &tally.swapped);
                    return Err(e.into());
                }
            }
        }

        Ok(tally)
    }

    /// Handles a commit that lost a version race against a concurrent write
    /// of the same progress record (e.g. a second tab finalizing too).
    ///
    /// If the other write finalized the workflow, its outcome is returned and
    /// only items it doesn't account for are released. Otherwise everything
    /// swapped here is released and the conflict is surfaced.
    fn resolve_commit_race(
        &self,
        user: UserId,
        gallery: GalleryId,
        tally: SwapTally,
        conflict: StorageError,
    ) -> Result<FinalizeResult, WorkflowError> {
        let current = match self.store.load(user, gallery) {
            Ok(current) => current,
            Err(e) => {
                self.roll_back(gallery, user, &tally.swapped);
                return Err(e.into());
            }
        };

        match current.map(FinalizeResult::from_progress) {
            Some(Ok(done)) => {
                let stray: BTreeSet<MediaId> =
                    tally.swapped.difference(&done.reserved).copied().collect();
                self.roll_back(gallery, user, &stray);
                debug!("Concurrent finalize won the commit, returning its outcome");
                Ok(done)
            }
            _ => {
                info!("Progress changed during finalize, releasing reservations");
                self.roll_back(gallery, user, &tally.swapped);
                Err(conflict.into())
            }
        }
    }

    /// Releases items swapped by a failed attempt, except those a finalized
    /// record of the same user already accounts for.
    ///
    /// A concurrent finalize of the same user counts this attempt's swaps as
    /// its own and may commit them; releasing those would leave the committed
    /// record pointing at unreserved items.
    fn release_unrecorded(&self, gallery: GalleryId, user: UserId, items: &BTreeSet<MediaId>) {
        let recorded = match self.store.load(user, gallery) {
            Ok(progress) => progress
                .as_ref()
                .and_then(WorkflowProgress::finalized)
                .map(|record| record.reserved.clone())
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Could not reload progress before rollback");
                BTreeSet::new()
            }
        };
        let stray: BTreeSet<MediaId> = items.difference(&recorded).copied().collect();
        self.roll_back(gallery, user, &stray);
    }

    /// Releases items reserved by this user. Failures are logged and left to
    /// the reconciliation sweep.
    fn roll_back(&self, gallery: GalleryId, user: UserId, items: &BTreeSet<MediaId>) {
        for &media in items {
            match self
                .pool
                .release(gallery, media, user, ReleaseReason::Rollback)
            {
                Ok(CasOutcome::Swapped) => {}
                Ok(CasOutcome::Conflict { actual }) => {
                    warn!(media = %media, ?actual, "Rollback found item in unexpected state");
                }
                Err(e) => {
                    warn!(media = %media, error = %e, "Rollback failed, item left for reconciliation");
                }
            }
        }
    }
}

/// Checks finalize preconditions and returns the final photo.
fn check_preconditions(progress: &WorkflowProgress) -> Result<MediaId, WorkflowError> {
    let user = progress.user_id;
    let gallery = progress.gallery_id;
    let from = progress.current_step;

    if progress.claimed.is_empty() {
        return Err(WorkflowError::transition(
            user,
            gallery,
            from,
            TransitionError::ExitCriteriaUnmet {
                step: WorkflowStep::Claiming,
                requirement: "at least one photo must be claimed",
            },
        ));
    }

    let final_media = progress.final_media.ok_or_else(|| {
        WorkflowError::transition(
            user,
            gallery,
            from,
            TransitionError::ExitCriteriaUnmet {
                step: WorkflowStep::Tablo,
                requirement: "a final photo must be selected",
            },
        )
    })?;

    crate::state::check_final(final_media, progress)?;
    Ok(final_media)
}
