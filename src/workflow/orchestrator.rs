//! Public workflow operations.
//!
//! Every mutating call follows the same path:
//! 1. Resolve the gallery and load the progress (created lazily)
//! 2. Reject finalized progress
//! 3. Validate the payload; nothing is written if validation fails
//! 4. Cascade downstream selections
//! 5. Persist with a version-checked save
//! 6. Return the stored state plus notices
//!
//! Finalization is delegated to the `ReservationCoordinator`.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use super::notice::{FinalizeConflictNotice, Notice, WorkflowView};
use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::reservation::ReservationCoordinator;
use crate::state::{
    self, Direction, Selection, SelectionContext, ValidatedSelection, Violation,
    on_claimed_changed, on_retouch_changed,
};
use crate::store::{
    FileProgressStore, JournaledPoolRegistry, PoolRegistry, ProgressStore, StorageError,
};
use crate::types::{Gallery, GalleryId, MediaId, Role, UserId, WorkflowProgress, WorkflowStep};

/// The user performing an operation, as resolved by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn guest(user_id: UserId) -> Self {
        Actor {
            user_id,
            role: Role::Guest,
        }
    }

    pub fn customer(user_id: UserId) -> Self {
        Actor {
            user_id,
            role: Role::Customer,
        }
    }
}

/// How a retouch save is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Save the selection and stay on the current step.
    #[default]
    AutoSave,

    /// Save the selection and advance to the next legal step.
    Commit,
}

/// Composes validation, cascade, storage and reservation into the public
/// operations of the selection workflow.
#[derive(Debug)]
pub struct WorkflowOrchestrator<S, P> {
    store: S,
    pool: P,
}

impl<S, P> WorkflowOrchestrator<S, P>
where
    S: ProgressStore,
    P: PoolRegistry,
{
    pub fn new(store: S, pool: P) -> Self {
        WorkflowOrchestrator { store, pool }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn coordinator(&self) -> ReservationCoordinator<'_, S, P> {
        ReservationCoordinator::new(&self.store, &self.pool)
    }

    /// Returns the stored progress of the actor.
    ///
    /// Fails with `NotFound` if the actor has not acted in this gallery yet.
    pub fn get_status(
        &self,
        actor: Actor,
        gallery: GalleryId,
    ) -> Result<WorkflowView, WorkflowError> {
        let progress = self
            .store
            .load(actor.user_id, gallery)?
            .ok_or(WorkflowError::NotFound {
                user: actor.user_id,
                gallery,
            })?;
        Ok(WorkflowView::new(progress))
    }

    /// Replaces the claimed set.
    ///
    /// Ids outside the gallery or reserved by someone else are dropped and
    /// reported. Shrinking the claims prunes retouch picks and the final
    /// photo.
    #[instrument(skip(self, ids), fields(user = %actor.user_id, gallery = %gallery, count = ids.len()))]
    pub fn save_claim(
        &self,
        actor: Actor,
        gallery: GalleryId,
        ids: BTreeSet<MediaId>,
    ) -> Result<WorkflowView, WorkflowError> {
        let meta = self.require_gallery(gallery)?;
        let progress = self.load_open(actor, gallery)?;

        let reserved_by_others = self.reserved_by_others(actor.user_id, gallery)?;
        let context = SelectionContext {
            gallery: &meta,
            reserved_by_others: &reserved_by_others,
        };
        let requested = ids.len();
        let ValidatedSelection {
            cleaned,
            violations,
        } = state::validate_selection(Selection::Claim(ids), &progress, context)?;
        let kept = cleaned.into_media();
        reject_if_nothing_left(requested, &kept, &violations)?;

        let (mut next, cascade) = on_claimed_changed(progress, kept);
        next.touch();
        let stored = self.store.save(&next)?;

        debug!(
            claimed = stored.claimed.len(),
            dropped = violations.len(),
            "Claims saved"
        );
        Ok(WorkflowView::new(stored)
            .with_violations(violations)
            .with_cascade(cascade))
    }

    /// Replaces the retouch set.
    ///
    /// Ids that are not claimed are dropped and reported; more than the
    /// gallery's `max_retouch_photos` is rejected with nothing saved. With
    /// `SaveMode::Commit` the workflow also advances to the next legal step,
    /// in the same write.
    #[instrument(skip(self, ids), fields(user = %actor.user_id, gallery = %gallery, count = ids.len()))]
    pub fn save_retouch(
        &self,
        actor: Actor,
        gallery: GalleryId,
        ids: BTreeSet<MediaId>,
        mode: SaveMode,
    ) -> Result<WorkflowView, WorkflowError> {
        let meta = self.require_gallery(gallery)?;
        let progress = self.load_open(actor, gallery)?;

        let reserved_by_others = BTreeSet::new();
        let context = SelectionContext {
            gallery: &meta,
            reserved_by_others: &reserved_by_others,
        };
        let requested = ids.len();
        let ValidatedSelection {
            cleaned,
            violations,
        } = state::validate_selection(Selection::Retouch(ids), &progress, context)?;
        let kept = cleaned.into_media();
        reject_if_nothing_left(requested, &kept, &violations)?;

        let (mut next, cascade) = on_retouch_changed(progress, kept);
        if mode == SaveMode::Commit {
            let target = self.step_target(actor, &next, Direction::Forward)?;
            self.check_move(actor, &next, target)?;
            next.current_step = target;
        }
        next.touch();
        let stored = self.store.save(&next)?;

        debug!(
            retouch = stored.retouch.len(),
            step = %stored.current_step,
            "Retouch picks saved"
        );
        Ok(WorkflowView::new(stored)
            .with_violations(violations)
            .with_cascade(cascade))
    }

    /// Sets the final photo.
    ///
    /// Fails with `InvariantViolation` if the photo is not among the retouch
    /// picks (or the claims, when there are no retouch picks).
    #[instrument(skip(self), fields(user = %actor.user_id, gallery = %gallery))]
    pub fn save_final(
        &self,
        actor: Actor,
        gallery: GalleryId,
        media: MediaId,
    ) -> Result<WorkflowView, WorkflowError> {
        let meta = self.require_gallery(gallery)?;
        let mut progress = self.load_open(actor, gallery)?;

        let reserved_by_others = BTreeSet::new();
        let context = SelectionContext {
            gallery: &meta,
            reserved_by_others: &reserved_by_others,
        };
        state::validate_selection(Selection::Final(media), &progress, context)?;
        progress.final_media = Some(media);
        progress.touch();

        Ok(WorkflowView::new(self.store.save(&progress)?))
    }

    /// Clears the final photo.
    #[instrument(skip(self), fields(user = %actor.user_id, gallery = %gallery))]
    pub fn clear_final(
        &self,
        actor: Actor,
        gallery: GalleryId,
    ) -> Result<WorkflowView, WorkflowError> {
        self.require_gallery(gallery)?;
        let mut progress = self.load_open(actor, gallery)?;

        progress.final_media = None;
        progress.touch();

        Ok(WorkflowView::new(self.store.save(&progress)?))
    }

    /// Sets or clears the free-text comment attached to the order.
    ///
    /// Blank comments are stored as no comment.
    pub fn save_cart_comment(
        &self,
        actor: Actor,
        gallery: GalleryId,
        comment: Option<String>,
    ) -> Result<WorkflowView, WorkflowError> {
        self.require_gallery(gallery)?;
        let mut progress = self.load_open(actor, gallery)?;

        progress.cart_comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        progress.touch();

        Ok(WorkflowView::new(self.store.save(&progress)?))
    }

    /// Moves to an explicit step.
    ///
    /// Backward moves are always allowed; forward moves require the exit
    /// criteria of every passed step. `Completed` is only reachable through
    /// `finalize`.
    #[instrument(skip(self), fields(user = %actor.user_id, gallery = %gallery, target = %target))]
    pub fn move_to_step(
        &self,
        actor: Actor,
        gallery: GalleryId,
        target: WorkflowStep,
    ) -> Result<WorkflowView, WorkflowError> {
        self.require_gallery(gallery)?;
        let progress = self.load_or_new(actor.user_id, gallery)?;
        self.check_move(actor, &progress, target)?;
        self.store_step(progress, target)
    }

    /// Moves to the next step the actor's role may occupy.
    pub fn next_step(
        &self,
        actor: Actor,
        gallery: GalleryId,
    ) -> Result<WorkflowView, WorkflowError> {
        self.move_relative(actor, gallery, Direction::Forward)
    }

    /// Moves to the previous step the actor's role may occupy.
    pub fn previous_step(
        &self,
        actor: Actor,
        gallery: GalleryId,
    ) -> Result<WorkflowView, WorkflowError> {
        self.move_relative(actor, gallery, Direction::Backward)
    }

    /// Finalizes the actor's selection; see `ReservationCoordinator::finalize`.
    ///
    /// Claimed photos lost to other users are reported through a
    /// `FinalizeConflict` notice.
    #[instrument(skip(self), fields(user = %actor.user_id, gallery = %gallery))]
    pub fn finalize(
        &self,
        actor: Actor,
        gallery: GalleryId,
    ) -> Result<WorkflowView, WorkflowError> {
        let result = self.coordinator().finalize(actor.user_id, gallery)?;

        let mut view = WorkflowView::new(result.progress);
        if !result.conflicted.is_empty() {
            info!(
                conflicted = result.conflicted.len(),
                "Finalized with claims lost to other users"
            );
            view.notices
                .push(Notice::FinalizeConflict(FinalizeConflictNotice {
                    conflicted_media_ids: result.conflicted.into_iter().collect(),
                }));
        }
        Ok(view)
    }

    fn move_relative(
        &self,
        actor: Actor,
        gallery: GalleryId,
        direction: Direction,
    ) -> Result<WorkflowView, WorkflowError> {
        self.require_gallery(gallery)?;
        let progress = self.load_or_new(actor.user_id, gallery)?;
        let target = self.step_target(actor, &progress, direction)?;
        self.check_move(actor, &progress, target)?;
        self.store_step(progress, target)
    }

    fn store_step(
        &self,
        mut progress: WorkflowProgress,
        target: WorkflowStep,
    ) -> Result<WorkflowView, WorkflowError> {
        let from = progress.current_step;
        progress.current_step = target;
        progress.touch();
        let stored = self.store.save(&progress)?;
        debug!(from = %from, to = %target, "Step changed");
        Ok(WorkflowView::new(stored))
    }

    fn step_target(
        &self,
        actor: Actor,
        progress: &WorkflowProgress,
        direction: Direction,
    ) -> Result<WorkflowStep, WorkflowError> {
        let from = progress.current_step;
        if progress.is_finalized() {
            return Err(WorkflowError::WorkflowFinalized {
                user: actor.user_id,
                gallery: progress.gallery_id,
            });
        }
        state::adjacent_step(from, actor.role, direction).map_err(|reason| {
            WorkflowError::transition(actor.user_id, progress.gallery_id, from, reason)
        })
    }

    fn check_move(
        &self,
        actor: Actor,
        progress: &WorkflowProgress,
        target: WorkflowStep,
    ) -> Result<(), WorkflowError> {
        state::can_advance(progress, target, actor.role).map_err(|reason| {
            WorkflowError::transition(
                actor.user_id,
                progress.gallery_id,
                progress.current_step,
                reason,
            )
        })
    }

    fn require_gallery(&self, gallery: GalleryId) -> Result<Gallery, WorkflowError> {
        self.pool
            .gallery(gallery)?
            .ok_or(WorkflowError::GalleryNotFound(gallery))
    }

    fn load_or_new(
        &self,
        user: UserId,
        gallery: GalleryId,
    ) -> Result<WorkflowProgress, WorkflowError> {
        Ok(self
            .store
            .load(user, gallery)?
            .unwrap_or_else(|| WorkflowProgress::new(user, gallery)))
    }

    /// Loads progress that may still be edited.
    fn load_open(
        &self,
        actor: Actor,
        gallery: GalleryId,
    ) -> Result<WorkflowProgress, WorkflowError> {
        let progress = self.load_or_new(actor.user_id, gallery)?;
        if progress.is_finalized() {
            return Err(WorkflowError::WorkflowFinalized {
                user: actor.user_id,
                gallery,
            });
        }
        Ok(progress)
    }

    fn reserved_by_others(
        &self,
        user: UserId,
        gallery: GalleryId,
    ) -> Result<BTreeSet<MediaId>, WorkflowError> {
        Ok(self
            .pool
            .ownerships(gallery)?
            .into_iter()
            .filter(|(_, ownership)| ownership.is_held_by_other(user))
            .map(|(media, _)| media)
            .collect())
    }
}

impl WorkflowOrchestrator<FileProgressStore, JournaledPoolRegistry> {
    /// Opens the durable adapters under the configured state directory,
    /// replaying the pool journal.
    pub fn open(config: &EngineConfig) -> Result<Self, StorageError> {
        let pool = if config.sync_journal {
            JournaledPoolRegistry::open(config.journal_path())?
        } else {
            JournaledPoolRegistry::open_without_sync(config.journal_path())?
        };
        let store = FileProgressStore::new(config.progress_dir());
        info!(state_dir = %config.state_dir.display(), "Engine opened");
        Ok(WorkflowOrchestrator::new(store, pool))
    }
}

/// Rejects a non-empty payload that was filtered down to nothing, so a
/// wholly invalid request never wipes the stored selection.
fn reject_if_nothing_left(
    requested: usize,
    kept: &BTreeSet<MediaId>,
    violations: &[Violation],
) -> Result<(), WorkflowError> {
    if requested > 0 && kept.is_empty() {
        return Err(WorkflowError::InvariantViolation {
            violations: violations.to_vec(),
        });
    }
    Ok(())
}
