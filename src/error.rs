//! Errors returned by workflow operations.

use thiserror::Error;

use crate::state::{SelectionError, TransitionError, Violation};
use crate::store::StorageError;
use crate::types::{GalleryId, MediaId, UserId, WorkflowStep};

/// Errors that can occur in workflow operations.
///
/// Every variant carries the ids or steps a client needs to correct the
/// request without guessing.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No progress exists yet (read-only queries only; mutating calls start
    /// fresh progress instead).
    #[error("No progress for {user} in {gallery}")]
    NotFound { user: UserId, gallery: GalleryId },

    /// The gallery is not registered in the pool.
    #[error("{0} is not registered")]
    GalleryNotFound(GalleryId),

    /// Illegal step navigation.
    #[error("Invalid transition from {from}: {reason}")]
    InvalidTransition {
        from: WorkflowStep,
        reason: TransitionError,
    },

    /// The payload breaks a membership rule and nothing valid is left to save.
    #[error("Selection rejected: {}", describe(violations))]
    InvariantViolation { violations: Vec<Violation> },

    /// More retouch photos than the gallery allows.
    #[error("{requested} retouch photos selected but at most {limit} are allowed")]
    LimitExceeded { limit: usize, requested: usize },

    /// The workflow is finalized and immutable.
    #[error("Workflow of {user} in {gallery} is finalized")]
    WorkflowFinalized { user: UserId, gallery: GalleryId },

    /// Another user reserved the chosen final photo first.
    ///
    /// `available` lists the claimed photos that were free at the time; the
    /// guest must pick a new final photo among them and finalize again.
    #[error("Final photo {final_media} was already reserved by another user")]
    FinalSelectionConflict {
        final_media: MediaId,
        conflicted: Vec<MediaId>,
        available: Vec<MediaId>,
    },

    /// Storage or pool backend failure, surfaced as-is.
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),
}

impl WorkflowError {
    /// Wraps a transition error, mapping a finalized workflow to its own variant.
    pub fn transition(
        user: UserId,
        gallery: GalleryId,
        from: WorkflowStep,
        reason: TransitionError,
    ) -> Self {
        match reason {
            TransitionError::Finalized => WorkflowError::WorkflowFinalized { user, gallery },
            reason => WorkflowError::InvalidTransition { from, reason },
        }
    }
}

impl From<SelectionError> for WorkflowError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::LimitExceeded { limit, requested } => {
                WorkflowError::LimitExceeded { limit, requested }
            }
            SelectionError::InvalidFinal(violation) => WorkflowError::InvariantViolation {
                violations: vec![violation],
            },
        }
    }
}

fn describe(violations: &[Violation]) -> String {
    let parts: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ViolationRule;

    #[test]
    fn limit_error_maps_to_limit_exceeded() {
        let err: WorkflowError = SelectionError::LimitExceeded {
            limit: 5,
            requested: 6,
        }
        .into();
        assert!(matches!(
            err,
            WorkflowError::LimitExceeded {
                limit: 5,
                requested: 6
            }
        ));
    }

    #[test]
    fn invalid_final_lists_the_violation() {
        let err: WorkflowError = SelectionError::InvalidFinal(Violation {
            media_id: MediaId(4),
            rule: ViolationRule::NotInRetouch,
        })
        .into();
        assert_eq!(
            err.to_string(),
            "Selection rejected: #4 is not among the retouch photos"
        );
    }

    #[test]
    fn finalized_transition_becomes_workflow_finalized() {
        let err = WorkflowError::transition(
            UserId(1),
            GalleryId(2),
            WorkflowStep::Completed,
            TransitionError::Finalized,
        );
        assert!(matches!(err, WorkflowError::WorkflowFinalized { .. }));
    }
}
