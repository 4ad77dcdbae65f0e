//! Per-user workflow progress and step types.
//!
//! A `WorkflowProgress` record tracks one user's selections in one gallery.
//! Claims, retouch picks and the final photo are all "soft": they live only in
//! this record and are invisible to other users until finalization turns the
//! claim into exclusive reservations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::ids::{GalleryId, MediaId, UserId};

/// The role of the acting user, resolved by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A guest invited to a gallery. Passes through the registration step.
    Guest,

    /// A customer who owns the order. Never occupies the registration step.
    Customer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Guest => write!(f, "guest"),
            Role::Customer => write!(f, "customer"),
        }
    }
}

/// The fixed, ordered steps of the selection workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Claiming,
    Registration,
    Retouch,
    Tablo,
    Completed,
}

impl WorkflowStep {
    /// All steps in workflow order.
    pub const ALL: [WorkflowStep; 5] = [
        WorkflowStep::Claiming,
        WorkflowStep::Registration,
        WorkflowStep::Retouch,
        WorkflowStep::Tablo,
        WorkflowStep::Completed,
    ];

    /// Position of the step in the workflow, starting at 0.
    pub fn index(&self) -> usize {
        match self {
            WorkflowStep::Claiming => 0,
            WorkflowStep::Registration => 1,
            WorkflowStep::Retouch => 2,
            WorkflowStep::Tablo => 3,
            WorkflowStep::Completed => 4,
        }
    }

    /// Returns the step at the given position.
    pub fn from_index(index: usize) -> Option<WorkflowStep> {
        Self::ALL.get(index).copied()
    }

    /// Returns the name of this step for logging/display.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowStep::Claiming => "claiming",
            WorkflowStep::Registration => "registration",
            WorkflowStep::Retouch => "retouch",
            WorkflowStep::Tablo => "tablo",
            WorkflowStep::Completed => "completed",
        }
    }

    /// Returns true if the given role may occupy this step.
    pub fn allows_role(&self, role: Role) -> bool {
        !(matches!(self, WorkflowStep::Registration) && role == Role::Customer)
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome recorded when a workflow is finalized.
///
/// Stored inside `WorkflowStatus::Finalized`, so a finalized record always
/// carries its final photo and the exact reservation outcome. Repeated
/// finalize calls answer from this record instead of touching the pool again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedRecord {
    pub finalized_at: DateTime<Utc>,

    /// The photo chosen for the final tablo artifact.
    pub final_media_id: MediaId,

    /// Items this user now exclusively owns.
    pub reserved: BTreeSet<MediaId>,

    /// Claimed items another user had already reserved.
    pub conflicted: BTreeSet<MediaId>,
}

/// Whether the workflow is still editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowStatus {
    InProgress,
    Finalized(FinalizedRecord),
}

/// One user's progress through the selection workflow of one gallery.
///
/// INVARIANTS (for non-finalized progress):
/// - `retouch ⊆ claimed`
/// - `final_media` is in `retouch` when `retouch` is non-empty, otherwise in `claimed`
/// - `current_step` is `Registration` only for guests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub user_id: UserId,
    pub gallery_id: GalleryId,
    pub current_step: WorkflowStep,
    pub status: WorkflowStatus,

    /// Provisional, non-exclusive picks from the shared pool.
    pub claimed: BTreeSet<MediaId>,

    /// Photos chosen for retouching.
    pub retouch: BTreeSet<MediaId>,

    /// The single photo chosen for the final tablo.
    pub final_media: Option<MediaId>,

    pub cart_comment: Option<String>,

    /// Optimistic concurrency token. Incremented by the store on every save.
    pub version: u64,

    pub updated_at: DateTime<Utc>,
}

impl WorkflowProgress {
    /// Creates fresh progress at the claiming step with empty selections.
    pub fn new(user_id: UserId, gallery_id: GalleryId) -> Self {
        WorkflowProgress {
            user_id,
            gallery_id,
            current_step: WorkflowStep::Claiming,
            status: WorkflowStatus::InProgress,
            claimed: BTreeSet::new(),
            retouch: BTreeSet::new(),
            final_media: None,
            cart_comment: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Returns true once finalization has succeeded.
    pub fn is_finalized(&self) -> bool {
        matches!(self.status, WorkflowStatus::Finalized(_))
    }

    /// Returns the finalization record, if finalized.
    pub fn finalized(&self) -> Option<&FinalizedRecord> {
        match &self.status {
            WorkflowStatus::InProgress => None,
            WorkflowStatus::Finalized(record) => Some(record),
        }
    }

    /// Returns when the workflow was finalized.
    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized().map(|r| r.finalized_at)
    }

    /// The set the final photo must belong to: retouch picks if there are
    /// any, otherwise the claims.
    pub fn final_candidates(&self) -> &BTreeSet<MediaId> {
        if self.retouch.is_empty() {
            &self.claimed
        } else {
            &self.retouch
        }
    }

    /// Checks the subset and membership invariants.
    pub fn invariants_hold(&self) -> bool {
        let subset = self.retouch.is_subset(&self.claimed);
        let final_ok = self
            .final_media
            .is_none_or(|m| self.final_candidates().contains(&m));
        subset && final_ok
    }

    /// Updates the `updated_at` timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
