//! Cascade invalidation of downstream selections.
//!
//! When an upstream selection changes, every downstream selection is
//! intersected with the new upstream set. Nothing is dropped silently: the
//! returned `CascadeNotice` lists every retouch pick removed and whether the
//! final photo had to be cleared.
//!
//! The cascade is transitive in a single pass: shrinking the claims can remove
//! retouch picks, and the final photo is then checked against the *resulting*
//! retouch set (or the claims, once the retouch set is empty).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{MediaId, WorkflowProgress};

/// What a cascade removed from downstream selections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeNotice {
    /// Retouch picks that were removed because they are no longer claimed.
    pub removed_from_retouch: Vec<MediaId>,

    /// True if the final photo was cleared.
    pub final_cleared: bool,

    /// The final photo that was cleared, if any.
    pub cleared_final: Option<MediaId>,
}

impl CascadeNotice {
    /// Returns true if the cascade removed anything.
    pub fn is_empty(&self) -> bool {
        self.removed_from_retouch.is_empty() && !self.final_cleared
    }
}

/// Replaces the claimed set and prunes retouch picks and the final photo.
pub fn on_claimed_changed(
    mut progress: WorkflowProgress,
    new_claimed: BTreeSet<MediaId>,
) -> (WorkflowProgress, CascadeNotice) {
    let removed_from_retouch: Vec<MediaId> =
        progress.retouch.difference(&new_claimed).copied().collect();
    progress.retouch.retain(|id| new_claimed.contains(id));
    progress.claimed = new_claimed;

    let cleared_final = prune_final(&mut progress);

    let notice = CascadeNotice {
        removed_from_retouch,
        final_cleared: cleared_final.is_some(),
        cleared_final,
    };
    (progress, notice)
}

/// Replaces the retouch set and clears the final photo if it no longer fits.
///
/// The caller is responsible for `new_retouch ⊆ claimed`; see
/// `validate_selection`.
pub fn on_retouch_changed(
    mut progress: WorkflowProgress,
    new_retouch: BTreeSet<MediaId>,
) -> (WorkflowProgress, CascadeNotice) {
    debug_assert!(new_retouch.is_subset(&progress.claimed));
    progress.retouch = new_retouch;

    let cleared_final = prune_final(&mut progress);

    let notice = CascadeNotice {
        removed_from_retouch: Vec::new(),
        final_cleared: cleared_final.is_some(),
        cleared_final,
    };
    (progress, notice)
}

/// Clears the final photo if it is no longer a valid candidate.
///
/// Returns the cleared id.
fn prune_final(progress: &mut WorkflowProgress) -> Option<MediaId> {
    let current = progress.final_media?;
    if progress.final_candidates().contains(&current) {
        return None;
    }
    progress.final_media = None;
    Some(current)
}
