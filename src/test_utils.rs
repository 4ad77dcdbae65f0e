//! Shared test utilities and arbitrary generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use crate::types::{GalleryId, MediaId, Role, UserId, WorkflowProgress};

/// Media ids drawn from a small range so sets overlap often.
pub fn arb_media_id() -> impl Strategy<Value = MediaId> {
    (0u64..16).prop_map(MediaId)
}

pub fn arb_media_set(max_len: usize) -> impl Strategy<Value = BTreeSet<MediaId>> {
    prop::collection::btree_set(arb_media_id(), 0..=max_len)
}

pub fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Guest), Just(Role::Customer)]
}

/// In-progress record whose selections satisfy the subset invariants.
///
/// Retouch picks are a subset of the claims and the final photo, when set,
/// is a valid candidate. The step is always `Claiming` so role rules hold for
/// every role.
pub fn arb_consistent_progress() -> impl Strategy<Value = WorkflowProgress> {
    (
        arb_media_set(12),
        prop::collection::vec(any::<bool>(), 16),
        any::<prop::sample::Index>(),
        any::<bool>(),
    )
        .prop_map(|(claimed, keep_mask, pick, has_final)| {
            let retouch: BTreeSet<MediaId> = claimed
                .iter()
                .copied()
                .filter(|id| keep_mask[id.0 as usize % keep_mask.len()])
                .collect();

            let mut progress = WorkflowProgress::new(UserId(1), GalleryId(1));
            progress.claimed = claimed;
            progress.retouch = retouch;

            let candidates: Vec<MediaId> = progress.final_candidates().iter().copied().collect();
            if has_final && !candidates.is_empty() {
                progress.final_media = Some(*pick.get(&candidates));
            }
            progress
        })
}
