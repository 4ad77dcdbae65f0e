//! Notices returned alongside the workflow state.

use serde::{Deserialize, Serialize};

use crate::state::{CascadeNotice, Violation};
use crate::types::{MediaId, WorkflowProgress};

/// Claimed photos another user reserved first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeConflictNotice {
    pub conflicted_media_ids: Vec<MediaId>,
}

/// Something the user should be told about their last action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Downstream selections were pruned after an upstream change.
    Cascade(CascadeNotice),

    /// Ids that were dropped from a set payload.
    SelectionFiltered { violations: Vec<Violation> },

    /// Finalization succeeded but lost some claimed photos.
    FinalizeConflict(FinalizeConflictNotice),
}

/// The complete state after an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub progress: WorkflowProgress,
    pub notices: Vec<Notice>,
}

impl WorkflowView {
    pub fn new(progress: WorkflowProgress) -> Self {
        WorkflowView {
            progress,
            notices: Vec::new(),
        }
    }

    /// Adds a filtered-selection notice if anything was dropped.
    pub(crate) fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        if !violations.is_empty() {
            self.notices.push(Notice::SelectionFiltered { violations });
        }
        self
    }

    /// Adds a cascade notice if the cascade removed anything.
    pub(crate) fn with_cascade(mut self, cascade: CascadeNotice) -> Self {
        if !cascade.is_empty() {
            self.notices.push(Notice::Cascade(cascade));
        }
        self
    }

    /// Returns the cascade notice, if any.
    pub fn cascade(&self) -> Option<&CascadeNotice> {
        self.notices.iter().find_map(|n| match n {
            Notice::Cascade(c) => Some(c),
            _ => None,
        })
    }

    /// Returns the dropped ids, if any.
    pub fn filtered(&self) -> Option<&[Violation]> {
        self.notices.iter().find_map(|n| match n {
            Notice::SelectionFiltered { violations } => Some(violations.as_slice()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ViolationRule;

    #[test]
    fn notices_are_tagged_by_kind() {
        let notice = Notice::SelectionFiltered {
            violations: vec![Violation {
                media_id: MediaId(3),
                rule: ViolationRule::ReservedByOther,
            }],
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "selection_filtered");
        assert_eq!(json["violations"][0]["rule"], "reserved_by_other");

        let conflict = Notice::FinalizeConflict(FinalizeConflictNotice {
            conflicted_media_ids: vec![MediaId(2)],
        });
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["kind"], "finalize_conflict");
        assert_eq!(json["conflicted_media_ids"][0], 2);
    }

    #[test]
    fn empty_notices_are_not_added() {
        use crate::types::{GalleryId, UserId};

        let view = WorkflowView::new(WorkflowProgress::new(UserId(1), GalleryId(1)))
            .with_violations(Vec::new())
            .with_cascade(CascadeNotice::default());
        assert!(view.notices.is_empty());
        assert!(view.cascade().is_none());
        assert!(view.filtered().is_none());
    }
}
