//! Validation of selection payloads against the subset invariants.
//!
//! Set payloads (claims, retouch picks) are cleaned rather than rejected: ids
//! that break a membership rule are dropped and reported as violations so the
//! caller can tell the user what was ignored. Two things are rejected outright:
//! a retouch set over the gallery limit, and a final photo that is not a valid
//! candidate (there is nothing left to save once it is dropped).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Gallery, MediaId, WorkflowProgress};

/// A selection payload for one of the selecting steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Claim(BTreeSet<MediaId>),
    Retouch(BTreeSet<MediaId>),
    Final(MediaId),
}

impl Selection {
    /// Returns the selected ids; a final photo is a single-element set.
    pub fn into_media(self) -> BTreeSet<MediaId> {
        match self {
            Selection::Claim(ids) | Selection::Retouch(ids) => ids,
            Selection::Final(id) => BTreeSet::from([id]),
        }
    }
}

/// The rule a dropped media id violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationRule {
    /// The id is not part of the gallery's pool.
    NotInGallery,

    /// Another user already holds an exclusive reservation on the id.
    ReservedByOther,

    /// Retouch and final picks must come from the claimed set.
    NotClaimed,

    /// With retouch picks present, the final photo must be one of them.
    NotInRetouch,
}

impl std::fmt::Display for ViolationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationRule::NotInGallery => write!(f, "not in this gallery"),
            ViolationRule::ReservedByOther => write!(f, "already reserved by someone else"),
            ViolationRule::NotClaimed => write!(f, "not among the claimed photos"),
            ViolationRule::NotInRetouch => write!(f, "not among the retouch photos"),
        }
    }
}

/// A single media id dropped from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub media_id: MediaId,
    pub rule: ViolationRule,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is {}", self.media_id, self.rule)
    }
}

/// The cleaned payload plus everything that was dropped from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSelection {
    pub cleaned: Selection,
    pub violations: Vec<Violation>,
}

/// Error returned when a payload is rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// More retouch photos than the gallery allows.
    LimitExceeded { limit: usize, requested: usize },

    /// The final photo is not a valid candidate.
    InvalidFinal(Violation),
}

impl std::fmt::Display for SelectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionError::LimitExceeded { limit, requested } => {
                write!(
                    f,
                    "{} retouch photos selected but at most {} are allowed",
                    requested, limit
                )
            }
            SelectionError::InvalidFinal(violation) => {
                write!(f, "Final photo {}", violation)
            }
        }
    }
}

impl std::error::Error for SelectionError {}

/// Gallery facts needed to validate a payload.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub gallery: &'a Gallery,

    /// Items of the gallery exclusively reserved by users other than the actor.
    pub reserved_by_others: &'a BTreeSet<MediaId>,
}

/// Validates a selection payload against the current progress.
///
/// Claims are checked against the gallery pool and existing reservations;
/// retouch picks against the claims and the gallery limit; the final photo
/// against retouch picks (or claims when no retouch picks exist).
pub fn validate_selection(
    selection: Selection,
    progress: &WorkflowProgress,
    context: SelectionContext<'_>,
) -> Result<ValidatedSelection, SelectionError> {
    match selection {
        Selection::Claim(ids) => {
            let (kept, violations) = clean_claim(ids, context);
            Ok(ValidatedSelection {
                cleaned: Selection::Claim(kept),
                violations,
            })
        }
        Selection::Retouch(ids) => {
            let (kept, violations) = clean_retouch(ids, progress, context)?;
            Ok(ValidatedSelection {
                cleaned: Selection::Retouch(kept),
                violations,
            })
        }
        Selection::Final(id) => {
            check_final(id, progress)?;
            Ok(ValidatedSelection {
                cleaned: Selection::Final(id),
                violations: Vec::new(),
            })
        }
    }
}

/// Drops claimed ids that are not in the gallery or already reserved by others.
fn clean_claim(
    ids: BTreeSet<MediaId>,
    context: SelectionContext<'_>,
) -> (BTreeSet<MediaId>, Vec<Violation>) {
    partition(ids, |id| {
        if !context.gallery.contains(id) {
            Some(ViolationRule::NotInGallery)
        } else if context.reserved_by_others.contains(&id) {
            Some(ViolationRule::ReservedByOther)
        } else {
            None
        }
    })
}

/// Drops retouch ids that are not claimed, then enforces the gallery limit
/// on what is left.
fn clean_retouch(
    ids: BTreeSet<MediaId>,
    progress: &WorkflowProgress,
    context: SelectionContext<'_>,
) -> Result<(BTreeSet<MediaId>, Vec<Violation>), SelectionError> {
    let (kept, violations) = partition(ids, |id| {
        (!progress.claimed.contains(&id)).then_some(ViolationRule::NotClaimed)
    });
    check_retouch_limit(kept.len(), context.gallery.max_retouch_photos)?;
    Ok((kept, violations))
}

/// Checks that `id` is a valid final photo for the progress.
pub fn check_final(id: MediaId, progress: &WorkflowProgress) -> Result<(), SelectionError> {
    let rule = if progress.retouch.is_empty() {
        (!progress.claimed.contains(&id)).then_some(ViolationRule::NotClaimed)
    } else {
        (!progress.retouch.contains(&id)).then_some(ViolationRule::NotInRetouch)
    };
    match rule {
        Some(rule) => Err(SelectionError::InvalidFinal(Violation { media_id: id, rule })),
        None => Ok(()),
    }
}

/// Rejects a retouch set larger than the gallery allows.
fn check_retouch_limit(requested: usize, limit: usize) -> Result<(), SelectionError> {
    if requested > limit {
        return Err(SelectionError::LimitExceeded { limit, requested });
    }
    Ok(())
}

/// Splits ids into those that pass and violations for those that don't.
fn partition(
    ids: BTreeSet<MediaId>,
    rule_for: impl Fn(MediaId) -> Option<ViolationRule>,
) -> (BTreeSet<MediaId>, Vec<Violation>) {
    let mut kept = BTreeSet::new();
    let mut violations = Vec::new();
    for id in ids {
        match rule_for(id) {
            Some(rule) => violations.push(Violation { media_id: id, rule }),
            None => {
                kept.insert(id);
            }
        }
    }
    (kept, violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GalleryId, UserId};

    fn ids(raw: &[u64]) -> BTreeSet<MediaId> {
        raw.iter().copied().map(MediaId).collect()
    }

    fn gallery(max_retouch: usize) -> Gallery {
        Gallery::new(GalleryId(1), max_retouch, (1..=10).map(MediaId))
    }

    fn progress(claimed: &[u64], retouch: &[u64]) -> WorkflowProgress {
        let mut progress = WorkflowProgress::new(UserId(1), GalleryId(1));
        progress.claimed = ids(claimed);
        progress.retouch = ids(retouch);
        progress
    }

    mod claims {
        use super::*;

        #[test]
        fn drops_foreign_and_reserved_ids() {
            let gallery = gallery(5);
            let reserved = ids(&[3]);
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };

            let result =
                validate_selection(Selection::Claim(ids(&[1, 3, 42])), &progress(&[], &[]), context)
                    .unwrap();

            assert_eq!(result.cleaned, Selection::Claim(ids(&[1])));
            assert_eq!(
                result.violations,
                vec![
                    Violation {
                        media_id: MediaId(3),
                        rule: ViolationRule::ReservedByOther
                    },
                    Violation {
                        media_id: MediaId(42),
                        rule: ViolationRule::NotInGallery
                    },
                ]
            );
        }

        #[test]
        fn empty_claim_is_legal() {
            let gallery = gallery(5);
            let reserved = BTreeSet::new();
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };

            let result =
                validate_selection(Selection::Claim(BTreeSet::new()), &progress(&[1], &[]), context)
                    .unwrap();
            assert_eq!(result.cleaned, Selection::Claim(BTreeSet::new()));
            assert!(result.violations.is_empty());
        }
    }

    mod retouch {
        use super::*;

        #[test]
        fn filters_unclaimed_ids() {
            let gallery = gallery(5);
            let reserved = BTreeSet::new();
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };

            let result = validate_selection(
                Selection::Retouch(ids(&[1, 2, 9])),
                &progress(&[1, 2, 3], &[]),
                context,
            )
            .unwrap();

            assert_eq!(result.cleaned, Selection::Retouch(ids(&[1, 2])));
            assert_eq!(
                result.violations,
                vec![Violation {
                    media_id: MediaId(9),
                    rule: ViolationRule::NotClaimed
                }]
            );
        }

        #[test]
        fn limit_boundary() {
            let gallery = gallery(5);
            let reserved = BTreeSet::new();
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };
            let claimed: Vec<u64> = (1..=10).collect();
            let progress = progress(&claimed, &[]);

            let five = validate_selection(Selection::Retouch(ids(&[1, 2, 3, 4, 5])), &progress, context);
            assert!(five.is_ok());

            let six =
                validate_selection(Selection::Retouch(ids(&[1, 2, 3, 4, 5, 6])), &progress, context);
            assert_eq!(
                six,
                Err(SelectionError::LimitExceeded {
                    limit: 5,
                    requested: 6
                })
            );
        }
    }

    mod final_photo {
        use super::*;

        #[test]
        fn must_be_in_retouch_when_present() {
            let gallery = gallery(5);
            let reserved = BTreeSet::new();
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };
            let progress = progress(&[1, 2, 3], &[2]);

            let result = validate_selection(Selection::Final(MediaId(1)), &progress, context);
            assert_eq!(
                result,
                Err(SelectionError::InvalidFinal(Violation {
                    media_id: MediaId(1),
                    rule: ViolationRule::NotInRetouch
                }))
            );
            assert!(validate_selection(Selection::Final(MediaId(2)), &progress, context).is_ok());
        }

        #[test]
        fn falls_back_to_claims() {
            let gallery = gallery(5);
            let reserved = BTreeSet::new();
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };
            let progress = progress(&[1, 2, 3], &[]);

            assert!(validate_selection(Selection::Final(MediaId(3)), &progress, context).is_ok());
            assert!(matches!(
                validate_selection(Selection::Final(MediaId(4)), &progress, context),
                Err(SelectionError::InvalidFinal(Violation {
                    rule: ViolationRule::NotClaimed,
                    ..
                }))
            ));
        }

        #[test]
        fn cleaned_final_yields_single_id() {
            let gallery = gallery(5);
            let reserved = BTreeSet::new();
            let context = SelectionContext {
                gallery: &gallery,
                reserved_by_others: &reserved,
            };

            let result =
                validate_selection(Selection::Final(MediaId(2)), &progress(&[2], &[]), context)
                    .unwrap();
            assert_eq!(result.cleaned.into_media(), ids(&[2]));
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Cleaned retouch picks are always a subset of the claims.
            #[test]
            fn cleaned_retouch_is_subset_of_claims(
                claimed in prop::collection::btree_set(1u64..20, 0..10),
                requested in prop::collection::btree_set(1u64..20, 0..10),
            ) {
                let gallery = Gallery::new(GalleryId(1), 20, (1..20).map(MediaId));
                let reserved = BTreeSet::new();
                let context = SelectionContext { gallery: &gallery, reserved_by_others: &reserved };
                let mut progress = WorkflowProgress::new(UserId(1), GalleryId(1));
                progress.claimed = claimed.iter().copied().map(MediaId).collect();

                let requested: BTreeSet<MediaId> = requested.into_iter().map(MediaId).collect();
                let result = validate_selection(Selection::Retouch(requested.clone()), &progress, context).unwrap();
                let Selection::Retouch(cleaned) = result.cleaned else {
                    panic!("expected retouch selection");
                };

                prop_assert!(cleaned.is_subset(&progress.claimed));
                prop_assert_eq!(cleaned.len() + result.violations.len(), requested.len());
            }
        }
    }
}
