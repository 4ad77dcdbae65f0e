//! Step navigation for the selection workflow.
//!
//! Pure functions for computing adjacent legal steps and deciding whether a
//! move between steps is allowed. Customers skip `Registration` in both
//! directions, so "next" and "previous" are computed over the steps the role
//! may actually occupy rather than by index ± 1.

use crate::types::{Role, WorkflowProgress, WorkflowStep};

/// Error returned when a step move is not allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The workflow is finalized; no navigation is accepted.
    Finalized,

    /// The role may never occupy the target step.
    StepNotAllowedForRole { step: WorkflowStep, role: Role },

    /// A step between the current and target step has unmet exit criteria.
    ExitCriteriaUnmet {
        step: WorkflowStep,
        requirement: &'static str,
    },

    /// `Completed` is reached only through finalization.
    FinalizeRequired,

    /// There is no legal step in the requested direction.
    NoAdjacentStep {
        from: WorkflowStep,
        direction: Direction,
    },
}

/// Direction of a relative step move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::Finalized => {
                write!(f, "Workflow is finalized and can no longer be navigated")
            }
            TransitionError::StepNotAllowedForRole { step, role } => {
                write!(f, "A {} cannot enter the {} step", role, step)
            }
            TransitionError::ExitCriteriaUnmet { step, requirement } => {
                write!(f, "Cannot leave the {} step: {}", step, requirement)
            }
            TransitionError::FinalizeRequired => {
                write!(f, "The completed step is only reachable by finalizing")
            }
            TransitionError::NoAdjacentStep { from, direction } => {
                write!(f, "No step {} of {}", direction, from)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// Returns the next step the role may occupy after `current`.
pub fn next_step(current: WorkflowStep, role: Role) -> Option<WorkflowStep> {
    WorkflowStep::ALL
        .into_iter()
        .skip(current.index() + 1)
        .find(|step| step.allows_role(role))
}

/// Returns the closest earlier step the role may occupy.
pub fn previous_step(current: WorkflowStep, role: Role) -> Option<WorkflowStep> {
    WorkflowStep::ALL
        .into_iter()
        .take(current.index())
        .rev()
        .find(|step| step.allows_role(role))
}

/// Checks the exit criteria of a step against the progress record.
///
/// Returns the unmet requirement, if any.
pub fn exit_requirement(step: WorkflowStep, progress: &WorkflowProgress) -> Option<&'static str> {
    match step {
        WorkflowStep::Claiming if progress.claimed.is_empty() => {
            Some("at least one photo must be claimed")
        }
        WorkflowStep::Tablo | WorkflowStep::Completed => Some("finalize the selection instead"),
        _ => None,
    }
}

/// Decides whether the progress may move to `target`.
///
/// - Finalized progress never moves.
/// - The role must be allowed to occupy `target`.
/// - Moving backward (or staying put) is always allowed.
/// - Moving forward requires the exit criteria of every step the role
///   passes through, starting with the current one.
pub fn can_advance(
    progress: &WorkflowProgress,
    target: WorkflowStep,
    role: Role,
) -> Result<(), TransitionError> {
    if progress.is_finalized() {
        return Err(TransitionError::Finalized);
    }

    if target == WorkflowStep::Completed {
        return Err(TransitionError::FinalizeRequired);
    }

    if !target.allows_role(role) {
        return Err(TransitionError::StepNotAllowedForRole { step: target, role });
    }

    if target <= progress.current_step {
        return Ok(());
    }

    let mut step = progress.current_step;
    while step < target {
        if let Some(requirement) = exit_requirement(step, progress) {
            return Err(TransitionError::ExitCriteriaUnmet { step, requirement });
        }
        step = match next_step(step, role) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(())
}

/// Resolves a relative move into a concrete target step.
pub fn adjacent_step(
    current: WorkflowStep,
    role: Role,
    direction: Direction,
) -> Result<WorkflowStep, TransitionError> {
    let step = match direction {
        Direction::Forward => next_step(current, role),
        Direction::Backward => previous_step(current, role),
    };
    step.ok_or(TransitionError::NoAdjacentStep {
        from: current,
        direction,
    })
}
