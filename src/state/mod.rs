//! Pure workflow logic.
//!
//! This module contains the functional core: step navigation, payload
//! validation and cascade invalidation. Nothing here touches storage or the
//! shared pool; all I/O happens in the stores and the reservation coordinator.

pub mod cascade;
pub mod steps;
pub mod validation;

// Re-export commonly used types and functions
pub use cascade::{CascadeNotice, on_claimed_changed, on_retouch_changed};
pub use steps::{Direction, TransitionError, adjacent_step, can_advance, next_step, previous_step};
pub use validation::{
    Selection, SelectionContext, SelectionError, ValidatedSelection, Violation, ViolationRule,
    check_final, validate_selection,
};
