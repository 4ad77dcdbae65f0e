//! Public operations of the selection workflow.
//!
//! Callers identify themselves with an [`Actor`] and get back a complete
//! [`WorkflowView`]: the stored progress plus any [`Notice`] they should
//! surface to the user.
//!
//! # Module Structure
//!
//! - [`orchestrator`]: the operations, composing validation, cascade,
//!   storage and reservation
//! - [`notice`]: notices and the returned view

pub mod notice;
pub mod orchestrator;


pub use notice::{FinalizeConflictNotice, Notice, WorkflowView};
pub use orchestrator::{Actor, SaveMode, WorkflowOrchestrator};
