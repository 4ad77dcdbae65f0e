//! Core domain types for the tablo selection engine.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod gallery;
pub mod ids;
pub mod progress;

// Re-export commonly used types at the module level
pub use gallery::{Gallery, Ownership};
pub use ids::{GalleryId, MediaId, UserId};
pub use progress::{FinalizedRecord, Role, WorkflowProgress, WorkflowStatus, WorkflowStep};
