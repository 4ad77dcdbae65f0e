//! Tablo Select - claim and reservation engine for class photo galleries.
//!
//! Guests walk a fixed, step-gated workflow (claiming → registration →
//! retouch → tablo → completed) over a shared pool of photos. Selections stay
//! private to the guest until finalization turns them into exclusive
//! reservations, resolved per photo with compare-and-swap.

pub mod config;
pub mod error;
pub mod persistence;
pub mod reservation;
pub mod state;
pub mod store;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::EngineConfig;
pub use error::WorkflowError;
pub use reservation::{FinalizeResult, ReservationCoordinator, ReservationState};
pub use workflow::{Actor, Notice, SaveMode, WorkflowOrchestrator, WorkflowView};
