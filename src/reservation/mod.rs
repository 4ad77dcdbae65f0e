//! Conversion of claims into exclusive reservations.
//!
//! All writes to the shared pool go through `ReservationCoordinator`:
//! - `finalize`: per-item compare-and-swap of a user's claims, with rollback
//! - `reservation_state` / `release_orphaned`: reconciliation of the pool
//!   against finalized progress after a crash

pub mod coordinator;
pub mod reconcile;


pub use coordinator::{FinalizeResult, ReservationCoordinator};
pub use reconcile::{OrphanedReservation, ReservationState};
