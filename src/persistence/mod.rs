//! Durable storage primitives.
//!
//! Two building blocks back the file-based adapters:
//! - **Event log**: append-only JSON Lines journal of pool ownership changes,
//!   replayed on startup (torn tails are truncated)
//! - **Records**: one JSON file per progress record, written atomically
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   pool.jsonl                        # pool journal (JSON Lines)
//!   progress/<gallery>/<user>.json    # one record per (user, gallery)
//! ```
//!
//! All critical writes fsync both the file and, for renames, the directory.

pub mod event;
pub mod log;
pub mod record;

pub use event::{PoolEvent, PoolEventPayload, ReleaseReason};
pub use log::{EventLog, EventLogError};
pub use record::{RecordError, SCHEMA_VERSION, save_record_atomic, try_load_record};
