//! The pool journal: one `PoolEvent` per line, appended in sequence order.
//!
//! Replay keeps the longest valid prefix. A final line torn by a crash, or a
//! line breaking the sequence order, is cut off together with everything
//! after it.
//!
//! # Durability
//!
//! Reservations, reconciliation releases and gallery registrations are
//! fsync'd before the append returns. Rollback releases are not; they ride
//! along with the next synced event.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use super::event::{PoolEvent, PoolEventPayload};
use super::record::fsync_file;

/// Errors that can occur during event log operations.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;

/// An append-only event log.
///
/// The log tracks the next sequence number to assign.
pub struct EventLog {
    file: File,
    path: PathBuf,
    next_seq: u64,
    /// When false, critical events are not fsync'd either. Only for tests and
    /// throwaway state directories.
    sync_critical: bool,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("path", &self.path)
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl EventLog {
    /// Opens an existing log file or creates a new one, with a known next sequence number.
    ///
    /// Use this after calling `replay` to create a log ready for appending.
    pub fn open_with_seq(path: impl AsRef<Path>, next_seq: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        Ok(EventLog {
            file,
            path,
            next_seq,
            sync_critical: true,
        })
    }

    /// Replays the log and opens it for appending.
    ///
    /// Returns the log positioned after the last valid event, together with
    /// every event that was replayed.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<PoolEvent>)> {
        let (events, next_seq) = Self::replay(path.as_ref())?;
        let log = Self::open_with_seq(path, next_seq)?;
        Ok((log, events))
    }

    /// Disables fsync for critical events.
    pub fn without_sync(mut self) -> Self {
        self.sync_critical = false;
        self
    }

    /// Appends an event to the log.
    ///
    /// The event is assigned the next sequence number and the current timestamp.
    /// If the payload is critical, fsync is called immediately after writing.
    pub fn append(&mut self, payload: PoolEventPayload) -> Result<PoolEvent> {
        let event = PoolEvent {
            seq: self.next_seq,
            ts: Utc::now(),
            payload,
        };

        let json = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", json)?;

        if self.sync_critical && event.is_critical() {
            fsync_file(&self.file)?;
        }

        self.next_seq += 1;
        Ok(event)
    }

    /// Returns the next sequence number that will be assigned.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays every event, truncating any partial line at EOF.
    ///
    /// Returns `(events, next_seq)` where `next_seq` is max seq + 1.
    /// If the file doesn't exist or is empty, returns `(vec![], 0)`.
    ///
    /// # Truncation
    ///
    /// If a line doesn't parse (crash mid-write) or breaks sequence
    /// monotonicity, the file is truncated at the start of that line so the
    /// log always holds a valid prefix of events.
    pub fn replay(path: impl AsRef<Path>) -> Result<(Vec<PoolEvent>, u64)> {
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((vec![], 0)),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut events = Vec::new();
        let mut last_valid_pos = 0u64;
        let mut current_pos = 0u64;
        let mut max_seq: Option<u64> = None;

        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }

            current_pos += bytes_read as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                last_valid_pos = current_pos;
                continue;
            }

            // A line without its newline is a torn write even if it parses.
            if !line.ends_with('\n') {
                break;
            }

            match serde_json::from_str::<PoolEvent>(trimmed) {
                Ok(event) if max_seq.is_none_or(|prev| event.seq > prev) => {
                    max_seq = Some(event.seq);
                    events.push(event);
                    last_valid_pos = current_pos;
                }
                _ => break,
            }
        }

        if last_valid_pos < file_len {
            warn!(
                path = %path.display(),
                valid_bytes = last_valid_pos,
                file_len,
                "Truncating torn tail of event log"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(last_valid_pos)?;
            fsync_file(&file)?;
        }

        let next_seq = max_seq.map(|s| s + 1).unwrap_or(0);
        Ok((events, next_seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::event::ReleaseReason;
    use crate::types::{GalleryId, MediaId, UserId};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn reserved(media: u64, user: u64) -> PoolEventPayload {
        PoolEventPayload::ItemReserved {
            gallery: GalleryId(1),
            media: MediaId(media),
            user: UserId(user),
        }
    }

    fn arb_payload() -> impl Strategy<Value = PoolEventPayload> {
        prop_oneof![
            (1u64..100, 1u64..100).prop_map(|(m, u)| reserved(m, u)),
            (1u64..100, 1u64..100).prop_map(|(m, u)| PoolEventPayload::ItemReleased {
                gallery: GalleryId(1),
                media: MediaId(m),
                user: UserId(u),
                reason: ReleaseReason::Rollback,
            }),
            prop::collection::vec(1u64..100, 0..5).prop_map(|media| {
                PoolEventPayload::GalleryRegistered {
                    gallery: GalleryId(1),
                    max_retouch_photos: 5,
                    media: media.into_iter().map(MediaId).collect(),
                }
            }),
        ]
    }

    #[test]
    fn open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pool.jsonl");

        let (_log, events) = EventLog::open(&path).unwrap();
        assert!(path.exists());
        assert!(events.is_empty());
    }

    #[test]
    fn sequence_numbers_increment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        let (mut log, _) = EventLog::open(&path).unwrap();
        for i in 0..5 {
            let event = log.append(reserved(i, 1)).unwrap();
            assert_eq!(event.seq, i);
        }
        assert_eq!(log.next_seq(), 5);
    }

    #[test]
    fn reopen_continues_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        let (mut log, _) = EventLog::open(&path).unwrap();
        log.append(reserved(1, 1)).unwrap();
        log.append(reserved(2, 1)).unwrap();
        drop(log);

        let (mut log, events) = EventLog::open(&path).unwrap();
        assert_eq!(events.len(), 2);
        let event = log.append(reserved(3, 1)).unwrap();
        assert_eq!(event.seq, 2);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        let (mut log, _) = EventLog::open(&path).unwrap();
        log.append(reserved(1, 1)).unwrap();
        drop(log);
        let valid_len = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"seq":1,"ts":"2026-"#).unwrap();
        drop(file);

        let (events, next_seq) = EventLog::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(next_seq, 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
    }

    #[test]
    fn non_monotonic_sequence_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.jsonl");

        let first = serde_json::to_string(&PoolEvent::new(5, reserved(1, 1))).unwrap();
        let second = serde_json::to_string(&PoolEvent::new(5, reserved(2, 1))).unwrap();
        std::fs::write(&path, format!("{}\n{}\n", first, second)).unwrap();

        let (events, next_seq) = EventLog::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(next_seq, 6);
    }

    proptest! {
        /// Write N events, replay yields exactly N events in order.
        #[test]
        fn replay_returns_everything_written(payloads in prop::collection::vec(arb_payload(), 1..20)) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("pool.jsonl");

            let (log, _) = EventLog::open(&path).unwrap();
            let mut log = log.without_sync();
            let written: Vec<PoolEvent> =
                payloads.iter().map(|p| log.append(p.clone()).unwrap()).collect();
            drop(log);

            let (replayed, next_seq) = EventLog::replay(&path).unwrap();
            prop_assert_eq!(next_seq, payloads.len() as u64);
            prop_assert_eq!(replayed, written);
        }
    }
}
