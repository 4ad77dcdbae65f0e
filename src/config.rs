//! Engine configuration.
//!
//! # Layout
//!
//! Everything lives under one state directory:
//! - `progress/<gallery>/<user>.json`: workflow progress records
//! - `pool.jsonl`: the pool journal
//!
//! # Environment
//!
//! - `TABLO_STATE_DIR`: state directory (default `./tablo-state`)
//! - `TABLO_SYNC_JOURNAL`: `0`/`false` disables fsync of journal events
//!   (default on; only for tests and throwaway setups)

use std::path::{Path, PathBuf};

/// Default state directory, relative to the working directory.
const DEFAULT_STATE_DIR: &str = "tablo-state";

/// Environment variable naming the state directory.
pub const STATE_DIR_VAR: &str = "TABLO_STATE_DIR";

/// Environment variable toggling journal fsync.
pub const SYNC_JOURNAL_VAR: &str = "TABLO_SYNC_JOURNAL";

/// Configuration for the storage adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding progress records and the pool journal.
    pub state_dir: PathBuf,

    /// Whether critical journal events are fsync'd before they take effect.
    ///
    /// Default: true.
    pub sync_journal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at `state_dir` with journal fsync on.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        EngineConfig {
            state_dir: state_dir.into(),
            sync_journal: true,
        }
    }

    /// Enables or disables journal fsync.
    pub fn with_sync_journal(mut self, sync_journal: bool) -> Self {
        self.sync_journal = sync_journal;
        self
    }

    /// Creates a configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary variable lookup.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let state_dir = lookup(STATE_DIR_VAR)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string());
        let sync_journal = lookup(SYNC_JOURNAL_VAR)
            .and_then(|s| parse_flag(&s))
            .unwrap_or(true);

        EngineConfig {
            state_dir: PathBuf::from(state_dir),
            sync_journal,
        }
    }

    /// Returns the root of the progress records.
    pub fn progress_dir(&self) -> PathBuf {
        self.state_dir.join("progress")
    }

    /// Returns the pool journal file.
    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join("pool.jsonl")
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
