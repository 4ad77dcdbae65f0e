//! Atomic JSON record files.
//!
//! Records are written with the write-to-temp-then-rename pattern:
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename to `<path>`
//! 4. fsync the parent directory
//!
//! Readers therefore always see either the old or the new record, never a
//! partial write. Each record is wrapped in an envelope carrying a schema
//! version so incompatible files are refused instead of misread.
//!
//! Directory fsync is needed because creating or renaming a file updates the
//! directory entry, and that entry may not survive a power loss otherwise.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur while reading or writing a record file.
#[derive(Debug, Error)]
pub enum RecordError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for record operations.
pub type Result<T> = std::result::Result<T, RecordError>;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema_version: u32,
    record: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    record: T,
}

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created or renamed in it are durable.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Serializes a record to its on-disk bytes.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec_pretty(&EnvelopeRef {
        schema_version: SCHEMA_VERSION,
        record,
    })?;
    Ok(bytes)
}

/// Saves a record atomically to disk.
pub fn save_record_atomic<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = encode_record(record)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Loads a record, returning None if the file doesn't exist.
///
/// Other errors (malformed JSON, schema mismatch) are propagated.
pub fn try_load_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    if envelope.schema_version != SCHEMA_VERSION {
        return Err(RecordError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: envelope.schema_version,
        });
    }

    Ok(Some(envelope.record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b.json");
        let sample = Sample {
            name: "x".to_string(),
            count: 3,
        };

        save_record_atomic(&path, &sample).unwrap();
        let loaded: Option<Sample> = try_load_record(&path).unwrap();

        assert_eq!(loaded, Some(sample));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded: Option<Sample> = try_load_record(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 99, "record": {"name": "x", "count": 1}}"#,
        )
        .unwrap();

        let result: Result<Option<Sample>> = try_load_record(&path);
        assert!(matches!(
            result,
            Err(RecordError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: 99
            })
        ));
    }

    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        let result = fsync_dir(Path::new("/nonexistent/path/that/does/not/exist"));
        assert!(result.is_err());
    }
}
