//! Snapshot persistence
//!
//! A snapshot is JSON on disk. The digest is SHA-256 over the serialized
//! history records, so edits to the transcript are detected on load.

use std::path::{Path, PathBuf};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::SnapshotError;
use crate::types::{SessionSnapshot, TurnRecord, SNAPSHOT_VERSION};

/// Hex SHA-256 over the history records
pub fn history_digest(history: &[TurnRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in history {
        // Field order is fixed by the struct, so this is canonical
        match serde_json::to_vec(record) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(record.text.as_bytes()),
        }
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// File name for a snapshot: `snap_<taken_at>_<digest prefix>.json`
pub fn snapshot_file_name(snapshot: &SessionSnapshot) -> String {
    let stamp: String = snapshot
        .taken_at
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(14)
        .collect();
    let prefix: String = snapshot.digest.chars().take(8).collect();
    format!("snap_{}_{}.json", stamp, prefix)
}

/// Save snapshot to `dir` (created if missing)
pub fn save_snapshot(snapshot: &SessionSnapshot, dir: impl AsRef<Path>) -> Result<PathBuf, SnapshotError> {
    let dir = dir.as_ref();
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::create_dir_all(dir)?;

    let path = dir.join(snapshot_file_name(snapshot));
    std::fs::write(&path, json)?;
    info!(path = %path.display(), turns = snapshot.history.len(), "snapshot saved");
    Ok(path)
}

/// Load snapshot from file
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<SessionSnapshot, SnapshotError> {
    let json = std::fs::read_to_string(path.as_ref())?;
    let snapshot = serde_json::from_str(&json)?;
    debug!(path = %path.as_ref().display(), "snapshot loaded");
    Ok(snapshot)
}

/// Load and check version, non-empty history and digest
pub fn load_and_validate_snapshot(path: impl AsRef<Path>) -> Result<SessionSnapshot, SnapshotError> {
    let snapshot = load_snapshot(path)?;
    validate_snapshot(&snapshot)?;
    Ok(snapshot)
}

pub fn validate_snapshot(snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    if snapshot.history.is_empty() {
        return Err(SnapshotError::Empty);
    }
    let computed = history_digest(&snapshot.history);
    if computed != snapshot.digest {
        return Err(SnapshotError::DigestMismatch {
            expected: snapshot.digest.clone(),
            computed,
        });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
