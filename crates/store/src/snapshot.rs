// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for fast startup.
//!
//! A snapshot is the complete table state at a journal sequence number,
//! zstd-compressed. Recovery loads the snapshot and replays journal
//! entries past `seq`. Writes go through a temp file + rename, and the
//! snapshot being replaced is aged into a numbered generation file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tables::Tables;

/// Current snapshot schema version.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

/// Previous snapshot generations kept on disk (`<name>.1` newest).
const BACKUP_GENERATIONS: u32 = 3;

/// Errors from snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot corrupt: {0}")]
    Corrupt(String),

    #[error("unsupported snapshot version {0}")]
    Version(u32),
}

/// The complete table state at a point in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version for migrations
    #[serde(rename = "v")]
    pub version: u32,
    /// Journal sequence covered by this snapshot
    pub seq: u64,
    pub tables: Tables,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, tables: Tables) -> Self {
        Self { version: CURRENT_SNAPSHOT_VERSION, seq, tables, created_at: Utc::now() }
    }

    /// Load the snapshot if one exists.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }
        let compressed = fs::read(path)?;
        let bytes = zstd::decode_all(compressed.as_slice())
            .map_err(|e| SnapshotError::Corrupt(format!("decompress: {e}")))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| SnapshotError::Corrupt(format!("decode: {e}")))?;
        if snapshot.version != CURRENT_SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(snapshot.version));
        }
        Ok(Some(snapshot))
    }

    /// Write atomically. The snapshot being replaced is kept as the
    /// newest of [`BACKUP_GENERATIONS`] numbered generation files;
    /// whatever was aged past the cap is gone.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(self)
            .map_err(|e| SnapshotError::Corrupt(format!("encode: {e}")))?;
        let compressed = zstd::encode_all(bytes.as_slice(), ZSTD_LEVEL)
            .map_err(|e| SnapshotError::Corrupt(format!("compress: {e}")))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &compressed)?;

        // Age every generation by one, then slot the outgoing snapshot
        // in as generation 1. Renames overwrite their destination, so
        // the oldest generation simply falls off the end. Backups are
        // best effort; only the final rename decides success.
        if path.exists() {
            for n in (1..BACKUP_GENERATIONS).rev() {
                let _ = fs::rename(generation_path(path, n), generation_path(path, n + 1));
            }
            let _ = fs::rename(path, generation_path(path, 1));
        }

        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// `store.snapshot` -> `store.snapshot.N`.
fn generation_path(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}
