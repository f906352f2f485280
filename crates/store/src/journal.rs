// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only journal of table mutations.
//!
//! Frame format: 4-byte big-endian length prefix + JSON entry. Every
//! append is flushed and fsynced before returning, which is what makes
//! store writes durable-before-ack. A torn final frame (power loss mid
//! write) is detected on open, logged, and truncated away; anything
//! else that fails to decode is corruption and surfaces as an error.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use vea_core::{AppId, ApplicationRecord, RuntimeStateRecord};

/// Upper bound on a single journal frame. Application records carry
/// inline artifacts, so this is generous; anything larger is a decode
/// error, not data.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// One durable table mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    UpsertApplication { record: Box<ApplicationRecord> },
    DeleteApplication { app_id: AppId },
    UpsertRuntimeState { state: RuntimeStateRecord },
    ClearRuntimeState { app_id: AppId },
}

/// Errors from journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal corrupt at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

/// Append-only journal file.
#[derive(Debug)]
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Sequence number of the last appended entry (0 = empty).
    seq: u64,
}

impl Journal {
    /// Open (creating if needed) and replay all intact entries.
    ///
    /// Returns the journal positioned for appending plus the replayed
    /// entries in write order. `base_seq` is the snapshot sequence the
    /// journal continues from.
    pub fn open(path: &Path, base_seq: u64) -> Result<(Self, Vec<JournalEntry>), JournalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().read(true).create(true).append(true).open(path)?;

        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;

        let (entries, good_len) = replay(&bytes, path)?;
        if (good_len as usize) < bytes.len() {
            // Torn tail from an interrupted append; drop it.
            warn!(
                path = %path.display(),
                kept = good_len,
                dropped = bytes.len() as u64 - good_len,
                "truncating torn journal tail"
            );
            file.set_len(good_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        let seq = base_seq + entries.len() as u64;
        Ok((Self { writer: BufWriter::new(file), path: path.to_path_buf(), seq }, entries))
    }

    /// Append an entry, durable before return. Returns the new sequence.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<u64, JournalError> {
        let payload = serde_json::to_vec(entry).map_err(|e| JournalError::Corrupt {
            offset: 0,
            reason: format!("encode: {e}"),
        })?;
        let len = payload.len() as u32;
        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.seq += 1;
        Ok(self.seq)
    }

    /// Sequence number of the last durable entry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Drop all journaled entries (called after a snapshot covers them).
    pub fn reset(&mut self, base_seq: u64) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().set_len(0)?;
        self.writer.get_ref().sync_data()?;
        self.seq = base_seq;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode frames from `bytes`; returns entries plus the byte length of
/// the intact prefix.
fn replay(bytes: &[u8], path: &Path) -> Result<(Vec<JournalEntry>, u64), JournalError> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < 4 {
            break; // torn length prefix
        }
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&bytes[offset..offset + 4]);
        let len = u32::from_be_bytes(len_buf);
        if len == 0 || len > MAX_FRAME_BYTES {
            return Err(JournalError::Corrupt {
                offset: offset as u64,
                reason: format!("implausible frame length {len} in {}", path.display()),
            });
        }
        if remaining - 4 < len as usize {
            break; // torn payload
        }
        let payload = &bytes[offset + 4..offset + 4 + len as usize];
        let entry = serde_json::from_slice(payload).map_err(|e| JournalError::Corrupt {
            offset: offset as u64,
            reason: format!("decode: {e}"),
        })?;
        entries.push(entry);
        offset += 4 + len as usize;
    }

    Ok((entries, offset as u64))
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
