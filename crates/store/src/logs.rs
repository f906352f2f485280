// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-execution console log ring files.
//!
//! Console output is append-heavy and disposable, so it stays out of
//! the journal entirely: one JSONL file per execution under
//! `log/<app_id>/<execution_id>.log`, bounded by dropping the oldest
//! half when the ring cap is hit. Appends are total-ordered per
//! execution via a monotonically increasing offset.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which console stream a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Out,
    Err,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Out => write!(f, "out"),
            LogStream::Err => write!(f, "err"),
        }
    }
}

/// One console line as persisted and as served to `tail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    pub execution_id: String,
    pub stream: LogStream,
    pub offset: u64,
    pub ts: DateTime<Utc>,
    pub line: String,
}

/// Console log area under `data_dir/log`.
pub struct ConsoleLogs {
    root: PathBuf,
    ring_bytes: u64,
    /// Next offset per execution id; lazily recovered from disk after a
    /// supervisor restart.
    offsets: Mutex<HashMap<String, u64>>,
}

impl ConsoleLogs {
    pub fn new(root: impl Into<PathBuf>, ring_bytes: u64) -> Self {
        Self { root: root.into(), ring_bytes, offsets: Mutex::new(HashMap::new()) }
    }

    fn log_path(&self, app_id: &str, execution_id: &str) -> PathBuf {
        self.root.join(app_id).join(format!("{execution_id}.log"))
    }

    /// Append one console line. IO failures are the caller's to ignore;
    /// logging never gates lifecycle progress.
    pub fn append(
        &self,
        app_id: &str,
        execution_id: &str,
        stream: LogStream,
        line: &str,
    ) -> std::io::Result<LogRecord> {
        let path = self.log_path(app_id, execution_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let offset = {
            let mut offsets = self.offsets.lock();
            let next = match offsets.get(execution_id) {
                Some(n) => *n,
                None => last_offset(&path).map(|o| o + 1).unwrap_or(0),
            };
            offsets.insert(execution_id.to_string(), next + 1);
            next
        };

        let record = LogRecord {
            app_id: String::new(),
            execution_id: execution_id.to_string(),
            stream,
            offset,
            ts: Utc::now(),
            line: line.to_string(),
        };
        let mut encoded = serde_json::to_vec(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        encoded.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&encoded)?;
        drop(file);

        if fs::metadata(&path).map(|m| m.len()).unwrap_or(0) > self.ring_bytes {
            if let Err(e) = compact(&path, self.ring_bytes / 2) {
                warn!(path = %path.display(), error = %e, "console ring compaction failed");
            }
        }

        Ok(LogRecord { app_id: app_id.to_string(), ..record })
    }

    /// Last `n` records of the most recent execution of `app_id`.
    pub fn tail(&self, app_id: &str, n: usize) -> Vec<LogRecord> {
        let dir = self.root.join(app_id);
        let Some(path) = newest_log(&dir) else {
            return Vec::new();
        };
        let mut records = read_records(&path);
        if records.len() > n {
            records.drain(..records.len() - n);
        }
        for r in &mut records {
            r.app_id = app_id.to_string();
        }
        records
    }

    /// Delete the whole log area of an application (on remove).
    pub fn remove_app(&self, app_id: &str) {
        let dir = self.root.join(app_id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(app_id, error = %e, "failed to remove console logs");
            }
        }
    }

    /// Forget the cached offset of a finished execution.
    pub fn forget_execution(&self, execution_id: &str) {
        self.offsets.lock().remove(execution_id);
    }
}

/// Offset of the final record in the file, if any.
fn last_offset(path: &Path) -> Option<u64> {
    read_records(path).last().map(|r| r.offset)
}

fn read_records(path: &Path) -> Vec<LogRecord> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };
    BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|l| serde_json::from_str(&l).ok())
        .collect()
}

/// Rewrite the file keeping the newest records up to `keep_bytes`.
fn compact(path: &Path, keep_bytes: u64) -> std::io::Result<()> {
    let records = read_records(path);
    let mut kept: Vec<&LogRecord> = Vec::new();
    let mut size = 0u64;
    for record in records.iter().rev() {
        size += record.line.len() as u64 + 80; // rough per-record envelope
        if size > keep_bytes {
            break;
        }
        kept.push(record);
    }
    kept.reverse();

    let tmp = path.with_extension("log.tmp");
    {
        let mut out = fs::File::create(&tmp)?;
        for record in kept {
            let mut encoded = serde_json::to_vec(record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            encoded.push(b'\n');
            out.write_all(&encoded)?;
        }
    }
    fs::rename(&tmp, path)
}

/// Most recently modified `.log` file in `dir`.
fn newest_log(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "log"))
        .max_by_key(|e| e.metadata().and_then(|m| m.modified()).ok())
        .map(|e| e.path())
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
