// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vea-store: the supervisor's persistent store.
//!
//! Three durable tables (applications, runtime state, console logs) with
//! the recovery design proven in long-lived daemons: an append-only
//! journal made durable before every acknowledgment, a compressed
//! snapshot for fast startup, and idempotent replay in between. Console
//! logs live outside the journal as bounded per-execution ring files;
//! log traffic must never inflate the recovery path.

mod journal;
mod logs;
mod snapshot;
mod store;
mod tables;

pub use journal::{Journal, JournalEntry, JournalError};
pub use logs::{ConsoleLogs, LogRecord, LogStream};
pub use snapshot::{Snapshot, SnapshotError};
pub use store::{AppFilter, Store, StoreConfig, StoreError};
pub use tables::Tables;
