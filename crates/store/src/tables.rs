// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory tables materialized from snapshot + journal replay.
//!
//! All entry application is idempotent: applying the same entry twice
//! must produce the same tables as applying it once, because entries
//! are applied both on the live write path and again during replay.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vea_core::{ApplicationRecord, RuntimeStateRecord};

use crate::journal::JournalEntry;

/// The application and runtime-state tables, keyed by canonical app id.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Tables {
    pub applications: HashMap<String, ApplicationRecord>,
    /// At most one row per application, replaced wholesale on each start.
    pub runtime_states: HashMap<String, RuntimeStateRecord>,
}

impl Tables {
    /// Apply one journal entry.
    pub fn apply(&mut self, entry: &JournalEntry) {
        match entry {
            JournalEntry::UpsertApplication { record } => {
                self.applications.insert(record.app_id.as_str().to_string(), (**record).clone());
            }
            JournalEntry::DeleteApplication { app_id } => {
                self.applications.remove(app_id.as_str());
                // Runtime state never outlives its application row.
                self.runtime_states.remove(app_id.as_str());
            }
            JournalEntry::UpsertRuntimeState { state } => {
                self.runtime_states.insert(state.app_id.as_str().to_string(), state.clone());
            }
            JournalEntry::ClearRuntimeState { app_id } => {
                self.runtime_states.remove(app_id.as_str());
            }
        }
    }
}

#[cfg(test)]
#[path = "tables_tests.rs"]
mod tests;
