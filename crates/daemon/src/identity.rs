// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity Service: canonicalization and execution-id minting.
//!
//! Every public entry point resolves caller input through here so that
//! callers may pass either the prefixed or unprefixed form. Resolution
//! against the store and the live map happens in the lifecycle core;
//! this type owns the pure identifier rules.

use vea_core::{AppId, ExecutionId, IdError};

/// Identifier rules bound to the configured prefix.
#[derive(Debug, Clone)]
pub struct Identity {
    prefix: String,
}

impl Identity {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Canonicalize caller input (adds the prefix if absent).
    pub fn canonicalize(&self, input: &str) -> Result<AppId, IdError> {
        AppId::canonical(input, &self.prefix)
    }

    /// The canonical id with the prefix removed.
    pub fn strip<'a>(&self, id: &'a AppId) -> &'a str {
        id.stripped(&self.prefix)
    }

    /// Mint a globally unique execution id.
    pub fn mint_execution_id(&self) -> ExecutionId {
        ExecutionId::mint()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
