// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health endpoint, served separately from the control channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use vea_core::Clock;

use crate::lifecycle::LifecycleCore;

/// A reconciler this many intervals late marks the supervisor degraded.
const STALE_RECONCILE_INTERVALS: u32 = 3;

/// Liveness/readiness state shared with the reconciler loop.
pub struct Health {
    started_at: Instant,
    ready: AtomicBool,
    last_reconcile: Mutex<Option<Instant>>,
    reconcile_interval: Duration,
}

impl Health {
    pub fn new(reconcile_interval: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            ready: AtomicBool::new(false),
            last_reconcile: Mutex::new(None),
            reconcile_interval,
        }
    }

    /// Initial reconciliation finished; the supervisor serves traffic.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// A reconcile pass completed.
    pub fn mark_reconcile(&self) {
        *self.last_reconcile.lock() = Some(Instant::now());
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        match *self.last_reconcile.lock() {
            Some(at) => at.elapsed() < self.reconcile_interval * STALE_RECONCILE_INTERVALS,
            None => !self.is_ready(), // still starting up is fine
        }
    }

    fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// The health report body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub ready: bool,
    pub uptime_ms: u64,
    pub live_app_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

struct HealthCtx<C: Clock> {
    core: Arc<LifecycleCore<C>>,
    health: Arc<Health>,
}

impl<C: Clock> Clone for HealthCtx<C> {
    fn clone(&self) -> Self {
        Self { core: Arc::clone(&self.core), health: Arc::clone(&self.health) }
    }
}

/// Build the health router.
pub fn router<C: Clock>(core: Arc<LifecycleCore<C>>, health: Arc<Health>) -> Router {
    Router::new()
        .route("/health", get(report::<C>))
        .with_state(HealthCtx { core, health })
}

async fn report<C: Clock>(State(ctx): State<HealthCtx<C>>) -> Json<HealthReport> {
    let status =
        if ctx.health.is_healthy() { HealthStatus::Healthy } else { HealthStatus::Degraded };
    Json(HealthReport {
        status,
        ready: ctx.health.is_ready(),
        uptime_ms: ctx.health.uptime_ms(),
        live_app_count: ctx.core.live_count(),
    })
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
