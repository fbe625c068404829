//! Poll scheduler
//!
//! Runs a reconciliation cycle on a fixed interval and on manual trigger.
//! At most one cycle runs at a time per process; a trigger that arrives while
//! a cycle is in flight returns `AlreadyRunning` instead of queueing.

use crate::domain::{RecentActivity, StoreError};
use crate::infra::metrics::Metrics;
use crate::services::reconciler::{CycleSummary, Reconciler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Entries returned in `HealthReport::recent_activity`
pub const RECENT_ACTIVITY_LIMIT: usize = 5;

/// An order is stale once it has gone this many intervals without a poll
const STALE_INTERVALS: u32 = 2;

/// Result of asking for a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    AlreadyRunning,
}

/// Snapshot served by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub orders_to_update: usize,
    pub stale_orders: usize,
    pub poll_in_progress: bool,
    pub recent_activity: Vec<RecentActivity>,
    pub checked_at: DateTime<Utc>,
}

/// Clears the in-progress flag when a cycle ends, including on panic or cancellation
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    interval: Duration,
    run_on_start: bool,
    in_progress: AtomicBool,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        metrics: Arc<Metrics>,
        interval: Duration,
        run_on_start: bool,
    ) -> Self {
        Self { reconciler, metrics, interval, run_on_start, in_progress: AtomicBool::new(false) }
    }

    pub fn is_polling(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one cycle now unless one is already in flight
    pub async fn trigger(&self) -> CycleOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.record_cycle_rejected();
            info!("cycle_already_running");
            return CycleOutcome::AlreadyRunning;
        }
        let _guard = PollGuard(&self.in_progress);

        CycleOutcome::Completed(self.reconciler.run_cycle().await)
    }

    /// Interval loop. Returns when `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.run_on_start {
            // First tick completes immediately
            timer.tick().await;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            run_on_start = self.run_on_start,
            "scheduler_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler_shutdown");
                        return;
                    }
                    continue;
                }
                _ = timer.tick() => {}
            }

            if let CycleOutcome::AlreadyRunning = self.trigger().await {
                debug!("scheduled_cycle_skipped");
            }
        }
    }

    /// Current polling health
    pub async fn health(&self) -> Result<HealthReport, StoreError> {
        let now = Utc::now();
        let store = self.reconciler.store();
        let eligible = store.list_eligible().await?;
        let recent_activity = store.recent_activity(RECENT_ACTIVITY_LIMIT).await?;

        let stale_after = chrono::Duration::from_std(self.interval * STALE_INTERVALS)
            .unwrap_or(chrono::Duration::MAX);
        let stale_orders = eligible
            .iter()
            .filter(|order| {
                let last_seen = order
                    .last_polled_at
                    .or_else(|| order.history.first().map(|e| e.recorded_at));
                last_seen.is_none_or(|at| now.signed_duration_since(at) > stale_after)
            })
            .count();

        if stale_orders > 0 {
            warn!(stale_orders = stale_orders, eligible = eligible.len(), "stale_orders_detected");
        }

        Ok(HealthReport {
            orders_to_update: eligible.len(),
            stale_orders,
            poll_in_progress: self.is_polling(),
            recent_activity,
            checked_at: now,
        })
    }
}
