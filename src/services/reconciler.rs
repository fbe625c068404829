//! Tracking reconciler - applies courier scans to stored orders
//!
//! Per order: skip terminal/docketless orders, validate the stored document,
//! fetch the courier shipment, append forward-moving normalized events in
//! chronological order, then write the document back with a single
//! version-checked replace. Any failure leaves the stored order untouched
//! (except `NotFound`, which only sets the review flag).
//!
//! A cycle runs every eligible order through a worker pool bounded by the
//! configured concurrency. Failures are isolated per order.

use crate::domain::order::new_cycle_id;
use crate::domain::{CourierEvent, ReviewFlag, StatusEvent, TrackingError, TrackingOrder};
use crate::infra::metrics::Metrics;
use crate::io::courier::CourierGateway;
use crate::io::store::OrderStore;
use crate::services::normalizer::StatusNormalizer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Why an order was not polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Terminal,
    NoDocket,
}

/// Result of reconciling one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// New history was appended and persisted
    Updated { appended: usize, discarded: usize },
    /// Polled and persisted `lastPolledAt`, but no new history
    Unchanged { discarded: usize },
    Skipped(SkipReason),
    /// Courier does not know the docket; order flagged for manual review
    Flagged,
}

/// Counts from applying one batch of courier events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub appended: usize,
    /// Regressions, stale replays, and anything after a terminal stage
    pub discarded: usize,
}

/// Per-kind failure counts for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCounts {
    pub gateway: usize,
    pub auth: usize,
    pub not_found: usize,
    pub validation: usize,
    pub store: usize,
}

impl ErrorCounts {
    fn record(&mut self, kind: &str) {
        match kind {
            "gateway" => self.gateway += 1,
            "auth" => self.auth += 1,
            "not_found" => self.not_found += 1,
            "validation" => self.validation += 1,
            _ => self.store += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.gateway + self.auth + self.not_found + self.validation + self.store
    }
}

/// Summary of one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub eligible: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub flagged: usize,
    pub failed: usize,
    pub errors: ErrorCounts,
}

impl CycleSummary {
    fn new(cycle_id: String, started_at: DateTime<Utc>, eligible: usize) -> Self {
        Self {
            cycle_id,
            started_at,
            finished_at: started_at,
            eligible,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            flagged: 0,
            failed: 0,
            errors: ErrorCounts::default(),
        }
    }

    fn record(&mut self, result: &Result<OrderOutcome, TrackingError>) {
        match result {
            Ok(OrderOutcome::Updated { .. }) => self.updated += 1,
            Ok(OrderOutcome::Unchanged { .. }) => self.unchanged += 1,
            Ok(OrderOutcome::Skipped(_)) => self.skipped += 1,
            Ok(OrderOutcome::Flagged) => {
                self.flagged += 1;
                self.errors.record("not_found");
            }
            Err(e) => {
                self.failed += 1;
                self.errors.record(e.kind());
            }
        }
    }
}

/// Fetches, normalizes and applies courier updates to stored orders
pub struct Reconciler {
    gateway: Arc<dyn CourierGateway>,
    store: Arc<dyn OrderStore>,
    normalizer: StatusNormalizer,
    metrics: Arc<Metrics>,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn CourierGateway>,
        store: Arc<dyn OrderStore>,
        metrics: Arc<Metrics>,
        concurrency: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            normalizer: StatusNormalizer::new(),
            metrics,
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Apply courier events to `order` in chronological order
    ///
    /// An event is appended only if its normalized status is a legal forward
    /// move from the running status (or `Cancelled`). Events older than the
    /// newest stored entry are replays and are dropped, as is everything after
    /// a terminal stage.
    pub fn apply_events(
        &self,
        order: &mut TrackingOrder,
        events: &[CourierEvent],
        now: DateTime<Utc>,
    ) -> ApplyStats {
        let mut ordered: Vec<&CourierEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut stats = ApplyStats::default();
        let mut floor = order.last_event_at();

        for event in ordered {
            let current = order.status;
            if current.is_terminal() {
                stats.discarded += 1;
                continue;
            }
            if floor.is_some_and(|ts| event.timestamp < ts) {
                stats.discarded += 1;
                continue;
            }

            let status = self.normalizer.normalize(event, current);
            if status == current {
                continue;
            }
            if !current.can_advance_to(status) {
                debug!(
                    order_number = %order.order_number,
                    current = %current,
                    reported = %status,
                    code = %event.code,
                    "courier_event_regression_discarded"
                );
                stats.discarded += 1;
                continue;
            }

            order.record(StatusEvent::from_courier(status, event, now));
            floor = Some(event.timestamp);
            stats.appended += 1;
        }

        stats
    }

    /// Reconcile a single order against the courier
    pub async fn reconcile_order(&self, order: TrackingOrder) -> Result<OrderOutcome, TrackingError> {
        if order.status.is_terminal() {
            return Ok(OrderOutcome::Skipped(SkipReason::Terminal));
        }
        let Some(docket) = order.docket().map(str::to_string) else {
            return Ok(OrderOutcome::Skipped(SkipReason::NoDocket));
        };

        order.validate()?;

        let fetch_start = Instant::now();
        let fetched = self.gateway.fetch_shipment(&docket).await;
        self.metrics.record_fetch_latency(fetch_start.elapsed().as_millis() as u64);

        let shipment = match fetched {
            Ok(shipment) => shipment,
            Err(TrackingError::NotFound(reported)) => {
                self.flag_for_review(&order, &reported).await?;
                return Ok(OrderOutcome::Flagged);
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let mut updated = order.clone();
        let stats = self.apply_events(&mut updated, &shipment.events, now);
        updated.last_polled_at = Some(now);
        if shipment.estimated_delivery.is_some() {
            updated.estimated_delivery = shipment.estimated_delivery;
        }
        updated.review_flag = None;

        self.store.replace(&updated, order.version).await?;

        if stats.appended > 0 {
            info!(
                order_number = %updated.order_number,
                docket = %docket,
                from = %order.status,
                to = %updated.status,
                appended = stats.appended,
                "order_status_advanced"
            );
            Ok(OrderOutcome::Updated { appended: stats.appended, discarded: stats.discarded })
        } else {
            debug!(order_number = %updated.order_number, docket = %docket, "order_unchanged");
            Ok(OrderOutcome::Unchanged { discarded: stats.discarded })
        }
    }

    /// Mark an order the courier does not recognise. Status and poll time stay as they are.
    async fn flag_for_review(&self, order: &TrackingOrder, docket: &str) -> Result<(), TrackingError> {
        if order.review_flag.is_some() {
            return Ok(());
        }
        let mut flagged = order.clone();
        flagged.review_flag = Some(ReviewFlag {
            reason: format!("docket {docket} unknown to courier"),
            flagged_at: Utc::now(),
        });
        self.store.replace(&flagged, order.version).await?;
        Ok(())
    }

    /// Run one full cycle over every eligible order
    pub async fn run_cycle(self: &Arc<Self>) -> CycleSummary {
        let cycle_id = new_cycle_id();
        let started_at = Utc::now();
        let start = Instant::now();

        let orders = match self.store.list_eligible().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "cycle_list_orders_failed");
                let mut summary = CycleSummary::new(cycle_id, started_at, 0);
                summary.finished_at = Utc::now();
                return summary;
            }
        };

        info!(cycle_id = %cycle_id, eligible = orders.len(), concurrency = self.concurrency, "cycle_started");

        let mut summary = CycleSummary::new(cycle_id.clone(), started_at, orders.len());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for order in orders {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let order_number = order.order_number.clone();
                let result = this.reconcile_order(order).await;
                (order_number, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((order_number, result)) => {
                    self.log_outcome(&cycle_id, &order_number, &result);
                    summary.record(&result);
                }
                Err(e) => {
                    error!(cycle_id = %cycle_id, error = %e, "reconcile_task_panicked");
                    summary.failed += 1;
                }
            }
        }

        summary.finished_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_cycle_completed(duration_ms);

        info!(
            cycle_id = %cycle_id,
            eligible = summary.eligible,
            updated = summary.updated,
            unchanged = summary.unchanged,
            flagged = summary.flagged,
            failed = summary.failed,
            duration_ms = duration_ms,
            "cycle_completed"
        );

        summary
    }

    fn log_outcome(&self, cycle_id: &str, order_number: &str, result: &Result<OrderOutcome, TrackingError>) {
        match result {
            Ok(OrderOutcome::Updated { appended, discarded }) => {
                self.metrics.record_order_updated(*appended, *discarded);
            }
            Ok(OrderOutcome::Unchanged { discarded }) => {
                self.metrics.record_order_unchanged(*discarded);
            }
            Ok(OrderOutcome::Skipped(reason)) => {
                debug!(cycle_id = %cycle_id, order_number = %order_number, reason = ?reason, "order_skipped");
                self.metrics.record_order_skipped();
            }
            Ok(OrderOutcome::Flagged) => {
                warn!(
                    cycle_id = %cycle_id,
                    order_number = %order_number,
                    error_kind = "not_found",
                    "order_flagged_for_review"
                );
                self.metrics.record_order_failure("not_found");
            }
            Err(e @ TrackingError::Auth(_)) => {
                error!(
                    cycle_id = %cycle_id,
                    order_number = %order_number,
                    error_kind = e.kind(),
                    error = %e,
                    "courier_auth_failed"
                );
                self.metrics.record_order_failure(e.kind());
            }
            Err(e) => {
                warn!(
                    cycle_id = %cycle_id,
                    order_number = %order_number,
                    error_kind = e.kind(),
                    error = %e,
                    "order_reconcile_failed"
                );
                self.metrics.record_order_failure(e.kind());
            }
        }
    }
}
