//! HTTP interface
//!
//! Operator and storefront endpoints plus Prometheus metrics, served with
//! hyper over http1:
//!
//! - `POST /tracking/manual-update` - run one cycle now
//! - `GET  /system/health` - polling health summary
//! - `POST /tracking/orders` - register a shipped order
//! - `GET  /tracking/orders/{orderNumber}` - current tracking document
//! - `GET  /metrics` - Prometheus text format
//! - `GET  /health` - liveness

use crate::domain::{OrderStatus, StoreError, TrackingOrder};
use crate::infra::metrics::{Metrics, MetricsSummary, FETCH_BUCKET_BOUNDS, FETCH_NUM_BUCKETS};
use crate::io::store::OrderStore;
use crate::services::scheduler::{CycleOutcome, Scheduler};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Largest request body accepted
const MAX_BODY_BYTES: usize = 64 * 1024;

const ORDERS_PATH: &str = "/tracking/orders";

/// Shared handles for request handlers
pub struct HttpState {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn OrderStore>,
    pub metrics: Arc<Metrics>,
    /// Courier environment, used as the metrics label
    pub environment: String,
}

/// Registration payload for a freshly shipped order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOrder {
    pub order_number: String,
    #[serde(default)]
    pub docket_number: Option<String>,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// When the order left the store; defaults to now
    #[serde(default)]
    pub shipped_at: Option<DateTime<Utc>>,
}

impl RegisterOrder {
    /// Build the initial tracking document, or explain why not
    pub fn into_order(self, now: DateTime<Utc>) -> Result<TrackingOrder, String> {
        let order_number = self.order_number.trim();
        if order_number.is_empty() {
            return Err("orderNumber must not be blank".to_string());
        }
        let Some(docket) = self.docket_number.as_deref().map(str::trim).filter(|d| !d.is_empty()) else {
            return Err("docketNumber is required".to_string());
        };
        let shipped_at = self.shipped_at.unwrap_or(now);
        if shipped_at > now {
            return Err("shippedAt is in the future".to_string());
        }

        let mut order = TrackingOrder::new(order_number, Some(docket), OrderStatus::Processing, shipped_at);
        order.estimated_delivery = self.estimated_delivery;
        Ok(order)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    ok: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "http_response_serialize_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn error_response(status: StatusCode, error: &str, detail: Option<String>) -> Response<Full<Bytes>> {
    json_response(status, &ErrorBody { ok: false, error, detail })
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with environment label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, env: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{env=\"{env}\"}} {val}");
}

/// Write the courier fetch latency histogram
fn write_fetch_histogram(output: &mut String, env: &str, summary: &MetricsSummary) {
    let name = "tracker_courier_fetch_ms";
    let _ = writeln!(output, "# HELP {name} Courier tracking fetch latency in milliseconds");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in FETCH_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += summary.fetch_buckets[i];
        let _ = writeln!(output, "{name}_bucket{{env=\"{env}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += summary.fetch_buckets[FETCH_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{env=\"{env}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{env=\"{env}\"}} {}", summary.fetch_sum_ms);
    let _ = writeln!(output, "{name}_count{{env=\"{env}\"}} {}", summary.fetch_count);
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, env: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    let counters: [(&str, &str, u64); 7] = [
        ("tracker_cycles_total", "Poll cycles completed", summary.cycles_total),
        ("tracker_cycles_rejected_total", "Cycle requests rejected while a cycle was running", summary.cycles_rejected),
        ("tracker_orders_updated_total", "Orders with new status history", summary.orders_updated),
        ("tracker_orders_unchanged_total", "Orders polled without new history", summary.orders_unchanged),
        ("tracker_orders_skipped_total", "Orders skipped as terminal or docketless", summary.orders_skipped),
        ("tracker_events_appended_total", "Status events appended to history", summary.events_appended),
        ("tracker_events_discarded_total", "Courier events discarded as regressions or replays", summary.events_discarded),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, env, val);
    }

    let name = "tracker_order_failures_total";
    let _ = writeln!(output, "# HELP {name} Per-order failures by kind");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in [
        ("gateway", summary.gateway_errors),
        ("auth", summary.auth_errors),
        ("not_found", summary.not_found_errors),
        ("validation", summary.validation_errors),
        ("store", summary.store_errors),
    ] {
        let _ = writeln!(output, "{name}{{env=\"{env}\",kind=\"{kind}\"}} {val}");
    }

    write_metric(
        &mut output,
        "tracker_last_cycle_ms",
        "Duration of the most recent cycle",
        MetricType::Gauge,
        env,
        summary.last_cycle_ms,
    );
    write_fetch_histogram(&mut output, env, &summary);
    write_metric(
        &mut output,
        "tracker_courier_fetch_p95_ms",
        "95th percentile courier fetch latency",
        MetricType::Gauge,
        env,
        summary.fetch_p95_ms,
    );

    output
}

async fn manual_update(state: &HttpState) -> Response<Full<Bytes>> {
    // Detached so a client disconnect cannot cancel a cycle halfway
    let scheduler = state.scheduler.clone();
    match tokio::spawn(async move { scheduler.trigger().await }).await {
        Ok(CycleOutcome::Completed(summary)) => {
            info!(cycle_id = %summary.cycle_id, "manual_update_completed");
            json_response(StatusCode::OK, &json!({ "ok": true, "summary": summary }))
        }
        Ok(CycleOutcome::AlreadyRunning) => error_response(StatusCode::CONFLICT, "already_running", None),
        Err(e) => {
            error!(error = %e, "manual_update_task_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "cycle_failed", None)
        }
    }
}

async fn system_health(state: &HttpState) -> Response<Full<Bytes>> {
    match state.scheduler.health().await {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(e) => {
            error!(error = %e, "health_check_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable", None)
        }
    }
}

async fn register_order(state: &HttpState, body: &[u8]) -> Response<Full<Bytes>> {
    let request: RegisterOrder = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_body", Some(e.to_string())),
    };
    let order = match request.into_order(Utc::now()) {
        Ok(order) => order,
        Err(detail) => return error_response(StatusCode::BAD_REQUEST, "invalid_order", Some(detail)),
    };

    match state.store.insert(order).await {
        Ok(stored) => {
            info!(
                order_number = %stored.order_number,
                docket = stored.docket().unwrap_or_default(),
                "order_registered"
            );
            json_response(StatusCode::CREATED, &stored)
        }
        Err(StoreError::Duplicate(order_number)) => {
            warn!(order_number = %order_number, "order_register_duplicate");
            error_response(StatusCode::CONFLICT, "duplicate_order", Some(order_number))
        }
        Err(e) => {
            error!(error = %e, "order_register_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable", None)
        }
    }
}

async fn show_order(state: &HttpState, order_number: &str) -> Response<Full<Bytes>> {
    match state.store.get(order_number).await {
        Ok(Some(order)) => json_response(StatusCode::OK, &order),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown_order", Some(order_number.to_string())),
        Err(e) => {
            error!(error = %e, order_number = %order_number, "order_lookup_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable", None)
        }
    }
}

/// Route a request that has already been read into memory
pub async fn route(state: &HttpState, method: &Method, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::POST, "/tracking/manual-update") => manual_update(state).await,
        (&Method::GET, "/system/health") => system_health(state).await,
        (&Method::POST, ORDERS_PATH) => register_order(state, body).await,
        (&Method::GET, path) if path.starts_with("/tracking/orders/") => {
            match path.strip_prefix("/tracking/orders/").filter(|n| !n.is_empty() && !n.contains('/')) {
                Some(order_number) => show_order(state, order_number).await,
                None => text_response(StatusCode::NOT_FOUND, "Not Found"),
            }
        }
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(format_prometheus_metrics(&state.metrics, &state.environment))))
            .expect("static response should not fail"),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, path = %parts.uri.path(), "http_body_rejected");
            return Ok(error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_rejected", None));
        }
    };
    Ok(route(&state, &parts.method, parts.uri.path(), &body).await)
}

/// Start the HTTP server
pub async fn start_http_server(
    port: u16,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, env = %state.environment, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CourierEvent, Shipment, TrackingError};
    use crate::io::courier::CourierGateway;
    use crate::io::store::MemoryOrderStore;
    use crate::services::reconciler::Reconciler;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct IdleGateway;

    #[async_trait]
    impl CourierGateway for IdleGateway {
        async fn fetch_shipment(&self, docket_number: &str) -> Result<Shipment, TrackingError> {
            Ok(Shipment { docket_number: docket_number.to_string(), events: vec![], estimated_delivery: None })
        }
    }

    /// Holds each fetch until the test lets it go
    struct ParkedGateway {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CourierGateway for ParkedGateway {
        async fn fetch_shipment(&self, docket_number: &str) -> Result<Shipment, TrackingError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Shipment {
                docket_number: docket_number.to_string(),
                events: vec![CourierEvent::new("PKG", "Packed and ready", Utc::now())],
                estimated_delivery: None,
            })
        }
    }

    fn state() -> HttpState {
        state_with(Arc::new(IdleGateway), Vec::new())
    }

    fn state_with(gateway: Arc<dyn CourierGateway>, orders: Vec<TrackingOrder>) -> HttpState {
        let store: Arc<dyn OrderStore> = Arc::new(MemoryOrderStore::with_orders(orders).unwrap());
        let metrics = Arc::new(Metrics::new());
        let reconciler = Arc::new(Reconciler::new(gateway, store.clone(), metrics.clone(), 2));
        let scheduler = Arc::new(Scheduler::new(reconciler, metrics.clone(), Duration::from_secs(60), false));
        HttpState { scheduler, store, metrics, environment: "test".to_string() }
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_fetch_latency(120);
        metrics.record_fetch_latency(900);
        metrics.record_order_updated(2, 1);
        metrics.record_order_failure("auth");
        metrics.record_cycle_completed(1500);

        let output = format_prometheus_metrics(&metrics, "production");

        assert!(output.contains("tracker_cycles_total{env=\"production\"} 1"));
        assert!(output.contains("tracker_events_appended_total{env=\"production\"} 2"));
        assert!(output.contains("tracker_order_failures_total{env=\"production\",kind=\"auth\"} 1"));
        assert!(output.contains("tracker_courier_fetch_ms_bucket{env=\"production\",le=\"200\"} 1"));
        assert!(output.contains("tracker_courier_fetch_ms_bucket{env=\"production\",le=\"+Inf\"} 2"));
        assert!(output.contains("tracker_courier_fetch_ms_count{env=\"production\"} 2"));
        assert!(output.contains("tracker_last_cycle_ms{env=\"production\"} 1500"));
    }

    #[test]
    fn test_register_requires_docket() {
        let request = RegisterOrder {
            order_number: "JW-1".into(),
            docket_number: Some("  ".into()),
            estimated_delivery: None,
            shipped_at: None,
        };
        assert!(request.into_order(Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_register_then_show_order() {
        let state = state();
        let body = br#"{"orderNumber":"JW-77","docketNumber":"D77"}"#;

        let created = route(&state, &Method::POST, ORDERS_PATH, body).await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let doc = body_json(created).await;
        assert_eq!(doc["status"], "PROCESSING");
        assert_eq!(doc["docketNumber"], "D77");

        let duplicate = route(&state, &Method::POST, ORDERS_PATH, body).await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let shown = route(&state, &Method::GET, "/tracking/orders/JW-77", b"").await;
        assert_eq!(shown.status(), StatusCode::OK);
        assert_eq!(body_json(shown).await["orderNumber"], "JW-77");

        let missing = route(&state, &Method::GET, "/tracking/orders/JW-404", b"").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_body() {
        let state = state();
        let response = route(&state, &Method::POST, ORDERS_PATH, b"{not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_body");
    }

    #[tokio::test]
    async fn test_manual_update_returns_summary() {
        let state = state();
        let response = route(&state, &Method::POST, "/tracking/manual-update", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["summary"]["eligible"], 0);
    }

    #[tokio::test]
    async fn test_manual_update_while_cycle_running_is_conflict() {
        let gateway = Arc::new(ParkedGateway { entered: Notify::new(), release: Notify::new() });
        let order = TrackingOrder::new("JW-88", Some("D88"), OrderStatus::Processing, Utc::now());
        let state = Arc::new(state_with(gateway.clone(), vec![order]));

        let first = {
            let state = state.clone();
            tokio::spawn(async move { route(&state, &Method::POST, "/tracking/manual-update", b"").await })
        };
        gateway.entered.notified().await;

        let second = route(&state, &Method::POST, "/tracking/manual-update", b"").await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = body_json(second).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "already_running");

        gateway.release.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["summary"]["updated"], 1);
        assert_eq!(state.metrics.report().cycles_rejected, 1);
    }

    #[tokio::test]
    async fn test_system_health_shape() {
        let state = state();
        let response = route(&state, &Method::GET, "/system/health", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ordersToUpdate"], 0);
        assert_eq!(body["staleOrders"], 0);
        assert_eq!(body["pollInProgress"], false);
        assert!(body["recentActivity"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let state = state();
        let response = route(&state, &Method::DELETE, "/tracking/orders/JW-1", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
