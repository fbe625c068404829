//! End-to-end reconciliation against a local courier stub
//!
//! Runs the real HTTP client, RocksDB store, reconciler and scheduler
//! together. The stub serves fixed vendor replies per docket.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use shipment_tracker::domain::{OrderStatus, TrackingOrder};
use shipment_tracker::infra::{CourierEndpoint, Metrics};
use shipment_tracker::io::{CourierGateway, OrderStore, RocksOrderStore, Sequel247Client};
use shipment_tracker::services::{CycleOutcome, Reconciler, Scheduler};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TOKEN: &str = "stub-token";

fn ist_parts(ts: DateTime<Utc>) -> (String, String) {
    let local = ts.with_timezone(&FixedOffset::east_opt(19_800).unwrap());
    (local.format("%Y-%m-%d").to_string(), local.format("%H:%M:%S").to_string())
}

fn scan(code: &str, text: &str, at: DateTime<Utc>) -> Value {
    let (date, time) = ist_parts(at);
    json!({ "status_code": code, "status": text, "location": "Mumbai Hub", "date": date, "time": time })
}

/// Vendor reply for a docket, relative to `base`
fn stub_reply(docket: &str, token: &str, base: DateTime<Utc>) -> (StatusCode, Value) {
    if token != TOKEN {
        return (StatusCode::UNAUTHORIZED, json!({ "status": false, "message": "Invalid token" }));
    }
    match docket {
        "D123" => (
            StatusCode::OK,
            json!({
                "status": true,
                "message": "OK",
                "data": {
                    "docket_no": "D123",
                    "estimated_delivery": "2030-01-15",
                    "tracking": [
                        scan("SHP", "Shipped, on the road", base - ChronoDuration::minutes(10)),
                        scan("PKG", "Packed and ready", base - ChronoDuration::minutes(30)),
                        scan("BKD", "Order confirmed", base - ChronoDuration::minutes(5)),
                    ]
                }
            }),
        ),
        "NF404" => (StatusCode::OK, json!({ "status": "false", "message": "Docket not found" })),
        _ => (StatusCode::SERVICE_UNAVAILABLE, json!({ "status": false, "message": "maintenance" })),
    }
}

async fn handle(req: Request<hyper::body::Incoming>, base: DateTime<Utc>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = req.into_body().collect().await.map(|c| c.to_bytes()).unwrap_or_default();
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let docket = request["docket_no"].as_str().unwrap_or_default();
    let token = request["token"].as_str().unwrap_or_default();

    let (status, reply) = stub_reply(docket, token, base);
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(reply.to_string())))
        .unwrap())
}

/// Start the courier stub on an ephemeral port
async fn start_stub(base: DateTime<Utc>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let service = service_fn(move |req| handle(req, base));
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
            });
        }
    });
    addr
}

fn client(addr: SocketAddr, token: &str) -> Sequel247Client {
    let endpoint = CourierEndpoint {
        endpoint: format!("http://{addr}/"),
        token: token.to_string(),
        store_code: "JW01".to_string(),
    };
    Sequel247Client::new(&endpoint, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_client_maps_vendor_replies() {
    let base = Utc::now();
    let addr = start_stub(base).await;

    let ok = client(addr, TOKEN);
    assert_eq!(ok.url(), format!("http://{addr}/tracking"));
    let shipment = ok.fetch_shipment("D123").await.unwrap();
    assert_eq!(shipment.events.len(), 3);
    assert_eq!(shipment.events[0].code, "PKG");
    assert!(shipment.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(shipment.estimated_delivery.is_some());

    let events = ok.fetch_events("D123").await.unwrap();
    assert_eq!(events.last().map(|e| e.code.as_str()), Some("BKD"));

    assert_eq!(ok.fetch_shipment("NF404").await.unwrap_err().kind(), "not_found");
    assert_eq!(ok.fetch_shipment("ERR1").await.unwrap_err().kind(), "gateway");
    assert_eq!(client(addr, "wrong").fetch_shipment("D123").await.unwrap_err().kind(), "auth");
}

#[tokio::test]
async fn test_cycle_against_courier_stub() {
    let base = Utc::now();
    let addr = start_stub(base).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders");

    let shipped = base - ChronoDuration::hours(1);
    {
        let store = RocksOrderStore::open(&path).unwrap();
        for order in [
            TrackingOrder::new("JW-1", Some("D123"), OrderStatus::Processing, shipped),
            TrackingOrder::new("JW-2", Some("NF404"), OrderStatus::Packaging, shipped),
            TrackingOrder::new("JW-3", Some("ERR500"), OrderStatus::OnTheRoad, shipped),
            TrackingOrder::new("JW-4", Some("D999"), OrderStatus::Delivered, shipped),
            TrackingOrder::new("JW-5", None, OrderStatus::Processing, shipped),
        ] {
            store.insert(order).await.unwrap();
        }
    }

    let store: Arc<dyn OrderStore> = Arc::new(RocksOrderStore::open(&path).unwrap());
    let before_failure = store.get("JW-3").await.unwrap().unwrap();
    let metrics = Arc::new(Metrics::new());
    let reconciler = Arc::new(Reconciler::new(Arc::new(client(addr, TOKEN)), store.clone(), metrics.clone(), 2));
    let scheduler = Scheduler::new(reconciler, metrics.clone(), Duration::from_secs(60), false);

    let CycleOutcome::Completed(summary) = scheduler.trigger().await else {
        panic!("no other cycle is running");
    };
    assert_eq!(summary.eligible, 3);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.flagged, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors.gateway, 1);
    assert_eq!(summary.errors.not_found, 1);

    let health = scheduler.health().await.unwrap();
    assert_eq!(health.orders_to_update, 3);
    assert!(!health.poll_in_progress);
    assert_eq!(health.recent_activity.len(), 2);
    assert!(health.recent_activity.iter().all(|a| a.order_number == "JW-1"));

    let report = metrics.report();
    assert_eq!(report.cycles_total, 1);
    assert_eq!(report.fetch_count, 3);
    assert_eq!(report.events_appended, 2);
    assert_eq!(report.events_discarded, 1);

    // Release the database lock, then reload from disk to check what was persisted
    drop(scheduler);
    drop(store);
    let reopened = RocksOrderStore::open(&path).unwrap();

    let updated = reopened.get("JW-1").await.unwrap().unwrap();
    let statuses: Vec<OrderStatus> = updated.history.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![OrderStatus::Processing, OrderStatus::Packaging, OrderStatus::OnTheRoad]);
    assert_eq!(updated.status, OrderStatus::OnTheRoad);
    assert!(updated.estimated_delivery.is_some());
    assert!(updated.last_polled_at.is_some());
    assert!(updated.review_flag.is_none());

    let flagged = reopened.get("JW-2").await.unwrap().unwrap();
    assert!(flagged.review_flag.is_some());
    assert_eq!(flagged.status, OrderStatus::Packaging);

    assert_eq!(reopened.get("JW-3").await.unwrap().unwrap(), before_failure);
    assert_eq!(reopened.get("JW-4").await.unwrap().unwrap().history.len(), 1);
}
