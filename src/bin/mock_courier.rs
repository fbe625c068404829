//! Mock Sequel247 tracking API
//!
//! Simulates the courier's tracking endpoint for local testing.
//!
//! Protocol:
//! - `POST /tracking` with JSON `{token, docket_no, store_code}`
//! - Reply `{status, message, data: {docket_no, estimated_delivery, tracking: [...]}}`
//!   with scan date/time in IST
//!
//! Behavior:
//! 1. Every poll of a docket reveals one more scan, walking the docket from
//!    booked to delivered
//! 2. Dockets starting with `CXL` are cancelled after booking
//! 3. Dockets starting with `NF` are unknown (`status: false`, "Docket not found")
//! 4. Dockets starting with `ERR` answer 503
//! 5. A token other than `--token` answers 401
//!
//! Usage:
//!   cargo run --bin mock_courier -- --port 9100 --token test-token

use bytes::Bytes;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Courier local time (IST, UTC+05:30)
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

const DELIVERY_STAGES: &[(&str, &str)] = &[
    ("BKD", "Shipment booked"),
    ("PKG", "Packed and ready to ship"),
    ("PUP", "Picked up by courier"),
    ("ITR", "In transit to destination hub"),
    ("OFD", "Out for delivery"),
    ("DLV", "Delivered to consignee"),
];

const CANCEL_STAGES: &[(&str, &str)] = &[
    ("BKD", "Shipment booked"),
    ("CAN", "Shipment cancelled by shipper"),
];

const LOCATIONS: &[&str] = &["Mumbai", "Mumbai Hub", "Pune Hub", "Bengaluru Hub", "Bengaluru"];

#[derive(Parser, Debug)]
#[command(name = "mock_courier")]
#[command(about = "Mock Sequel247 tracking API for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "9100")]
    port: u16,

    /// Token the mock accepts
    #[arg(short, long, default_value = "test-token")]
    token: String,

    /// Days between booking and the estimated delivery date
    #[arg(long, default_value = "3")]
    eta_days: i64,
}

#[derive(Debug, Deserialize)]
struct TrackingRequest {
    #[serde(default)]
    token: String,
    #[serde(default)]
    docket_no: String,
    #[serde(default)]
    store_code: String,
}

/// Scan times revealed so far, per docket
#[derive(Default)]
struct MockState {
    revealed: Mutex<FxHashMap<String, Vec<DateTime<Utc>>>>,
}

impl MockState {
    /// Reveal the next scan (if any) and return all scan times so far
    fn poll(&self, docket: &str, stage_count: usize) -> Vec<DateTime<Utc>> {
        let mut revealed = self.revealed.lock();
        let times = revealed.entry(docket.to_string()).or_default();
        if times.len() < stage_count {
            times.push(Utc::now());
        }
        times.clone()
    }
}

fn ist(ts: DateTime<Utc>) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(IST_OFFSET_SECS) {
        Some(offset) => ts.with_timezone(&offset),
        None => ts.fixed_offset(),
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

/// Build the vendor reply for one tracking request
fn tracking_reply(state: &MockState, args: &Args, request: &TrackingRequest) -> (StatusCode, Value) {
    if request.token != args.token {
        return (StatusCode::UNAUTHORIZED, json!({ "status": false, "message": "Invalid token" }));
    }

    let docket = request.docket_no.trim();
    if docket.is_empty() || docket.starts_with("NF") {
        return (StatusCode::OK, json!({ "status": false, "message": "Docket not found" }));
    }
    if docket.starts_with("ERR") {
        return (StatusCode::SERVICE_UNAVAILABLE, json!({ "status": false, "message": "Upstream timeout" }));
    }

    let stages = if docket.starts_with("CXL") { CANCEL_STAGES } else { DELIVERY_STAGES };
    let times = state.poll(docket, stages.len());

    let tracking: Vec<Value> = stages
        .iter()
        .zip(&times)
        .enumerate()
        .map(|(i, (&(code, description), &at))| {
            let local = ist(at);
            json!({
                "status_code": code,
                "status": description,
                "location": LOCATIONS[i.min(LOCATIONS.len() - 1)],
                "date": local.format("%Y-%m-%d").to_string(),
                "time": local.format("%H:%M:%S").to_string(),
            })
        })
        .collect();

    let eta = times
        .first()
        .map(|booked| ist(*booked + Duration::days(args.eta_days)).format("%Y-%m-%d").to_string());

    println!(
        "[TRACK] docket={} store={} scans={}/{}",
        docket,
        request.store_code,
        tracking.len(),
        stages.len()
    );

    (
        StatusCode::OK,
        json!({
            "status": "success",
            "message": "OK",
            "data": {
                "docket_no": docket,
                "estimated_delivery": eta,
                "tracking": tracking,
            }
        }),
    )
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<MockState>,
    args: Arc<Args>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if (req.method(), req.uri().path()) != (&Method::POST, "/tracking") {
        return Ok(json_response(StatusCode::NOT_FOUND, json!({ "status": false, "message": "Not Found" })));
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            println!("[ERROR] body read failed: {e}");
            return Ok(json_response(StatusCode::BAD_REQUEST, json!({ "status": false, "message": "Bad request" })));
        }
    };
    let request: TrackingRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            println!("[ERROR] invalid request body: {e}");
            return Ok(json_response(StatusCode::BAD_REQUEST, json!({ "status": false, "message": "Bad request" })));
        }
    };

    let (status, reply) = tracking_reply(&state, &args, &request);
    Ok(json_response(status, reply))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Arc::new(Args::parse());
    let state = Arc::new(MockState::default());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;

    println!("Mock Sequel247 listening on {addr}");
    println!("  token:    {}", args.token);
    println!("  dockets:  CXL* cancel, NF* not found, ERR* 503, anything else delivers");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();
        let args = args.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone(), args.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                println!("[ERROR] connection {peer}: {e}");
            }
        });
    }
}
