//! Sequel247 courier gateway
//!
//! Request: `POST {endpoint}/tracking` with `{"token","docket_no","store_code"}`.
//! Response:
//!
//! ```json
//! {"status": true, "message": "ok",
//!  "data": {"docket_no": "D123", "estimated_delivery": "2026-10-21",
//!           "tracking": [{"status_code": "PKG", "status": "Packed", "location": "Mumbai",
//!                         "date": "2026-10-19", "time": "10:15:00"}]}}
//! ```
//!
//! Scan times are courier-local (IST, +05:30) and converted to UTC here.
//! One HTTP attempt per call; retrying is the scheduler's business.

use crate::domain::{CourierEvent, Shipment, TrackingError};
use crate::infra::config::CourierEndpoint;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Courier-local offset in seconds (+05:30)
const COURIER_UTC_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Read side of a courier integration
#[async_trait]
pub trait CourierGateway: Send + Sync {
    /// Fetch everything the courier knows about a docket
    async fn fetch_shipment(&self, docket_number: &str) -> Result<Shipment, TrackingError>;

    /// Scan events for a docket, ascending by timestamp (newest last)
    async fn fetch_events(&self, docket_number: &str) -> Result<Vec<CourierEvent>, TrackingError> {
        self.fetch_shipment(docket_number).await.map(|shipment| shipment.events)
    }
}

#[derive(Debug, Serialize)]
struct TrackingRequest<'a> {
    token: &'a str,
    docket_no: &'a str,
    store_code: &'a str,
}

#[derive(Debug, Deserialize)]
struct TrackingResponse {
    #[serde(default, deserialize_with = "deserialize_flag")]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<TrackingData>,
}

#[derive(Debug, Deserialize)]
struct TrackingData {
    #[serde(default)]
    docket_no: Option<String>,
    #[serde(default)]
    estimated_delivery: Option<String>,
    #[serde(default)]
    tracking: Vec<ScanRecord>,
}

#[derive(Debug, Deserialize)]
struct ScanRecord {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

/// Vendor success flag - sent as a bool by some deployments and as a string by others
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a boolean or a boolean-like string")
        }

        fn visit_bool<E>(self, value: bool) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_str<E>(self, value: &str) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "success" | "1" | "ok"))
        }

        fn visit_u64<E>(self, value: u64) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(value == 1)
        }

        fn visit_i64<E>(self, value: i64) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(value == 1)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

fn courier_offset() -> Option<FixedOffset> {
    FixedOffset::east_opt(COURIER_UTC_OFFSET_SECS)
}

/// Parse courier-local date + time into UTC
fn parse_scan_time(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M"))
        .ok()?;
    courier_offset()?
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a courier-local delivery date (midnight local) into UTC
fn parse_delivery_date(date: &str) -> Option<DateTime<Utc>> {
    parse_scan_time(date, "00:00:00")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Classify a vendor-reported failure by its message
fn classify_vendor_failure(docket_number: &str, message: &str) -> TrackingError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("token") || lower.contains("unauthori") || lower.contains("authentication") {
        TrackingError::Auth(message.to_string())
    } else if lower.contains("not found")
        || lower.contains("invalid docket")
        || lower.contains("no record")
    {
        TrackingError::NotFound(docket_number.to_string())
    } else {
        TrackingError::Gateway(format!("courier reported failure: {message}"))
    }
}

/// Turn a courier response body into a validated `Shipment`
///
/// Scans without a usable timestamp or without any text are dropped.
pub fn parse_tracking_response(docket_number: &str, body: &str) -> Result<Shipment, TrackingError> {
    let response: TrackingResponse = serde_json::from_str(body)
        .map_err(|e| TrackingError::Gateway(format!("malformed courier response: {e}")))?;

    if !response.status {
        let message = response.message.unwrap_or_else(|| "no message".to_string());
        return Err(classify_vendor_failure(docket_number, &message));
    }

    let Some(data) = response.data else {
        return Err(TrackingError::Gateway("courier response has no data".to_string()));
    };

    if let Some(reported) = non_blank(data.docket_no) {
        if !reported.eq_ignore_ascii_case(docket_number.trim()) {
            return Err(TrackingError::Gateway(format!(
                "courier answered for docket {reported} instead of {docket_number}"
            )));
        }
    }

    let mut events = Vec::with_capacity(data.tracking.len());
    for scan in data.tracking {
        let code = non_blank(scan.status_code).unwrap_or_default();
        let description = non_blank(scan.status).unwrap_or_default();
        if code.is_empty() && description.is_empty() {
            warn!(docket = %docket_number, "courier_scan_without_status");
            continue;
        }

        let timestamp = match (scan.date.as_deref(), scan.time.as_deref()) {
            (Some(date), Some(time)) => parse_scan_time(date, time),
            (Some(date), None) => parse_scan_time(date, "00:00:00"),
            _ => None,
        };
        let Some(timestamp) = timestamp else {
            warn!(docket = %docket_number, code = %code, "courier_scan_bad_timestamp");
            continue;
        };

        events.push(CourierEvent {
            code,
            description,
            location: non_blank(scan.location),
            timestamp,
        });
    }

    // Stable: scans sharing a timestamp keep courier order
    events.sort_by_key(|e| e.timestamp);

    Ok(Shipment {
        docket_number: docket_number.to_string(),
        events,
        estimated_delivery: data.estimated_delivery.as_deref().and_then(parse_delivery_date),
    })
}

/// Map a non-success HTTP status onto the error taxonomy
fn classify_status(docket_number: &str, status: StatusCode, body: &str) -> TrackingError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TrackingError::Auth(format!("courier returned {status}"))
        }
        StatusCode::NOT_FOUND => TrackingError::NotFound(docket_number.to_string()),
        _ => {
            let snippet: String = body.chars().take(200).collect();
            TrackingError::Gateway(format!("courier returned {status}: {snippet}"))
        }
    }
}

/// HTTP client for the Sequel247 tracking API
pub struct Sequel247Client {
    url: String,
    token: String,
    store_code: String,
    http: reqwest::Client,
}

impl Sequel247Client {
    pub fn new(endpoint: &CourierEndpoint, timeout: Duration) -> anyhow::Result<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/tracking", endpoint.endpoint.trim_end_matches('/')),
            token: endpoint.token.clone(),
            store_code: endpoint.store_code.clone(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CourierGateway for Sequel247Client {
    async fn fetch_shipment(&self, docket_number: &str) -> Result<Shipment, TrackingError> {
        let request = TrackingRequest {
            token: &self.token,
            docket_no: docket_number,
            store_code: &self.store_code,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TrackingError::Gateway(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TrackingError::Gateway(format!("reading response failed: {e}")))?;

        debug!(docket = %docket_number, status = %status, bytes = body.len(), "courier_response");

        if !status.is_success() {
            return Err(classify_status(docket_number, status, &body));
        }

        parse_tracking_response(docket_number, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_scan_time_converts_ist_to_utc() {
        let ts = parse_scan_time("2026-10-19", "10:15:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-10-19T04:45:00+00:00");
        let short = parse_scan_time("2026-10-19", "10:15").unwrap();
        assert_eq!(short, ts);
        assert!(parse_scan_time("19/10/2026", "10:15").is_none());
    }

    #[test]
    fn test_parse_response_sorts_and_validates_scans() {
        let body = r#"{
            "status": "success",
            "data": {
                "docket_no": "D123",
                "estimated_delivery": "2026-10-22",
                "tracking": [
                    {"status_code": "SHP", "status": "Shipped, on the road", "date": "2026-10-19", "time": "18:00"},
                    {"status_code": "PKG", "status": "Packed and ready", "location": "Jaipur", "date": "2026-10-19", "time": "09:30:00"},
                    {"status_code": "", "status": "", "date": "2026-10-19", "time": "19:00"},
                    {"status_code": "XX", "status": "garbled", "date": "yesterday"}
                ]
            }
        }"#;

        let shipment = parse_tracking_response("D123", body).unwrap();
        assert_eq!(shipment.events.len(), 2);
        assert_eq!(shipment.events[0].code, "PKG");
        assert_eq!(shipment.events[0].location.as_deref(), Some("Jaipur"));
        assert_eq!(shipment.events[1].code, "SHP");
        assert!(shipment.events[0].timestamp < shipment.events[1].timestamp);

        let eta = shipment.estimated_delivery.unwrap();
        assert_eq!(eta.hour(), 18);
        assert_eq!(eta.minute(), 30);
    }

    #[test]
    fn test_vendor_failure_classification() {
        let auth = parse_tracking_response("D1", r#"{"status": false, "message": "Invalid token"}"#);
        assert_eq!(auth.unwrap_err().kind(), "auth");

        let missing =
            parse_tracking_response("D1", r#"{"status": false, "message": "Docket not found"}"#);
        assert_eq!(missing.unwrap_err().kind(), "not_found");

        let other = parse_tracking_response("D1", r#"{"status": 0, "message": "maintenance"}"#);
        assert_eq!(other.unwrap_err().kind(), "gateway");
    }

    #[test]
    fn test_malformed_body_is_gateway_error() {
        let err = parse_tracking_response("D1", "<html>502 Bad Gateway</html>").unwrap_err();
        assert_eq!(err.kind(), "gateway");

        let err = parse_tracking_response("D1", r#"{"status": true}"#).unwrap_err();
        assert_eq!(err.kind(), "gateway");
    }

    #[test]
    fn test_mismatched_docket_is_rejected() {
        let body = r#"{"status": true, "data": {"docket_no": "D999", "tracking": []}}"#;
        let err = parse_tracking_response("D123", body).unwrap_err();
        assert_eq!(err.kind(), "gateway");
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_status("D1", StatusCode::UNAUTHORIZED, "").kind(), "auth");
        assert_eq!(classify_status("D1", StatusCode::FORBIDDEN, "").kind(), "auth");
        assert_eq!(classify_status("D1", StatusCode::NOT_FOUND, "").kind(), "not_found");
        assert_eq!(classify_status("D1", StatusCode::BAD_GATEWAY, "down").kind(), "gateway");
        assert_eq!(classify_status("D1", StatusCode::TOO_MANY_REQUESTS, "").kind(), "gateway");
    }

    #[test]
    fn test_client_url_joins_endpoint() {
        let endpoint = CourierEndpoint {
            endpoint: "https://sequel247.example/api/".to_string(),
            token: "t".to_string(),
            store_code: "S".to_string(),
        };
        let client = Sequel247Client::new(&endpoint, Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(), "https://sequel247.example/api/tracking");
    }
}
