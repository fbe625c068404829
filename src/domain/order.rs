//! Tracking order document and courier event records

use crate::domain::error::TrackingError;
use crate::domain::status::OrderStatus;
use chrono::{DateTime, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable), used to correlate one poll cycle in logs
pub fn new_cycle_id() -> String {
    Uuid::now_v7().to_string()
}

/// One entry in an order's status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: OrderStatus,
    /// When the courier says it happened
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// When it was appended to the history
    pub recorded_at: DateTime<Utc>,
}

impl StatusEvent {
    /// Build a history entry from a normalized courier event
    pub fn from_courier(status: OrderStatus, event: &CourierEvent, recorded_at: DateTime<Utc>) -> Self {
        Self {
            status,
            timestamp: event.timestamp,
            code: (!event.code.is_empty()).then(|| event.code.clone()),
            description: (!event.description.is_empty()).then(|| event.description.clone()),
            location: event.location.clone(),
            recorded_at,
        }
    }
}

/// Marker left on an order the courier does not recognise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFlag {
    pub reason: String,
    pub flagged_at: DateTime<Utc>,
}

/// Persisted tracking state for one shipped order
///
/// Invariants (checked by [`TrackingOrder::validate`]):
/// - `history` is non-empty and ascending by `timestamp`
/// - `status` equals the status of the last history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingOrder {
    pub order_number: String,
    #[serde(default)]
    pub docket_number: Option<String>,
    pub status: OrderStatus,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<StatusEvent>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every store write
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_flag: Option<ReviewFlag>,
}

/// Courier scans carry `HH:MM` times, so ordering against them uses whole minutes
fn scan_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(chrono::Duration::minutes(1)).unwrap_or(at)
}

impl TrackingOrder {
    /// Create the tracking document for a freshly shipped order
    ///
    /// The registration entry's `timestamp` is truncated to the minute so a
    /// scan reported for the same minute still sorts after it.
    pub fn new(
        order_number: &str,
        docket_number: Option<&str>,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_number: order_number.to_string(),
            docket_number: docket_number.map(str::to_string),
            status,
            estimated_delivery: None,
            history: vec![StatusEvent {
                status,
                timestamp: scan_minute(at),
                code: None,
                description: Some("tracking registered".to_string()),
                location: None,
                recorded_at: at,
            }],
            last_polled_at: None,
            version: 0,
            review_flag: None,
        }
    }

    /// Docket number, if assigned and not blank
    pub fn docket(&self) -> Option<&str> {
        self.docket_number.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    /// Non-terminal with a docket: the reconciler should poll it
    pub fn is_eligible(&self) -> bool {
        !self.status.is_terminal() && self.docket().is_some()
    }

    /// Timestamp of the newest history entry
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|e| e.timestamp)
    }

    /// History entries applied from courier scans, without the registration entry
    pub fn courier_updates(&self) -> &[StatusEvent] {
        self.history.get(1..).unwrap_or_default()
    }

    /// Append a history entry and move `status` along with it
    pub fn record(&mut self, event: StatusEvent) {
        self.status = event.status;
        self.history.push(event);
    }

    /// Check the stored document before reconciling it
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.order_number.trim().is_empty() {
            return Err(TrackingError::Validation("blank order number".to_string()));
        }

        let Some(last) = self.history.last() else {
            return Err(TrackingError::Validation(format!(
                "order {} has no status history",
                self.order_number
            )));
        };

        if last.status != self.status {
            return Err(TrackingError::Validation(format!(
                "order {} status {} does not match last history entry {}",
                self.order_number, self.status, last.status
            )));
        }

        if self.history.windows(2).any(|pair| pair[1].timestamp < pair[0].timestamp) {
            return Err(TrackingError::Validation(format!(
                "order {} history is not in chronological order",
                self.order_number
            )));
        }

        Ok(())
    }
}

/// A single courier scan event, already validated at the gateway boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierEvent {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CourierEvent {
    pub fn new(code: &str, description: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            location: None,
            timestamp,
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

/// Everything the courier reported for one docket
#[derive(Debug, Clone, PartialEq)]
pub struct Shipment {
    pub docket_number: String,
    /// Ascending by timestamp, newest last
    pub events: Vec<CourierEvent>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Row of the health summary's recent activity list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub order_number: String,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_order_satisfies_invariants() {
        let order = TrackingOrder::new("JW-1001", Some("D123"), OrderStatus::Processing, t(0));
        assert_eq!(order.history.len(), 1);
        assert_eq!(order.status, OrderStatus::Processing);
        assert!(order.validate().is_ok());
        assert!(order.is_eligible());
    }

    #[test]
    fn test_registration_entry_is_minute_aligned() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 4, 45, 30).unwrap() + Duration::milliseconds(250);
        let order = TrackingOrder::new("JW-1010", Some("D10"), OrderStatus::Processing, at);
        assert_eq!(order.history[0].timestamp, Utc.with_ymd_and_hms(2026, 10, 19, 4, 45, 0).unwrap());
        assert_eq!(order.history[0].recorded_at, at);
        assert!(order.courier_updates().is_empty());
    }

    #[test]
    fn test_blank_docket_is_not_eligible() {
        let mut order = TrackingOrder::new("JW-1002", Some("   "), OrderStatus::Processing, t(0));
        assert_eq!(order.docket(), None);
        assert!(!order.is_eligible());
        order.docket_number = None;
        assert!(!order.is_eligible());
    }

    #[test]
    fn test_terminal_order_is_not_eligible() {
        let order = TrackingOrder::new("JW-1003", Some("D9"), OrderStatus::Delivered, t(0));
        assert!(!order.is_eligible());
    }

    #[test]
    fn test_validate_rejects_status_mismatch() {
        let mut order = TrackingOrder::new("JW-1004", Some("D1"), OrderStatus::Processing, t(0));
        order.status = OrderStatus::OnTheRoad;
        let err = order.validate().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_validate_rejects_unordered_history() {
        let mut order = TrackingOrder::new("JW-1005", Some("D1"), OrderStatus::Processing, t(100));
        let earlier = CourierEvent::new("PKG", "Packed", t(100) - Duration::seconds(50));
        order.record(StatusEvent::from_courier(OrderStatus::Packaging, &earlier, t(200)));
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_history() {
        let mut order = TrackingOrder::new("JW-1006", Some("D1"), OrderStatus::Processing, t(0));
        order.history.clear();
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_document_serializes_camel_case() {
        let order = TrackingOrder::new("JW-1007", Some("D7"), OrderStatus::OrderPlaced, t(0));
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["orderNumber"], "JW-1007");
        assert_eq!(json["docketNumber"], "D7");
        assert_eq!(json["status"], "ORDER_PLACED");
        assert!(json["history"][0]["recordedAt"].is_string());
        assert!(json.get("reviewFlag").is_none());
    }
}
