//! Courier status normalization
//!
//! Maps free-text courier scan descriptions onto `OrderStatus`.
//!
//! Matching rules:
//! 1. Case-insensitive substring match of the description against `PHRASES`.
//!    The longest matching phrase wins ("undelivered" beats "delivered");
//!    phrases of equal length resolve to the one listed first.
//! 2. If no phrase matches, the scan code is looked up exactly in `CODES`.
//! 3. Otherwise the previous status is returned unchanged.
//!
//! Regressions are not filtered here; the reconciler decides what to keep.

use crate::domain::{CourierEvent, OrderStatus};

/// Description phrases, lowercase
const PHRASES: &[(&str, OrderStatus)] = &[
    // Terminal
    ("delivered", OrderStatus::Delivered),
    ("delivery completed", OrderStatus::Delivered),
    ("cancelled", OrderStatus::Cancelled),
    ("canceled", OrderStatus::Cancelled),
    ("returned to origin", OrderStatus::Cancelled),
    ("rto delivered", OrderStatus::Cancelled),
    // Moving
    ("undelivered", OrderStatus::OnTheRoad),
    ("not delivered", OrderStatus::OnTheRoad),
    ("delivery attempted", OrderStatus::OnTheRoad),
    ("out for delivery", OrderStatus::OnTheRoad),
    ("on the way", OrderStatus::OnTheRoad),
    ("on the road", OrderStatus::OnTheRoad),
    ("in transit", OrderStatus::OnTheRoad),
    ("shipped", OrderStatus::OnTheRoad),
    ("dispatched", OrderStatus::OnTheRoad),
    ("picked up", OrderStatus::OnTheRoad),
    ("arrived at", OrderStatus::OnTheRoad),
    ("departed", OrderStatus::OnTheRoad),
    // Packing
    ("packed", OrderStatus::Packaging),
    ("packaging", OrderStatus::Packaging),
    ("ready to ship", OrderStatus::Packaging),
    ("ready for pickup", OrderStatus::Packaging),
    ("pickup scheduled", OrderStatus::Packaging),
    ("manifested", OrderStatus::Packaging),
    // Accepted
    ("processing", OrderStatus::Processing),
    ("order confirmed", OrderStatus::Processing),
    ("booked", OrderStatus::Processing),
    ("shipment created", OrderStatus::Processing),
    // Placed
    ("order placed", OrderStatus::OrderPlaced),
    ("order received", OrderStatus::OrderPlaced),
];

/// Scan codes, uppercase, consulted only when no phrase matches
const CODES: &[(&str, OrderStatus)] = &[
    ("OP", OrderStatus::OrderPlaced),
    ("BKD", OrderStatus::Processing),
    ("PKG", OrderStatus::Packaging),
    ("MAN", OrderStatus::Packaging),
    ("PUP", OrderStatus::OnTheRoad),
    ("SHP", OrderStatus::OnTheRoad),
    ("ITR", OrderStatus::OnTheRoad),
    ("OFD", OrderStatus::OnTheRoad),
    ("UND", OrderStatus::OnTheRoad),
    ("DLV", OrderStatus::Delivered),
    ("RTO", OrderStatus::Cancelled),
    ("CAN", OrderStatus::Cancelled),
];

/// Stateless status mapper over the fixed tables
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusNormalizer;

impl StatusNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Map free text to a status using the phrase table (longest match wins)
    pub fn classify_text(&self, text: &str) -> Option<OrderStatus> {
        let lower = text.to_lowercase();
        let mut best: Option<(usize, OrderStatus)> = None;
        for &(phrase, status) in PHRASES {
            if phrase.len() > best.map_or(0, |(len, _)| len) && lower.contains(phrase) {
                best = Some((phrase.len(), status));
            }
        }
        best.map(|(_, status)| status)
    }

    /// Map a scan code to a status using the exact code table
    pub fn classify_code(&self, code: &str) -> Option<OrderStatus> {
        let code = code.trim();
        CODES
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(code))
            .map(|&(_, status)| status)
    }

    /// Normalize a courier event, falling back to `previous` when nothing matches
    pub fn normalize(&self, event: &CourierEvent, previous: OrderStatus) -> OrderStatus {
        self.classify_text(&event.description)
            .or_else(|| self.classify_code(&event.code))
            .unwrap_or(previous)
    }
}
