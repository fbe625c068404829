//! Error taxonomy for tracking reconciliation
//!
//! Every per-order failure maps onto one `TrackingError` kind. None of them
//! aborts a poll cycle; the reconciler logs the kind and moves on.

use thiserror::Error;

/// Per-order tracking failures
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Network failure, timeout, 5xx or unparseable courier response.
    /// Retried on the next cycle.
    #[error("courier gateway error: {0}")]
    Gateway(String),

    /// Courier rejected the configured token. Needs operator action.
    #[error("courier rejected credentials: {0}")]
    Auth(String),

    /// Docket unknown to the courier. Order is flagged for manual review.
    #[error("docket not found at courier: {0}")]
    NotFound(String),

    /// Stored order violates its invariants and cannot be reconciled.
    #[error("invalid stored order: {0}")]
    Validation(String),

    /// Persisting the reconciled order failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackingError {
    /// Stable identifier used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            TrackingError::Gateway(_) => "gateway",
            TrackingError::Auth(_) => "auth",
            TrackingError::NotFound(_) => "not_found",
            TrackingError::Validation(_) => "validation",
            TrackingError::Store(_) => "store",
        }
    }
}

/// Order store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer updated the document since it was read
    #[error("version conflict on order {order_number}: expected {expected}, found {found}")]
    Conflict { order_number: String, expected: u64, found: u64 },

    #[error("order {0} already exists")]
    Duplicate(String),

    #[error("order {0} does not exist")]
    UnknownOrder(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    /// Database engine or blocking-task failure
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
