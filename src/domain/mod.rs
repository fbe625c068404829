//! Domain models - tracking documents, courier events and lifecycle stages
//!
//! - `status` - `OrderStatus` lifecycle and its ordering rules
//! - `order` - `TrackingOrder`, `StatusEvent`, `CourierEvent`, `Shipment`
//! - `error` - `TrackingError` / `StoreError` taxonomy

pub mod error;
pub mod order;
pub mod status;

// Re-export commonly used types at module level
pub use error::{StoreError, TrackingError};
pub use order::{CourierEvent, RecentActivity, ReviewFlag, Shipment, StatusEvent, TrackingOrder};
pub use status::OrderStatus;
