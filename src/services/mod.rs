//! Services - tracking business logic
//!
//! - `normalizer` - Courier text/code to `OrderStatus` mapping
//! - `reconciler` - Applies courier scans to stored orders
//! - `scheduler` - Interval and manual cycle triggering, health

pub mod normalizer;
pub mod reconciler;
pub mod scheduler;

// Re-export commonly used types
pub use normalizer::StatusNormalizer;
pub use reconciler::{CycleSummary, OrderOutcome, Reconciler};
pub use scheduler::{CycleOutcome, HealthReport, Scheduler};
