//! IO modules - external system interfaces
//!
//! - `courier` - Sequel247 tracking gateway client
//! - `store` - Tracking document persistence
//! - `http` - Operator/storefront HTTP endpoints and Prometheus metrics

pub mod courier;
pub mod http;
pub mod store;

// Re-export commonly used types
pub use courier::{CourierGateway, Sequel247Client};
pub use http::{start_http_server, HttpState};
pub use store::{MemoryOrderStore, OrderStore, RocksOrderStore};
