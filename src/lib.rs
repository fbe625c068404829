//! Shipment tracking library
//!
//! Polls the Sequel247 courier for every open shipment, normalizes the scan
//! text into order statuses and keeps each order's status history current.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
