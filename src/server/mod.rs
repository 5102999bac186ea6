//! HTTP server exposing device information.
//!
//! - [`device_api`]: Response types and route handlers

pub mod device_api;
