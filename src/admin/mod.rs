//! # Admin Module
//!
//! This module provides the management HTTP surface for runtime operation of
//! the gateway:
//! - Viewing pool statistics and per-server state
//! - Switching the active load-balancing algorithm by name
//! - Prometheus metrics exposition
//!
//! ## Security Considerations
//! These endpoints can modify the gateway's routing behavior and should be
//! protected with appropriate authentication when exposed beyond operators.

pub mod endpoints;

pub use endpoints::{AdminRouter, AdminState};
