//! # Monitoring Broker Test Suite
//!
//! Unified test crate for flows that cross crate boundaries.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Sample events, codecs, read helpers
//! └── integration/
//!     ├── bbdo_flows.rs  # Two BBDO peers over memory and TCP
//!     ├── bus_flows.rs   # Engine fan-out through the Stream contract
//!     └── e2e_broker.rs  # Config file → runtime → BBDO peers
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mb-tests
//!
//! # By flow
//! cargo test -p mb-tests integration::bbdo_flows
//!
//! # Benchmarks
//! cargo bench -p mb-tests
//! ```

#![allow(dead_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod fixtures;
pub mod integration;
