//! Observability subsystem: structured logging and Prometheus metrics.
//!
//! # Design Decisions
//! - Structured JSON logging for machine parsing; level via RUST_LOG
//! - The access log is emitted by the response observer, one line per request
//! - Metrics are recorded through the `metrics` facade so tests can run
//!   without a recorder installed

pub mod logging;
pub mod metrics;
