//! Push-based observability
//!
//! Metrics are kept in a prometheus registry and pushed out as periodic
//! JSON lines on stdout. No HTTP server, no incoming requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
