//! Telemetry infrastructure: structured logging and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{describe_engine_metrics, install_prometheus_exporter};
