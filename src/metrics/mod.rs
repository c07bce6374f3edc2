//! Self-instrumentation for the exporter
//!
//! Each stage of a collection pass (query, mapping, push) owns its own metrics
//! in a dedicated submodule. These are the exporter's *own* health metrics;
//! the metrics mapped from log records are rendered by `crate::exposition`.

/// cloudwatch_log_export_{phase}_{name}[_total]
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("cloudwatch_log_export_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("cloudwatch_log_export_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("cloudwatch_log_export_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

pub mod mapping;
pub mod push;
pub mod query;
pub mod registry;

pub use mapping::MappingMetrics;
pub use push::PushMetrics;
pub use query::QueryMetrics;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Install the global Prometheus recorder. Idempotent.
///
/// No HTTP listener is started: the exporter serves the rendered text from its
/// own endpoint, appended after the mapped log metrics.
pub fn init_metrics() {
    INIT.call_once(|| {
        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Full(phase_metric!(histogram, "query", "duration_seconds").to_string()),
            DURATION_BUCKETS,
        ) {
            Ok(builder) => builder,
            Err(e) => {
                warn!("Invalid histogram buckets, falling back to summaries: {}", e);
                PrometheusBuilder::new()
            }
        };

        match builder.install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("METRICS: handle already stored");
                }
                registry::register_all_metrics();
                info!("Prometheus recorder installed");
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

pub fn handle() -> Option<&'static PrometheusHandle> {
    HANDLE.get()
}

/// Render the exporter's own metrics, or an empty string before `init_metrics`.
pub fn render() -> String {
    handle().map(|h| h.render()).unwrap_or_default()
}

/// Implemented by each stage that owns metrics.
pub trait PhaseMetrics {
    /// Describe every metric so HELP text is present from the first scrape.
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

pub const BUILD_INFO: &str = "cloudwatch_log_export_build_info";

/// Constant 1 gauge carrying the crate version, like a version collector.
pub fn record_build_info() {
    ::metrics::gauge!(BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_naming_convention() {
        assert_eq!(
            phase_metric!(counter, "query", "cycles"),
            "cloudwatch_log_export_query_cycles_total"
        );
        assert_eq!(
            phase_metric!(histogram, "query", "duration_seconds"),
            "cloudwatch_log_export_query_duration_seconds"
        );
        assert_eq!(
            phase_metric!(gauge, "query", "checkpoint_seconds"),
            "cloudwatch_log_export_query_checkpoint_seconds"
        );
    }
}
