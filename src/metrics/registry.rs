//! Registers every phase's metrics and flags name collisions at startup.

use crate::metrics::{MappingMetrics, MetricDoc, MetricType, PhaseMetrics, PushMetrics, QueryMetrics};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<QueryMetrics>(&mut all_metrics);
    register_phase_metrics::<MappingMetrics>(&mut all_metrics);
    register_phase_metrics::<PushMetrics>(&mut all_metrics);

    ::metrics::describe_gauge!(super::BUILD_INFO, "Exporter version, constant 1");
    super::record_build_info();

    info!(
        "Registered {} exporter metrics across all phases",
        all_metrics.len()
    );
}

/// Register metrics for one phase, returning the names that collided.
fn register_phase_metrics<T: PhaseMetrics>(
    all_metrics: &mut HashMap<String, MetricDoc>,
) -> Vec<&'static str> {
    T::register_metrics();
    let phase_name = T::phase_name();
    let mut conflicts = Vec::new();

    for doc in T::metrics_documentation() {
        if extract_phase_from_metric_name(doc.name) != phase_name {
            warn!(
                "Metric '{}' does not carry the '{}' phase prefix",
                doc.name, phase_name
            );
        }
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' registered again by phase '{}'",
                doc.name, phase_name
            );
            conflicts.push(doc.name);
        } else {
            debug!("  - {} ({:?}): {}", doc.name, doc.metric_type, doc.help);
            all_metrics.insert(doc.name.to_string(), doc);
        }
    }

    conflicts
}

/// Every series name the exporter emits about itself, histogram
/// `_bucket`/`_sum`/`_count` series included.
pub fn reserved_metric_names() -> HashSet<String> {
    let docs = QueryMetrics::metrics_documentation()
        .into_iter()
        .chain(MappingMetrics::metrics_documentation())
        .chain(PushMetrics::metrics_documentation());

    let mut names = HashSet::new();
    names.insert(super::BUILD_INFO.to_string());
    for doc in docs {
        if doc.metric_type == MetricType::Histogram {
            for suffix in ["_bucket", "_sum", "_count"] {
                names.insert(format!("{}{}", doc.name, suffix));
            }
        }
        names.insert(doc.name.to_string());
    }
    names
}

/// Phase segment of an exporter metric name, e.g. `query` for
/// `cloudwatch_log_export_query_cycles_total`.
pub fn extract_phase_from_metric_name(metric_name: &str) -> &str {
    if let Some(stripped) = metric_name.strip_prefix("cloudwatch_log_export_") {
        if let Some(next_underscore) = stripped.find('_') {
            return &stripped[..next_underscore];
        }
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_phase_from_metric_name() {
        assert_eq!(
            extract_phase_from_metric_name("cloudwatch_log_export_query_cycles_total"),
            "query"
        );
        assert_eq!(
            extract_phase_from_metric_name("cloudwatch_log_export_push_requests_total"),
            "push"
        );
        assert_eq!(extract_phase_from_metric_name("errors_total"), "unknown");
    }

    #[test]
    fn test_phases_do_not_collide() {
        let mut all = HashMap::new();
        assert!(register_phase_metrics::<QueryMetrics>(&mut all).is_empty());
        assert!(register_phase_metrics::<MappingMetrics>(&mut all).is_empty());
        assert!(register_phase_metrics::<PushMetrics>(&mut all).is_empty());

        for name in all.keys() {
            let phase = extract_phase_from_metric_name(name);
            assert!(["query", "mapping", "push"].contains(&phase), "{}", name);
        }
    }

    #[test]
    fn test_registering_twice_reports_conflicts() {
        let mut all = HashMap::new();
        register_phase_metrics::<QueryMetrics>(&mut all);
        let conflicts = register_phase_metrics::<QueryMetrics>(&mut all);
        assert_eq!(conflicts.len(), QueryMetrics::metrics_documentation().len());
    }

    #[test]
    fn test_reserved_names_cover_every_self_metric_series() {
        let reserved = reserved_metric_names();
        assert!(reserved.contains("cloudwatch_log_export_query_cycles_total"));
        assert!(reserved.contains("cloudwatch_log_export_query_duration_seconds_bucket"));
        assert!(reserved.contains("cloudwatch_log_export_push_last_payload_bytes"));
        assert!(reserved.contains(crate::metrics::BUILD_INFO));
        assert!(!reserved.contains("cloudwatch_log_export_errors"));
    }
}
