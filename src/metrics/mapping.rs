//! Mapping phase metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct MappingMetrics;

impl MappingMetrics {
    pub fn record_observations(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "mapping", "observations"))
            .increment(count as u64);
    }

    /// A configured metric was left out of a pass
    pub fn record_error(metric: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "mapping", "errors"),
            "metric" => metric.to_string()
        )
        .increment(1);
    }
}

impl PhaseMetrics for MappingMetrics {
    fn register_metrics() {
        use metrics::describe_counter;

        describe_counter!(
            phase_metric!(counter, "mapping", "observations"),
            "Observations produced from log records"
        );
        describe_counter!(
            phase_metric!(counter, "mapping", "errors"),
            "Collection passes in which a metric was unavailable"
        );
    }

    fn phase_name() -> &'static str {
        "mapping"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "mapping", "observations"),
                metric_type: MetricType::Counter,
                help: "Observations produced from log records",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "mapping", "errors"),
                metric_type: MetricType::Counter,
                help: "Collection passes in which a metric was unavailable",
                labels: vec!["metric"],
            },
        ]
    }
}
