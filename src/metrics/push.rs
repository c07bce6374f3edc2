//! Push phase metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct PushMetrics;

impl PushMetrics {
    pub fn record_push_success(bytes: usize) {
        ::metrics::counter!(phase_metric!(counter, "push", "requests"), "result" => "success")
            .increment(1);
        ::metrics::gauge!(phase_metric!(gauge, "push", "last_payload_bytes")).set(bytes as f64);
    }

    pub fn record_push_failure() {
        ::metrics::counter!(phase_metric!(counter, "push", "requests"), "result" => "error")
            .increment(1);
    }
}

impl PhaseMetrics for PushMetrics {
    fn register_metrics() {
        use metrics::{describe_counter, describe_gauge};

        describe_counter!(
            phase_metric!(counter, "push", "requests"),
            "Pushgateway requests by result"
        );
        describe_gauge!(
            phase_metric!(gauge, "push", "last_payload_bytes"),
            "Size of the last successfully pushed snapshot"
        );
    }

    fn phase_name() -> &'static str {
        "push"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "push", "requests"),
                metric_type: MetricType::Counter,
                help: "Pushgateway requests by result",
                labels: vec!["result"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "push", "last_payload_bytes"),
                metric_type: MetricType::Gauge,
                help: "Size of the last successfully pushed snapshot",
                labels: vec![],
            },
        ]
    }
}
