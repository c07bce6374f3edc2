//! Query phase metrics
//!
//! Cycle outcomes, poll counts, durations and checkpoint progress for the
//! Logs Insights query loop.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct QueryMetrics;

impl QueryMetrics {
    /// Record one finished cycle, whatever its terminal state
    pub fn record_cycle(outcome: &'static str, duration_secs: f64, polls: u32, records: usize) {
        ::metrics::counter!(phase_metric!(counter, "query", "cycles"), "outcome" => outcome)
            .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "query", "duration_seconds"))
            .record(duration_secs);
        ::metrics::counter!(phase_metric!(counter, "query", "polls")).increment(polls as u64);
        ::metrics::counter!(phase_metric!(counter, "query", "records")).increment(records as u64);
    }

    pub fn record_checkpoint(end_time: i64) {
        ::metrics::gauge!(phase_metric!(gauge, "query", "checkpoint_seconds"))
            .set(end_time as f64);
    }
}

impl PhaseMetrics for QueryMetrics {
    fn register_metrics() {
        use metrics::{describe_counter, describe_gauge, describe_histogram};

        describe_counter!(
            phase_metric!(counter, "query", "cycles"),
            "Query cycles by terminal outcome"
        );
        describe_counter!(
            phase_metric!(counter, "query", "polls"),
            "Result polls issued against the log-query service"
        );
        describe_counter!(
            phase_metric!(counter, "query", "records"),
            "Result rows returned by completed queries"
        );
        describe_histogram!(
            phase_metric!(histogram, "query", "duration_seconds"),
            "Wall time from submission to terminal state"
        );
        describe_gauge!(
            phase_metric!(gauge, "query", "checkpoint_seconds"),
            "End of the last completed query window, epoch seconds"
        );
    }

    fn phase_name() -> &'static str {
        "query"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "query", "cycles"),
                metric_type: MetricType::Counter,
                help: "Query cycles by terminal outcome",
                labels: vec!["outcome"],
            },
            MetricDoc {
                name: phase_metric!(counter, "query", "polls"),
                metric_type: MetricType::Counter,
                help: "Result polls issued against the log-query service",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "query", "records"),
                metric_type: MetricType::Counter,
                help: "Result rows returned by completed queries",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "query", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time from submission to terminal state",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "query", "checkpoint_seconds"),
                metric_type: MetricType::Gauge,
                help: "End of the last completed query window, epoch seconds",
                labels: vec![],
            },
        ]
    }
}
