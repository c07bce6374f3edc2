//! Prometheus text exposition (format 0.0.4) for mapped observations.
//!
//! Observations sharing a metric and label set collapse into one sample:
//! counters add up, gauges keep the last value.

use crate::mapping::{MetricKind, Observation};
use std::collections::BTreeMap;
use std::fmt::Write;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub fq_name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    /// (label values, value) in first-seen order
    pub samples: Vec<(Vec<String>, f64)>,
}

impl MetricFamily {
    fn from_observation(obs: &Observation) -> Self {
        Self {
            fq_name: obs.descriptor.fq_name.clone(),
            help: obs.descriptor.help.clone(),
            kind: obs.kind,
            label_names: obs.descriptor.label_names.clone(),
            samples: Vec::new(),
        }
    }

    pub fn apply(&mut self, label_values: &[String], value: f64) {
        match self
            .samples
            .iter_mut()
            .find(|(existing, _)| existing.as_slice() == label_values)
        {
            Some((_, current)) => match self.kind {
                MetricKind::Counter => *current += value,
                MetricKind::Gauge => *current = value,
            },
            None => self.samples.push((label_values.to_vec(), value)),
        }
    }
}

/// Accumulates observations across passes. Backs the push sink, where a
/// counter must keep growing between snapshots.
///
/// Series are never evicted, so every label set seen since startup stays
/// in memory until `clear` is called.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    families: BTreeMap<String, MetricFamily>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, observations: &[Observation]) {
        for obs in observations {
            self.families
                .entry(obs.descriptor.fq_name.clone())
                .or_insert_with(|| MetricFamily::from_observation(obs))
                .apply(&obs.label_values, obs.value);
        }
    }

    /// Label sets held across all families.
    pub fn series_count(&self) -> usize {
        self.families.values().map(|f| f.samples.len()).sum()
    }

    pub fn clear(&mut self) {
        self.families.clear();
    }

    pub fn render(&self) -> String {
        render_families(self.families.values())
    }
}

/// Render one pass worth of observations.
pub fn render(observations: &[Observation]) -> String {
    let mut registry = SnapshotRegistry::new();
    registry.apply(observations);
    registry.render()
}

pub fn render_families<'a>(families: impl IntoIterator<Item = &'a MetricFamily>) -> String {
    let mut out = String::new();
    for family in families {
        if family.samples.is_empty() {
            continue;
        }
        let _ = writeln!(out, "# HELP {} {}", family.fq_name, escape_help(&family.help));
        let _ = writeln!(out, "# TYPE {} {}", family.fq_name, family.kind);
        for (label_values, value) in &family.samples {
            out.push_str(&family.fq_name);
            if !family.label_names.is_empty() {
                out.push('{');
                for (i, (name, label_value)) in
                    family.label_names.iter().zip(label_values).enumerate()
                {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{}=\"{}\"", name, escape_label_value(label_value));
                }
                out.push('}');
            }
            let _ = writeln!(out, " {}", format_value(*value));
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}
