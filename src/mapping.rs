//! Declarative mapping from normalized log records to metric observations.
//!
//! Every configured metric produces one observation per record. A metric that
//! cannot be mapped (unknown type, unreadable value field) is left out of the
//! pass entirely; the others are unaffected.

use crate::config::{ExporterConfig, MetricDefinition, ValueSource};
use crate::error::MappingError;
use crate::metrics::MappingMetrics;
use crate::record::NormalizedRecord;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    /// Case-insensitive `counter` / `gauge`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    /// Key in the `metrics` section
    pub name: String,
    /// `<namespace>_<name>`
    pub fq_name: String,
    pub help: String,
    pub label_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub descriptor: Arc<MetricDescriptor>,
    pub kind: MetricKind,
    pub value: f64,
    /// Aligned with `descriptor.label_names`
    pub label_values: Vec<String>,
}

impl Observation {
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.descriptor
            .label_names
            .iter()
            .map(String::as_str)
            .zip(self.label_values.iter().map(String::as_str))
    }
}

/// Output of one collection pass.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub observations: Vec<Observation>,
    /// One entry per metric left out of this pass
    pub errors: Vec<MappingError>,
}

pub struct MappingEngine {
    config: Arc<ExporterConfig>,
    descriptors: OnceCell<BTreeMap<String, Arc<MetricDescriptor>>>,
}

impl MappingEngine {
    pub fn new(config: Arc<ExporterConfig>) -> Self {
        Self {
            config,
            descriptors: OnceCell::new(),
        }
    }

    /// Descriptors for every configured metric, sorted by name. Built once.
    pub fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        self.descriptors().values().cloned().collect()
    }

    fn descriptors(&self) -> &BTreeMap<String, Arc<MetricDescriptor>> {
        self.descriptors.get_or_init(|| {
            self.config
                .metrics
                .iter()
                .map(|(name, metric)| {
                    let descriptor = MetricDescriptor {
                        name: name.clone(),
                        fq_name: self.config.fq_name(name),
                        help: metric.description.clone(),
                        label_names: metric.labels.clone(),
                    };
                    info!("metric description for \"{}\" registered", name);
                    (name.clone(), Arc::new(descriptor))
                })
                .collect()
        })
    }

    /// Map every record through every configured metric.
    pub fn collect(&self, records: &[NormalizedRecord]) -> Collection {
        let descriptors = self.descriptors();
        let mut collection = Collection::default();

        for (name, metric) in &self.config.metrics {
            let Some(descriptor) = descriptors.get(name) else {
                continue;
            };
            match map_metric(descriptor, metric, records) {
                Ok(observations) => {
                    debug!(metric = %name, count = observations.len(), "metric mapped");
                    collection.observations.extend(observations);
                }
                Err(e) => {
                    warn!("Fail to add metric for {}: {}", e.metric(), e);
                    MappingMetrics::record_error(e.metric());
                    collection.errors.push(e);
                }
            }
        }

        MappingMetrics::record_observations(collection.observations.len());
        collection
    }
}

fn map_metric(
    descriptor: &Arc<MetricDescriptor>,
    metric: &MetricDefinition,
    records: &[NormalizedRecord],
) -> Result<Vec<Observation>, MappingError> {
    let kind = MetricKind::parse(&metric.kind).ok_or_else(|| MappingError::UnknownType {
        metric: descriptor.name.clone(),
        kind: metric.kind.clone(),
    })?;

    records
        .iter()
        .map(|record| {
            let label_values = metric
                .labels
                .iter()
                .map(|label| record.get(label).cloned().unwrap_or_default())
                .collect();
            let value = resolve_value(&descriptor.name, kind, &metric.value, record)?;
            Ok(Observation {
                descriptor: Arc::clone(descriptor),
                kind,
                value,
                label_values,
            })
        })
        .collect()
}

fn resolve_value(
    metric: &str,
    kind: MetricKind,
    source: &ValueSource,
    record: &NormalizedRecord,
) -> Result<f64, MappingError> {
    match source {
        ValueSource::One => Ok(1.0),
        ValueSource::Constant(n) => Ok(*n),
        ValueSource::Field(field) => {
            let raw = record.get(field).map(String::as_str).unwrap_or("");
            match raw.trim().parse::<f64>() {
                Ok(n) if n.is_finite() && (kind == MetricKind::Gauge || n >= 0.0) => Ok(n),
                _ => Err(MappingError::InvalidValue {
                    metric: metric.to_string(),
                    field: field.clone(),
                    raw: raw.to_string(),
                }),
            }
        }
    }
}
