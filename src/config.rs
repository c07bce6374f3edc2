use crate::error::ConfigError;
use crate::metrics::registry::reserved_metric_names;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "cloudwatch_log_export";
pub const DEFAULT_LOOKBACK_SECONDS: i64 = 86_400;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_MAX_WAIT_SECONDS: u64 = 300;
pub const DEFAULT_CHECKPOINT_FILE: &str = "last_end_time.txt";

/// Exporter configuration, loaded once at startup and shared read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// CloudWatch log group the query runs against
    #[serde(alias = "Group")]
    pub group: String,
    /// Logs Insights query expression, passed through untouched
    #[serde(alias = "Query")]
    pub query: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Window used when no checkpoint exists
    #[serde(default = "default_lookback_seconds")]
    pub lookback_seconds: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single submit/poll cycle
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default, alias = "Metrics")]
    pub metrics: BTreeMap<String, MetricDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDefinition {
    /// `counter` or `gauge`, any case. Checked when metrics are collected.
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
    #[serde(default, alias = "Description")]
    pub description: String,
    #[serde(default, alias = "Labels")]
    pub labels: Vec<String>,
    #[serde(default, alias = "Value")]
    pub value: ValueSource,
}

/// Where an observation's numeric value comes from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ValueSource {
    /// Every matched record counts as one
    #[default]
    One,
    Constant(f64),
    /// Named record field, parsed as a number
    Field(String),
}

impl<'de> Deserialize<'de> for ValueSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => ValueSource::Constant(n),
            Raw::Text(s) => ValueSource::parse(&s),
        })
    }
}

impl ValueSource {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            ValueSource::One
        } else if let Ok(n) = trimmed.parse::<f64>() {
            ValueSource::Constant(n)
        } else {
            ValueSource::Field(trimmed.to_string())
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_lookback_seconds() -> i64 {
    DEFAULT_LOOKBACK_SECONDS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_wait_seconds() -> u64 {
    DEFAULT_MAX_WAIT_SECONDS
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_FILE)
}

impl ExporterConfig {
    /// Load from disk. Files ending in `.toml` are parsed as TOML, anything
    /// else as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group.trim().is_empty() {
            return Err(ConfigError::MissingField("group".to_string()));
        }
        if self.query.trim().is_empty() {
            return Err(ConfigError::MissingField("query".to_string()));
        }
        if !is_valid_metric_name(&self.namespace) {
            return Err(ConfigError::Invalid(format!(
                "namespace '{}' is not a valid metric name prefix",
                self.namespace
            )));
        }
        if self.lookback_seconds <= 0 {
            return Err(ConfigError::Invalid(
                "lookback_seconds must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_wait_seconds == 0 {
            return Err(ConfigError::Invalid(
                "max_wait_seconds must be positive".to_string(),
            ));
        }

        let reserved = reserved_metric_names();
        for (name, metric) in &self.metrics {
            if !is_valid_metric_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "metric name '{}' is not valid",
                    name
                )));
            }
            let fq_name = self.fq_name(name);
            if reserved.contains(&fq_name) {
                return Err(ConfigError::Invalid(format!(
                    "metric '{}' renders as '{}', which the exporter reports about itself",
                    name, fq_name
                )));
            }

            let mut seen = HashSet::new();
            for label in &metric.labels {
                if !is_valid_label_name(label) {
                    return Err(ConfigError::Invalid(format!(
                        "metric '{}' has invalid label name '{}'",
                        name, label
                    )));
                }
                if !seen.insert(label.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "metric '{}' repeats label '{}'",
                        name, label
                    )));
                }
            }

            if let ValueSource::Constant(n) = metric.value {
                if !n.is_finite() {
                    return Err(ConfigError::Invalid(format!(
                        "metric '{}' has a non-finite constant value",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    /// `<namespace>_<metric>`
    pub fn fq_name(&self, metric: &str) -> String {
        format!("{}_{}", self.namespace, metric)
    }
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
group: /aws/lambda/api
query: "fields code, url | filter code >= 400"
metrics:
  errors:
    type: counter
    description: Errors by status code
    labels: [code, url]
  latency:
    type: Gauge
    labels: [url]
    value: duration
  weight:
    type: gauge
    value: 2.5
"#;

    #[test]
    fn test_yaml_config_with_defaults() {
        let config = ExporterConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.group, "/aws/lambda/api");
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.lookback_seconds, DEFAULT_LOOKBACK_SECONDS);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.checkpoint_file, PathBuf::from("last_end_time.txt"));
        assert_eq!(config.metrics.len(), 3);

        let errors = &config.metrics["errors"];
        assert_eq!(errors.kind, "counter");
        assert_eq!(errors.labels, vec!["code", "url"]);
        assert_eq!(errors.value, ValueSource::One);

        assert_eq!(
            config.metrics["latency"].value,
            ValueSource::Field("duration".to_string())
        );
        assert_eq!(config.metrics["weight"].value, ValueSource::Constant(2.5));
        assert_eq!(config.fq_name("errors"), "cloudwatch_log_export_errors");
    }

    #[test]
    fn test_capitalized_keys_are_accepted() {
        let yaml = r#"
Group: app
Query: fields code
Metrics:
  hits:
    Type: counter
    Labels: [code]
"#;
        let config = ExporterConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.group, "app");
        assert_eq!(config.metrics["hits"].labels, vec!["code"]);
    }

    #[test]
    fn test_toml_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
group = "app"
query = "fields code"
namespace = "app_logs"

[metrics.hits]
type = "counter"
labels = ["code"]
value = "count"
"#
        )
        .unwrap();

        let config = ExporterConfig::load(file.path()).unwrap();
        assert_eq!(config.namespace, "app_logs");
        assert_eq!(
            config.metrics["hits"].value,
            ValueSource::Field("count".to_string())
        );
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = ExporterConfig::load("/definitely/not/here.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let yaml = r#"
group: app
query: fields code
metrics:
  hits:
    type: counter
    labels: [code, code]
"#;
        let err = ExporterConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("repeats label"));
    }

    #[test]
    fn test_invalid_label_name_rejected() {
        let yaml = r#"
group: app
query: fields code
metrics:
  hits:
    type: counter
    labels: ["@logStream"]
"#;
        assert!(ExporterConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_empty_query_rejected() {
        let yaml = "group: app\nquery: \"  \"\n";
        let err = ExporterConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "query"));
    }

    #[test]
    fn test_unknown_metric_type_is_not_a_config_error() {
        let yaml = r#"
group: app
query: fields code
metrics:
  hits:
    type: summary
"#;
        let config = ExporterConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metrics["hits"].kind, "summary");
    }

    #[test]
    fn test_value_source_parse() {
        assert_eq!(ValueSource::parse(""), ValueSource::One);
        assert_eq!(ValueSource::parse(" 3 "), ValueSource::Constant(3.0));
        assert_eq!(
            ValueSource::parse("bytes"),
            ValueSource::Field("bytes".to_string())
        );
    }

    #[test]
    fn test_metric_shadowing_self_metric_rejected() {
        let yaml = r#"
group: app
query: fields code
metrics:
  query_cycles_total:
    type: counter
"#;
        assert!(matches!(
            ExporterConfig::from_yaml_str(yaml),
            Err(ConfigError::Invalid(msg)) if msg.contains("cloudwatch_log_export_query_cycles_total")
        ));

        let histogram_series = r#"
group: app
query: fields code
metrics:
  query_duration_seconds_count:
    type: gauge
"#;
        assert!(ExporterConfig::from_yaml_str(histogram_series).is_err());

        let other_namespace = r#"
group: app
query: fields code
namespace: app
metrics:
  query_cycles_total:
    type: counter
"#;
        assert!(ExporterConfig::from_yaml_str(other_namespace).is_ok());
    }
}
