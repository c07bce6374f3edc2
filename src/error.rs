use thiserror::Error;

/// Configuration problems. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Checkpoint persistence failures. Callers log these and carry on.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed checkpoint '{0}'")]
    Malformed(String),
}

/// Failures talking to the log-query service. Abort the current cycle only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Query submission failed: {0}")]
    Submit(String),

    #[error("Polling query {query_id} failed: {message}")]
    Poll { query_id: String, message: String },

    #[error("Service returned no query id")]
    MissingQueryId,
}

/// Per-metric mapping failures. The offending metric is left out of the pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("Metric '{metric}' has unsupported type '{kind}'")]
    UnknownType { metric: String, kind: String },

    #[error("Metric '{metric}' could not read a number from field '{field}' (got '{raw}')")]
    InvalidValue {
        metric: String,
        field: String,
        raw: String,
    },
}

impl MappingError {
    pub fn metric(&self) -> &str {
        match self {
            MappingError::UnknownType { metric, .. } => metric,
            MappingError::InvalidValue { metric, .. } => metric,
        }
    }
}

/// Delivery failures for the push sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pushgateway returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid push target: {0}")]
    InvalidTarget(String),
}

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("HTTP server error: {0}")]
    Server(#[from] hyper::Error),

    #[error("Collection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
