use anyhow::Context;
use clap::Parser;
use cloudwatch_log_exporter::checkpoint::{CheckpointStore, FileCheckpoint};
use cloudwatch_log_exporter::config::ExporterConfig;
use cloudwatch_log_exporter::pipeline::Pipeline;
use cloudwatch_log_exporter::push::{PushSink, Pusher};
use cloudwatch_log_exporter::query::{CloudWatchLogs, LogQueryService};
use cloudwatch_log_exporter::{logging, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "cloudwatch-log-pusher")]
#[command(about = "Push CloudWatch Logs Insights query results to a Prometheus Pushgateway")]
#[command(version)]
struct Cli {
    /// Path to the YAML (or .toml) configuration file
    #[arg(long, env = "LOG_EXPORTER_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Pushgateway base URL
    #[arg(long, env = "LOG_EXPORTER_PUSHGATEWAY_URL", default_value = "http://localhost:9091")]
    gateway: String,

    #[arg(long, default_value = "cloudwatch_log_export")]
    job: String,

    /// Defaults to $HOSTNAME, then "localhost"
    #[arg(long)]
    instance: Option<String>,

    /// Seconds between pushes
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,

    /// Overrides `checkpoint_file` from the configuration
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,

    /// Drop accumulated series after every successful push. Bounds memory
    /// when labels carry high-cardinality values such as urls.
    #[arg(long)]
    reset_after_push: bool,

    /// Push a single snapshot and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let _guard = logging::init_logging("cloudwatch-log-pusher.log");
    metrics::init_metrics();

    if cli.interval_secs == 0 {
        anyhow::bail!("--interval-secs must be positive");
    }

    let config = ExporterConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!(
        group = %config.group,
        metrics = config.metrics.len(),
        "Configuration loaded from {}",
        cli.config.display()
    );

    let instance = cli
        .instance
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string());

    let checkpoint_path = cli
        .checkpoint_file
        .unwrap_or_else(|| config.checkpoint_file.clone());
    let checkpoint: Arc<dyn CheckpointStore> = Arc::new(FileCheckpoint::new(checkpoint_path));
    let service: Arc<dyn LogQueryService> = Arc::new(CloudWatchLogs::from_config(&config.aws).await);

    let pipeline = Pipeline::from_config(Arc::new(config), service, checkpoint);
    let sink = PushSink::new(&cli.gateway, &cli.job, &instance).context("building push target")?;
    let mut pusher = Pusher::new(pipeline, sink).with_reset_after_push(cli.reset_after_push);

    if cli.once {
        let bytes = pusher.push_once().await.context("pushing metrics")?;
        info!(bytes, "Single push complete");
        return Ok(());
    }

    pusher.run(Duration::from_secs(cli.interval_secs)).await;
    Ok(())
}
