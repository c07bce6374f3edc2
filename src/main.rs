use anyhow::Context;
use clap::Parser;
use cloudwatch_log_exporter::checkpoint::{CheckpointStore, FileCheckpoint};
use cloudwatch_log_exporter::config::ExporterConfig;
use cloudwatch_log_exporter::pipeline::{CoalescingPipeline, Pipeline};
use cloudwatch_log_exporter::query::{CloudWatchLogs, LogQueryService};
use cloudwatch_log_exporter::{logging, metrics, server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "cloudwatch-log-exporter")]
#[command(about = "Serve CloudWatch Logs Insights query results as Prometheus metrics")]
#[command(version)]
struct Cli {
    /// Path to the YAML (or .toml) configuration file
    #[arg(long, env = "LOG_EXPORTER_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Address for the metrics endpoint
    #[arg(long, env = "LOG_EXPORTER_BIND", default_value = "0.0.0.0:9104")]
    bind: SocketAddr,

    /// Route serving the metrics
    #[arg(long, default_value = "/metrics")]
    path: String,

    /// Overrides `checkpoint_file` from the configuration
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let _guard = logging::init_logging("cloudwatch-log-exporter.log");
    metrics::init_metrics();

    let config = ExporterConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!(
        group = %config.group,
        metrics = config.metrics.len(),
        "Configuration loaded from {}",
        cli.config.display()
    );

    let checkpoint_path = cli
        .checkpoint_file
        .unwrap_or_else(|| config.checkpoint_file.clone());
    let checkpoint: Arc<dyn CheckpointStore> = Arc::new(FileCheckpoint::new(checkpoint_path));
    let service: Arc<dyn LogQueryService> = Arc::new(CloudWatchLogs::from_config(&config.aws).await);

    let pipeline = Pipeline::from_config(Arc::new(config), service, checkpoint);
    let pipeline = Arc::new(CoalescingPipeline::new(pipeline));

    server::start_server(cli.bind, &cli.path, pipeline).await?;
    Ok(())
}
