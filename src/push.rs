//! Push sink: periodic passes delivered to a Prometheus Pushgateway.
//!
//! Unlike the scrape endpoint, a push snapshot replaces whatever the gateway
//! held before, so observations are accumulated in a `SnapshotRegistry` and
//! the whole registry is sent on every tick.

use crate::error::SinkError;
use crate::exposition::SnapshotRegistry;
use crate::metrics::PushMetrics;
use crate::pipeline::Pipeline;
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

const PUSH_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct PushSink {
    client: reqwest::Client,
    url: Url,
}

impl PushSink {
    /// `job` and `instance` become percent-encoded path segments of the
    /// grouping key.
    pub fn new(gateway_url: &str, job: &str, instance: &str) -> Result<Self, SinkError> {
        if job.is_empty() || instance.is_empty() {
            return Err(SinkError::InvalidTarget(
                "job and instance must not be empty".to_string(),
            ));
        }

        let mut url = Url::parse(gateway_url)
            .map_err(|e| SinkError::InvalidTarget(format!("{}: {}", gateway_url, e)))?;
        url.path_segments_mut()
            .map_err(|()| SinkError::InvalidTarget(format!("{} cannot take a path", gateway_url)))?
            .pop_if_empty()
            .extend(["metrics", "job", job, "instance", instance]);

        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }

    pub fn push_url(&self) -> &Url {
        &self.url
    }

    pub async fn push(&self, body: String) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.url.clone())
            .header("Content-Type", PUSH_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        Ok(())
    }
}

pub struct Pusher {
    pipeline: Pipeline,
    sink: PushSink,
    registry: SnapshotRegistry,
    reset_after_push: bool,
}

impl Pusher {
    pub fn new(pipeline: Pipeline, sink: PushSink) -> Self {
        Self {
            pipeline,
            sink,
            registry: SnapshotRegistry::new(),
            reset_after_push: false,
        }
    }

    /// Forget accumulated series after each successful push, so every
    /// snapshot only carries the latest interval.
    pub fn with_reset_after_push(mut self, reset: bool) -> Self {
        self.reset_after_push = reset;
        self
    }

    /// One pass followed by one push of the accumulated snapshot.
    /// Returns the payload size.
    pub async fn push_once(&mut self) -> Result<usize, SinkError> {
        let result = self.pipeline.run_pass().await;
        self.registry.apply(&result.collection.observations);

        let mut body = self.registry.render();
        body.push_str(&crate::metrics::render());
        let bytes = body.len();

        match self.sink.push(body).await {
            Ok(()) => {
                PushMetrics::record_push_success(bytes);
                info!(
                    url = %self.sink.push_url(),
                    bytes,
                    series = self.registry.series_count(),
                    "Successfully pushed metrics to Pushgateway"
                );
                if self.reset_after_push {
                    self.registry.clear();
                }
                Ok(bytes)
            }
            Err(e) => {
                PushMetrics::record_push_failure();
                Err(e)
            }
        }
    }

    /// Push every `interval` until ctrl-c.
    pub async fn run(self, interval: Duration) {
        self.run_until(interval, crate::server::shutdown_signal()).await
    }

    /// Push every `interval` until `shutdown` resolves, including while a
    /// pass is still running. A failed push is logged and the next tick tries
    /// again with the same accumulated state.
    pub async fn run_until<F>(mut self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            url = %self.sink.push_url(),
            interval_secs = interval.as_secs_f64(),
            "Push loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        pushed = self.push_once() => {
                            if let Err(e) = pushed {
                                error!("Failed to push metrics: {}", e);
                            }
                        }
                        _ = &mut shutdown => break,
                    }
                }
            }
        }

        info!("Push loop stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpoint;
    use crate::clock::ManualClock;
    use crate::config::ExporterConfig;
    use crate::query::tests::{row, ScriptedService};
    use crate::query::{QueryResults, ServiceStatus};
    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use std::net::TcpListener;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(String, String)>>>;

    /// Local stand-in for a Pushgateway that records (path, body) pairs and
    /// answers with `statuses` in order, repeating the last one.
    fn spawn_gateway(statuses: Vec<StatusCode>) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/metrics/job/:job/instance/:instance",
                post(
                    move |State(captured): State<Captured>,
                          uri: axum::http::Uri,
                          body: String| async move {
                        let mut captured = captured.lock().unwrap();
                        let status = statuses[captured.len().min(statuses.len() - 1)];
                        captured.push((uri.path().to_string(), body));
                        (status, "gateway says no")
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = hyper::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service());
        tokio::spawn(server);

        (format!("http://{}", addr), captured)
    }

    fn pipeline(service: Arc<ScriptedService>) -> Pipeline {
        let config = ExporterConfig::from_yaml_str(
            r#"
group: app
query: fields code
poll_interval_ms: 1
metrics:
  errors:
    type: counter
    labels: [code]
"#,
        )
        .unwrap();
        Pipeline::with_clock(
            Arc::new(config),
            service,
            Arc::new(MemoryCheckpoint::new()),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    fn complete(codes: &[&str]) -> Result<QueryResults, crate::error::QueryError> {
        Ok(QueryResults {
            status: ServiceStatus::Complete,
            rows: codes.iter().map(|code| row(&[("code", *code)])).collect(),
        })
    }

    fn sink(url: &str) -> PushSink {
        PushSink::new(url, "job", "test").unwrap()
    }

    #[test]
    fn test_push_url() {
        let sink = PushSink::new("http://gateway:9091/", "cloudwatch_log_export", "host-1").unwrap();
        assert_eq!(
            sink.push_url().as_str(),
            "http://gateway:9091/metrics/job/cloudwatch_log_export/instance/host-1"
        );
    }

    #[test]
    fn test_push_url_encodes_grouping_values() {
        let sink = PushSink::new("http://gateway:9091/prefix", "log export", "pod/7").unwrap();
        assert_eq!(
            sink.push_url().as_str(),
            "http://gateway:9091/prefix/metrics/job/log%20export/instance/pod%2F7"
        );
    }

    #[test]
    fn test_invalid_push_target_rejected() {
        assert!(matches!(
            PushSink::new("not a url", "job", "host"),
            Err(SinkError::InvalidTarget(_))
        ));
        assert!(matches!(
            PushSink::new("http://gateway:9091", "job", ""),
            Err(SinkError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_push_accumulates_counters_between_ticks() {
        let (url, captured) = spawn_gateway(vec![StatusCode::OK]);
        let service = Arc::new(ScriptedService::new(vec![
            complete(&["500"]),
            complete(&["500", "404"]),
        ]));
        let mut pusher = Pusher::new(pipeline(service), sink(&url));

        pusher.push_once().await.unwrap();
        pusher.push_once().await.unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].0, "/metrics/job/job/instance/test");
        assert!(captured[0]
            .1
            .contains("cloudwatch_log_export_errors{code=\"500\"} 1\n"));
        assert!(captured[1]
            .1
            .contains("cloudwatch_log_export_errors{code=\"500\"} 2\n"));
        assert!(captured[1]
            .1
            .contains("cloudwatch_log_export_errors{code=\"404\"} 1\n"));
    }

    #[tokio::test]
    async fn test_reset_after_push_sends_only_latest_interval() {
        let (url, captured) = spawn_gateway(vec![StatusCode::OK]);
        let service = Arc::new(ScriptedService::new(vec![
            complete(&["500", "404"]),
            complete(&["500"]),
        ]));
        let mut pusher = Pusher::new(pipeline(service), sink(&url)).with_reset_after_push(true);

        pusher.push_once().await.unwrap();
        pusher.push_once().await.unwrap();

        let captured = captured.lock().unwrap();
        assert!(captured[1]
            .1
            .contains("cloudwatch_log_export_errors{code=\"500\"} 1\n"));
        assert!(!captured[1].1.contains("code=\"404\""));
    }

    #[tokio::test]
    async fn test_rejected_push_reports_status() {
        let (url, _captured) = spawn_gateway(vec![StatusCode::BAD_REQUEST]);
        let mut pusher = Pusher::new(
            pipeline(Arc::new(ScriptedService::complete_with(Vec::new()))),
            sink(&url),
        );

        match pusher.push_once().await {
            Err(SinkError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "gateway says no");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_keeps_pushing_after_failure() {
        let (url, captured) =
            spawn_gateway(vec![StatusCode::INTERNAL_SERVER_ERROR, StatusCode::OK]);
        let service = Arc::new(ScriptedService::new(vec![
            complete(&["500"]),
            complete(&["500"]),
        ]));
        let pusher = Pusher::new(pipeline(service), sink(&url));

        let seen = Arc::clone(&captured);
        let two_pushes = async move {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(
            Duration::from_secs(600),
            pusher.run_until(Duration::from_secs(60), two_pushes),
        )
        .await
        .expect("push loop did not stop");

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 2);
        // the first snapshot was rejected, but the registry kept counting
        assert!(captured[1]
            .1
            .contains("cloudwatch_log_export_errors{code=\"500\"} 2\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_running_pass() {
        let service = Arc::new(ScriptedService::new(Vec::new()));
        let pusher = Pusher::new(pipeline(service.clone()), sink("http://127.0.0.1:9"));

        let watched = Arc::clone(&service);
        let once_submitted = async move {
            while watched.starts.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(
            Duration::from_secs(10),
            pusher.run_until(Duration::from_secs(60), once_submitted),
        )
        .await
        .expect("push loop ignored shutdown during a pass");

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
    }
}
