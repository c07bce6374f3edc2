//! Windowed Logs Insights query loop
//!
//! One cycle submits a query for `[checkpoint, now]`, polls until the service
//! reports a terminal status, and advances the checkpoint on success.
//!
//! ```text
//! Pending -> Running -> Complete | Failed | Cancelled | Timeout
//! ```
//!
//! Every cycle is bounded by `max_wait`; running out of budget ends in
//! `Timeout` and a best-effort `stop_query`.

pub mod cloudwatch;

pub use cloudwatch::CloudWatchLogs;

use crate::checkpoint::CheckpointStore;
use crate::clock::Clock;
use crate::config::ExporterConfig;
use crate::error::QueryError;
use crate::metrics::QueryMetrics;
use crate::record::{normalize_all, NormalizedRecord, RawRow};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Time range submitted for one cycle, epoch seconds, `start_time < end_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start_time: i64,
    pub end_time: i64,
}

impl QueryWindow {
    /// Start at the checkpoint when one exists, otherwise `lookback_seconds`
    /// before `now`. A zero checkpoint counts as unset.
    pub fn compute(checkpoint: Option<i64>, now: i64, lookback_seconds: i64) -> Self {
        let start_time = match checkpoint {
            Some(last) if last > 0 => last.min(now - 1),
            _ => now - lookback_seconds,
        };
        Self {
            start_time,
            end_time: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub group: String,
    pub query: String,
    pub window: QueryWindow,
}

/// Opaque id returned by the service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub String);

impl fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status as reported by the log-query service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    Timeout,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResults {
    pub status: ServiceStatus,
    pub rows: Vec<RawRow>,
}

#[async_trait]
pub trait LogQueryService: Send + Sync {
    async fn start_query(&self, request: &QueryRequest) -> Result<QueryHandle, QueryError>;

    async fn get_results(&self, handle: &QueryHandle) -> Result<QueryResults, QueryError>;

    /// Abandon a running query. Services without cancellation can ignore it.
    async fn stop_query(&self, _handle: &QueryHandle) -> Result<(), QueryError> {
        Ok(())
    }
}

/// Executor-side state of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
    Timeout,
}

impl QueryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Pending => "pending",
            QueryState::Running => "running",
            QueryState::Complete => "complete",
            QueryState::Failed => "failed",
            QueryState::Cancelled => "cancelled",
            QueryState::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryState::Pending | QueryState::Running)
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one cycle. `records` is empty unless `state` is `Complete`.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub state: QueryState,
    pub window: QueryWindow,
    pub records: Vec<NormalizedRecord>,
    pub polls: u32,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl QueryOutcome {
    pub fn is_complete(&self) -> bool {
        self.state == QueryState::Complete
    }
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub group: String,
    pub query: String,
    pub lookback_seconds: i64,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl QuerySettings {
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self {
            group: config.group.clone(),
            query: config.query.clone(),
            lookback_seconds: config.lookback_seconds,
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
        }
    }
}

pub struct QueryExecutor {
    service: Arc<dyn LogQueryService>,
    checkpoint: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    settings: QuerySettings,
}

impl QueryExecutor {
    pub fn new(
        service: Arc<dyn LogQueryService>,
        checkpoint: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            service,
            checkpoint,
            clock,
            settings,
        }
    }

    /// Run one full cycle. Never returns an error: failures are logged and
    /// reported through `QueryOutcome::state`.
    pub async fn run_cycle(&self) -> QueryOutcome {
        let started = tokio::time::Instant::now();
        let cycle_start = self.clock.now_seconds();
        let window = QueryWindow::compute(
            self.read_checkpoint().await,
            cycle_start,
            self.settings.lookback_seconds,
        );
        let request = QueryRequest {
            group: self.settings.group.clone(),
            query: self.settings.query.clone(),
            window,
        };

        let span = tracing::info_span!(
            "query_cycle",
            group = %request.group,
            start = window.start_time,
            end = window.end_time
        );

        let mut running = StopOnDrop::new(Arc::clone(&self.service));
        let mut polls: u32 = 0;
        let deadline = started + self.settings.max_wait;

        let result = tokio::time::timeout_at(
            deadline,
            self.submit_and_poll(&request, &mut running.handle, &mut polls)
                .instrument(span),
        )
        .await;

        let (state, rows, error) = match result {
            Ok(Ok((state, rows))) => {
                // terminal on the service side, nothing left to stop
                running.disarm();
                let error = match state {
                    QueryState::Complete => None,
                    other => Some(format!("service reported query {}", other)),
                };
                (state, rows, error)
            }
            Ok(Err(e)) => {
                error!(group = %request.group, "Error running log query: {}", e);
                self.stop(&mut running).await;
                (QueryState::Failed, Vec::new(), Some(e.to_string()))
            }
            Err(_) => {
                warn!(
                    group = %request.group,
                    max_wait_secs = self.settings.max_wait.as_secs_f64(),
                    polls,
                    "query did not finish within its budget"
                );
                self.stop(&mut running).await;
                (
                    QueryState::Timeout,
                    Vec::new(),
                    Some(format!(
                        "no terminal status after {:?}",
                        self.settings.max_wait
                    )),
                )
            }
        };

        let records = if state == QueryState::Complete {
            // the cycle start, not the window end, bounds the next window
            self.write_checkpoint(cycle_start).await;
            normalize_all(&rows)
        } else {
            Vec::new()
        };

        let elapsed = started.elapsed();
        QueryMetrics::record_cycle(state.as_str(), elapsed.as_secs_f64(), polls, records.len());

        match state {
            QueryState::Complete => info!(
                start = window.start_time,
                end = window.end_time,
                records = records.len(),
                polls,
                "query complete"
            ),
            other => warn!(
                start = window.start_time,
                end = window.end_time,
                polls,
                "query ended {}",
                other
            ),
        }

        QueryOutcome {
            state,
            window,
            records,
            polls,
            error,
            elapsed,
        }
    }

    async fn read_checkpoint(&self) -> Option<i64> {
        let store = Arc::clone(&self.checkpoint);
        match tokio::task::spawn_blocking(move || store.read()).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Checkpoint read task failed: {}", e);
                None
            }
        }
    }

    async fn write_checkpoint(&self, end_time: i64) {
        let store = Arc::clone(&self.checkpoint);
        if let Err(e) = tokio::task::spawn_blocking(move || store.write(end_time)).await {
            warn!("Checkpoint write task failed: {}", e);
        }
    }

    /// Best-effort cancellation of a query the cycle is giving up on.
    async fn stop(&self, running: &mut StopOnDrop) {
        if let Some(handle) = running.handle.clone() {
            if let Err(e) = self.service.stop_query(&handle).await {
                warn!(query_id = %handle, "Failed to stop abandoned query: {}", e);
            }
            running.disarm();
        }
    }

    async fn submit_and_poll(
        &self,
        request: &QueryRequest,
        handle_slot: &mut Option<QueryHandle>,
        polls: &mut u32,
    ) -> Result<(QueryState, Vec<RawRow>), QueryError> {
        let handle = self.service.start_query(request).await?;
        debug!(query_id = %handle, "query submitted, Pending -> Running");
        *handle_slot = Some(handle.clone());

        loop {
            *polls += 1;
            let results = self.service.get_results(&handle).await?;

            let state = match results.status {
                ServiceStatus::Complete => QueryState::Complete,
                ServiceStatus::Failed => QueryState::Failed,
                ServiceStatus::Cancelled => QueryState::Cancelled,
                ServiceStatus::Timeout => QueryState::Timeout,
                ServiceStatus::Scheduled | ServiceStatus::Running | ServiceStatus::Unknown => {
                    QueryState::Running
                }
            };

            if state.is_terminal() {
                debug!(query_id = %handle, polls = *polls, "Running -> {}", state);
                return Ok((state, results.rows));
            }

            debug!(query_id = %handle, status = ?results.status, "still running");
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

/// Holds the handle of a submitted query. If the cycle future is dropped
/// before the query reaches a terminal state, `stop_query` is issued on a
/// detached task so the query does not keep running on the service.
struct StopOnDrop {
    service: Arc<dyn LogQueryService>,
    handle: Option<QueryHandle>,
}

impl StopOnDrop {
    fn new(service: Arc<dyn LogQueryService>) -> Self {
        Self {
            service,
            handle: None,
        }
    }

    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(query_id = %handle, "No runtime left to stop abandoned query");
            return;
        };
        let service = Arc::clone(&self.service);
        warn!(query_id = %handle, "query cycle dropped while running, stopping query");
        runtime.spawn(async move {
            if let Err(e) = service.stop_query(&handle).await {
                warn!(query_id = %handle, "Failed to stop abandoned query: {}", e);
            }
        });
    }
}
