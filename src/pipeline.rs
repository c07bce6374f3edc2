//! One collection pass: query -> normalize -> map.
//!
//! `CoalescingPipeline` puts a gate in front of the pass so that callers
//! arriving while a pass is in flight share its result instead of starting
//! another query.

use crate::checkpoint::CheckpointStore;
use crate::clock::{Clock, SystemClock};
use crate::config::ExporterConfig;
use crate::error::Result;
use crate::mapping::{Collection, MappingEngine};
use crate::query::{LogQueryService, QueryExecutor, QueryOutcome, QuerySettings};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PassResult {
    pub outcome: QueryOutcome,
    pub collection: Collection,
}

pub struct Pipeline {
    executor: QueryExecutor,
    engine: MappingEngine,
}

impl Pipeline {
    pub fn new(executor: QueryExecutor, engine: MappingEngine) -> Self {
        Self { executor, engine }
    }

    pub fn from_config(
        config: Arc<ExporterConfig>,
        service: Arc<dyn LogQueryService>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::with_clock(config, service, checkpoint, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Arc<ExporterConfig>,
        service: Arc<dyn LogQueryService>,
        checkpoint: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let executor = QueryExecutor::new(
            service,
            checkpoint,
            clock,
            QuerySettings::from_config(&config),
        );
        let engine = MappingEngine::new(config);
        Self::new(executor, engine)
    }

    pub async fn run_pass(&self) -> PassResult {
        let descriptors = self.engine.describe();
        debug!(metrics = descriptors.len(), "collection pass starting");

        let outcome = self.executor.run_cycle().await;
        let collection = self.engine.collect(&outcome.records);

        info!(
            state = %outcome.state,
            records = outcome.records.len(),
            observations = collection.observations.len(),
            unavailable = collection.errors.len(),
            "collection pass finished"
        );

        PassResult {
            outcome,
            collection,
        }
    }
}

/// At most one pass in flight; late arrivals reuse the in-flight result.
///
/// The pass runs on its own task and holds the gate until it finishes, so a
/// caller that goes away mid-pass neither cancels the query nor lets a second
/// one start alongside it.
pub struct CoalescingPipeline {
    shared: Arc<Shared>,
    last: Arc<Mutex<Option<Arc<PassResult>>>>,
}

struct Shared {
    pipeline: Pipeline,
    started: AtomicU64,
    completed: AtomicU64,
}

impl CoalescingPipeline {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            shared: Arc::new(Shared {
                pipeline,
                started: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn collect(&self) -> Result<Arc<PassResult>> {
        let shared = &self.shared;
        let observed = shared.started.load(Ordering::SeqCst);
        let in_flight = observed > shared.completed.load(Ordering::SeqCst);

        let mut last = Arc::clone(&self.last).lock_owned().await;

        if in_flight && shared.completed.load(Ordering::SeqCst) >= observed {
            if let Some(result) = last.as_ref() {
                debug!(pass = observed, "reusing result of in-flight pass");
                return Ok(Arc::clone(result));
            }
        }

        let seq = shared.started.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(shared);
        let pass = tokio::spawn(async move {
            let result = Arc::new(shared.pipeline.run_pass().await);
            *last = Some(Arc::clone(&result));
            shared.completed.store(seq, Ordering::SeqCst);
            result
        });

        Ok(pass.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpoint;
    use crate::clock::ManualClock;
    use crate::query::tests::{row, running, ScriptedService};
    use crate::query::{QueryResults, QueryState, ServiceStatus};
    use std::time::Duration;

    fn config() -> Arc<ExporterConfig> {
        Arc::new(
            ExporterConfig::from_yaml_str(
                r#"
group: app
query: fields code, url
poll_interval_ms: 1
metrics:
  errors:
    type: counter
    labels: [code, url]
"#,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_pass_maps_completed_records() {
        let service = Arc::new(ScriptedService::complete_with(vec![
            row(&[("code", "500"), ("url", "/a")]),
            row(&[("code", "404"), ("url", "/b")]),
        ]));
        let checkpoint = Arc::new(MemoryCheckpoint::new());
        let pipeline = Pipeline::with_clock(
            config(),
            service,
            checkpoint.clone(),
            Arc::new(ManualClock::new(1_000)),
        );

        let result = pipeline.run_pass().await;

        assert_eq!(result.outcome.state, QueryState::Complete);
        assert_eq!(result.collection.observations.len(), 2);
        assert_eq!(checkpoint.writes(), vec![1_000]);
    }

    #[tokio::test]
    async fn test_failed_query_yields_no_observations() {
        let service = Arc::new(ScriptedService::new(vec![Ok(QueryResults {
            status: ServiceStatus::Failed,
            rows: Vec::new(),
        })]));
        let pipeline = Pipeline::with_clock(
            config(),
            service,
            Arc::new(MemoryCheckpoint::new()),
            Arc::new(ManualClock::new(1_000)),
        );

        let result = pipeline.run_pass().await;
        assert_eq!(result.outcome.state, QueryState::Failed);
        assert!(result.collection.observations.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_collects_run_fresh_passes() {
        let service = Arc::new(ScriptedService::new(vec![
            Ok(QueryResults {
                status: ServiceStatus::Complete,
                rows: Vec::new(),
            }),
            Ok(QueryResults {
                status: ServiceStatus::Complete,
                rows: Vec::new(),
            }),
        ]));
        let coalescing = CoalescingPipeline::new(Pipeline::with_clock(
            config(),
            service.clone(),
            Arc::new(MemoryCheckpoint::new()),
            Arc::new(ManualClock::new(1_000)),
        ));

        coalescing.collect().await.unwrap();
        coalescing.collect().await.unwrap();
        assert_eq!(service.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_collects_share_one_query() {
        let mut responses: Vec<_> = (0..20).map(|_| running()).collect();
        responses.push(Ok(QueryResults {
            status: ServiceStatus::Complete,
            rows: vec![row(&[("code", "500"), ("url", "/a")])],
        }));
        let service = Arc::new(ScriptedService::new(responses));
        let coalescing = Arc::new(CoalescingPipeline::new(Pipeline::with_clock(
            config(),
            service.clone(),
            Arc::new(MemoryCheckpoint::new()),
            Arc::new(ManualClock::new(1_000)),
        )));

        let first = {
            let c = Arc::clone(&coalescing);
            tokio::spawn(async move { c.collect().await })
        };
        while service.starts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let followers: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&coalescing);
                tokio::spawn(async move { c.collect().await })
            })
            .collect();

        let leader = first.await.unwrap().unwrap();
        for follower in followers {
            let result = follower.await.unwrap().unwrap();
            assert!(Arc::ptr_eq(&leader, &result));
        }
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
        assert_eq!(leader.collection.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_collects_leave_one_query_that_ends_on_budget() {
        let service = Arc::new(ScriptedService::new(Vec::new()));
        let config = ExporterConfig::from_yaml_str(
            r#"
group: app
query: fields code
poll_interval_ms: 1
max_wait_seconds: 1
metrics:
  errors:
    type: counter
"#,
        )
        .unwrap();
        let coalescing = CoalescingPipeline::new(Pipeline::with_clock(
            Arc::new(config),
            service.clone(),
            Arc::new(MemoryCheckpoint::new()),
            Arc::new(ManualClock::new(1_000)),
        ));

        for _ in 0..2 {
            let dropped =
                tokio::time::timeout(Duration::from_millis(100), coalescing.collect()).await;
            assert!(dropped.is_err());
        }
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);

        // the detached pass runs out its own budget and stops the query
        let result = coalescing.collect().await.unwrap();
        assert_eq!(result.outcome.state, QueryState::Timeout);
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
    }
}
