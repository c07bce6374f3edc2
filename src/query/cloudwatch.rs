use crate::config::AwsConfig;
use crate::error::QueryError;
use crate::query::{LogQueryService, QueryHandle, QueryRequest, QueryResults, ServiceStatus};
use crate::record::{RawField, RawRow};
use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::config::Region;
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::types::{QueryStatus, ResultField};
use aws_sdk_cloudwatchlogs::Client;
use tracing::{debug, info};

/// CloudWatch Logs Insights behind the `LogQueryService` port.
pub struct CloudWatchLogs {
    client: Client,
}

impl CloudWatchLogs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS provider chain, applying the
    /// optional region and profile overrides.
    pub async fn from_config(aws: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &aws.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &aws.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        info!(
            region = ?sdk_config.region().map(|r| r.to_string()),
            profile = ?aws.profile,
            "CloudWatch Logs client configured"
        );
        Self::new(Client::new(&sdk_config))
    }
}

#[async_trait]
impl LogQueryService for CloudWatchLogs {
    async fn start_query(&self, request: &QueryRequest) -> Result<QueryHandle, QueryError> {
        let output = self
            .client
            .start_query()
            .log_group_name(&request.group)
            .start_time(request.window.start_time)
            .end_time(request.window.end_time)
            .query_string(&request.query)
            .send()
            .await
            .map_err(|e| QueryError::Submit(DisplayErrorContext(&e).to_string()))?;

        let query_id = output.query_id().ok_or(QueryError::MissingQueryId)?;
        debug!(query_id, "StartQuery accepted");
        Ok(QueryHandle(query_id.to_string()))
    }

    async fn get_results(&self, handle: &QueryHandle) -> Result<QueryResults, QueryError> {
        let output = self
            .client
            .get_query_results()
            .query_id(&handle.0)
            .send()
            .await
            .map_err(|e| QueryError::Poll {
                query_id: handle.0.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(QueryResults {
            status: map_status(output.status()),
            rows: convert_rows(output.results()),
        })
    }

    async fn stop_query(&self, handle: &QueryHandle) -> Result<(), QueryError> {
        self.client
            .stop_query()
            .query_id(&handle.0)
            .send()
            .await
            .map_err(|e| QueryError::Poll {
                query_id: handle.0.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}

fn map_status(status: Option<&QueryStatus>) -> ServiceStatus {
    match status {
        Some(QueryStatus::Scheduled) => ServiceStatus::Scheduled,
        Some(QueryStatus::Running) => ServiceStatus::Running,
        Some(QueryStatus::Complete) => ServiceStatus::Complete,
        Some(QueryStatus::Failed) => ServiceStatus::Failed,
        Some(QueryStatus::Cancelled) => ServiceStatus::Cancelled,
        Some(QueryStatus::Timeout) => ServiceStatus::Timeout,
        _ => ServiceStatus::Unknown,
    }
}

fn convert_rows(results: &[Vec<ResultField>]) -> Vec<RawRow> {
    results
        .iter()
        .map(|row| {
            row.iter()
                .map(|f| RawField {
                    field: f.field().map(str::to_string),
                    value: f.value().map(str::to_string),
                })
                .collect()
        })
        .collect()
}
