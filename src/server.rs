use crate::error::Result;
use crate::exposition;
use crate::pipeline::CoalescingPipeline;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cloudwatch-log-exporter",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Runs (or joins) a collection pass and renders it, followed by the
/// exporter's own metrics.
async fn scrape(State(pipeline): State<Arc<CoalescingPipeline>>) -> Response {
    let result = match pipeline.collect().await {
        Ok(result) => result,
        Err(e) => {
            error!("Collection pass failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let mut body = exposition::render(&result.collection.observations);
    body.push_str(&crate::metrics::render());

    ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response()
}

/// Create the HTTP router with the scrape and health routes
pub fn create_server(metrics_path: &str, pipeline: Arc<CoalescingPipeline>) -> Router {
    let metrics_path = if metrics_path.starts_with('/') {
        metrics_path.to_string()
    } else {
        format!("/{}", metrics_path)
    };

    Router::new()
        .route("/health", get(health))
        .route(&metrics_path, get(scrape))
        .with_state(pipeline)
        .layer(TraceLayer::new_for_http())
}

/// Serve until ctrl-c
pub async fn start_server(
    addr: SocketAddr,
    metrics_path: &str,
    pipeline: Arc<CoalescingPipeline>,
) -> Result<()> {
    let app = create_server(metrics_path, pipeline);

    info!(%addr, path = metrics_path, "Metrics endpoint listening");

    Server::try_bind(&addr)?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Resolves on ctrl-c. If the signal cannot be listened for, never resolves.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
