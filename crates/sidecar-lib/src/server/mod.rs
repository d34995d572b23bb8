//! HTTP stats server
//!
//! Serves the container model rebuilt by the processor:
//! - `POST /stats/container/` answers stats queries with time-range and
//!   count filtering
//! - `GET /_status/<name>` invokes a registered status publisher
//! - `GET /healthz` and `GET /metrics` cover liveness and Prometheus
//!   exposition
//!
//! The query path takes the metric memory read lock only while copying the
//! containers needed for the response; serialization happens outside it.

use crate::config::SystemConfig;
use crate::memory::MetricMemory;
use crate::models::{ContainerInfo, ContainerStats, StatsRequest};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// Largest request body the stats endpoint accepts.
pub const MAX_BODY_SIZE_BYTES: usize = 1_048_576;

/// Diagnostic counters for the server half of the sidecar: stats elements
/// transmitted in responses and discarded by request filters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerCounters {
    pub stats_tx_max: usize,
    pub stats_tx_total: usize,
    pub stats_tx_last: usize,
    pub stats_dd_max: usize,
    pub stats_dd_total: usize,
    pub stats_dd_last: usize,
}

/// A registered status publisher; invoked per `GET /_status/<name>` request
/// and expected to return a JSON-serializable snapshot.
pub type StatusPublisherFn = Box<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Server context wiring configuration, metric memory and the status
/// publisher registry together.
pub struct ServerContext {
    listen_addr: String,
    memory: Arc<MetricMemory>,
    counters: RwLock<ServerCounters>,
    status_publishers: RwLock<HashMap<String, StatusPublisherFn>>,
}

impl ServerContext {
    /// Builds a server context and registers its own counters under the
    /// `server` status name.
    pub fn new(config: &SystemConfig, memory: Arc<MetricMemory>) -> Arc<Self> {
        let server = Arc::new(Self {
            listen_addr: config.listen_addr(),
            memory,
            counters: RwLock::new(ServerCounters::default()),
            status_publishers: RwLock::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&server);
        server.add_status_publisher("server", move || {
            weak.upgrade()
                .map(|server| serde_json::to_value(server.status()).unwrap_or_default())
                .unwrap_or_default()
        });
        server
    }

    /// Registers a function reporting diagnostic status for some part of the
    /// sidecar, served at `GET /_status/<name>`.
    pub fn add_status_publisher(
        &self,
        name: &str,
        publisher: impl Fn() -> serde_json::Value + Send + Sync + 'static,
    ) {
        self.status_publishers
            .write()
            .unwrap()
            .insert(name.to_string(), Box::new(publisher));
    }

    /// Snapshot of the server counters.
    pub fn status(&self) -> ServerCounters {
        self.counters.read().unwrap().clone()
    }

    /// Binds the configured address and spawns the listener loop.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.listen_addr))?;
        info!(target: "server", address = %self.listen_addr, "starting stats server");
        let app = create_router(self);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(target: "server", error = %err, "server routine exited with error");
            }
        });
        Ok(())
    }

    /// Copies and filters container records for one stats query. Takes the
    /// memory read lock and the server counters lock.
    fn build_stats_response(&self, request: &StatsRequest) -> HashMap<String, ContainerInfo> {
        let start = request.start.unwrap_or(DateTime::UNIX_EPOCH);
        let end = request.end.unwrap_or_else(Utc::now);

        let memory = self.memory.read();
        let mut counters = self.counters.write().unwrap();
        let mut response = HashMap::with_capacity(memory.container_map.len());
        let mut stats_tx = 0;
        let mut stats_dd = 0;

        for (name, info) in &memory.container_map {
            let mut sorted: Vec<&ContainerStats> = info.stats.iter().collect();
            sorted.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));

            let mut filtered = Vec::new();
            for (index, item) in sorted.iter().enumerate() {
                if item.timestamp < start || item.timestamp > end {
                    stats_dd += 1;
                    continue;
                }
                filtered.push((*item).clone());
                stats_tx += 1;
                if request.num_stats > 0 && filtered.len() >= request.num_stats {
                    stats_dd += sorted.len() - index - 1;
                    break;
                }
            }

            let mut copy = info.clone();
            copy.stats = filtered;
            response.insert(name.clone(), copy);
        }

        if stats_dd > counters.stats_dd_max {
            counters.stats_dd_max = stats_dd;
        }
        counters.stats_dd_last = stats_dd;
        counters.stats_dd_total += stats_dd;
        if stats_tx > counters.stats_tx_max {
            counters.stats_tx_max = stats_tx;
        }
        counters.stats_tx_last = stats_tx;
        counters.stats_tx_total += stats_tx;

        response
    }
}

/// Builds the axum router for a server context. Exposed separately so tests
/// can drive the routes without a live listener.
pub fn create_router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/stats/container/", post(container_stats))
        .route("/_status/{name}", get(serve_status))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE_BYTES))
        .with_state(ctx)
}

async fn container_stats(State(ctx): State<Arc<ServerContext>>, body: Bytes) -> Response {
    info!(target: "server", "/stats/container was invoked");
    let request: StatsRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            error!(target: "server", error = %err, "failed to decode request");
            return report_error(&err.to_string());
        }
    };
    let response = ctx.build_stats_response(&request);
    json_response(StatusCode::OK, &response)
}

async fn serve_status(
    State(ctx): State<Arc<ServerContext>>,
    Path(name): Path<String>,
) -> Response {
    info!(target: "server", publisher_name = %name,
        "serving status from registered publisher");
    let status = {
        let publishers = ctx.status_publishers.read().unwrap();
        publishers.get(&name).map(|publisher| publisher())
    };
    match status {
        Some(value) => json_response(StatusCode::OK, &value),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
            json!({"error": format!("no status publisher named '{name}'")}).to_string(),
        )
            .into_response(),
    }
}

async fn healthz() -> Response {
    json_response(StatusCode::OK, &json!({"status": "ok"}))
}

/// Prometheus exposition endpoint.
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(target: "server", error = %err, "failed to encode metrics");
        return report_error(&err.to_string());
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(target: "server", error = %err, "failed to encode response");
            report_error(&err.to_string())
        }
    }
}

/// Reports a failure as HTTP 500 with a JSON error object, falling back to a
/// plain-text body if even the error cannot be encoded.
fn report_error(message: &str) -> Response {
    match serde_json::to_string(&json!({"error": message})) {
        Ok(body) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
            body,
        )
            .into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response(),
    }
}
