//! Observability infrastructure for the sidecar
//!
//! Provides:
//! - the process-wide log filter compiled from the `*_at` configuration
//!   lists (levels are fixed at initialization for the life of the process)
//! - Prometheus metrics covering the publish pipeline

use crate::config::SystemConfig;
use anyhow::{Context, Result};
use prometheus::{register_histogram, register_int_gauge, Histogram, IntGauge};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Compiles the configured logger hierarchy into an [`EnvFilter`].
///
/// Configuration addresses loggers by slash-separated path prefixes
/// (`/processor/custom`); these map onto `tracing` targets
/// (`processor::custom`), and a prefix rule covers every target below it.
/// Rules apply in verbose, silent, mute order over an `info` baseline.
pub fn build_env_filter(config: &SystemConfig) -> Result<EnvFilter> {
    let mut directives = vec!["info".to_string()];
    push_directives(&mut directives, config.verbose_at(), "debug");
    push_directives(&mut directives, config.silent_at(), "warn");
    push_directives(&mut directives, config.mute_at(), "error");
    let spec = directives.join(",");
    EnvFilter::try_new(&spec).with_context(|| format!("invalid log filter '{spec}'"))
}

fn push_directives<'a>(
    directives: &mut Vec<String>,
    at_paths: impl Iterator<Item = &'a str>,
    level: &str,
) {
    for at in at_paths {
        let target = target_of(at);
        if !target.is_empty() {
            directives.push(format!("{target}={level}"));
        }
    }
}

/// Maps a slash-separated logger path to a `tracing` target.
fn target_of(at: &str) -> String {
    at.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("::")
}

/// Histogram buckets for batch processing latency (in seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once).
static GLOBAL_METRICS: OnceLock<SidecarMetricsInner> = OnceLock::new();

struct SidecarMetricsInner {
    batch_latency_seconds: Histogram,
    batch_metrics_received: IntGauge,
    containers_tracked: IntGauge,
    pending_custom_values: IntGauge,
    batches_processed: IntGauge,
}

impl SidecarMetricsInner {
    fn new() -> Self {
        Self {
            batch_latency_seconds: register_histogram!(
                "stats_sidecar_batch_latency_seconds",
                "Time spent processing one batch of metrics",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register batch_latency_seconds"),

            batch_metrics_received: register_int_gauge!(
                "stats_sidecar_batch_metrics_received",
                "Number of metric tuples in the last processed batch"
            )
            .expect("Failed to register batch_metrics_received"),

            containers_tracked: register_int_gauge!(
                "stats_sidecar_containers_tracked",
                "Number of containers currently held in metric memory"
            )
            .expect("Failed to register containers_tracked"),

            pending_custom_values: register_int_gauge!(
                "stats_sidecar_pending_custom_values",
                "Custom metric values buffered while awaiting a stats element"
            )
            .expect("Failed to register pending_custom_values"),

            batches_processed: register_int_gauge!(
                "stats_sidecar_batches_processed_total",
                "Total number of batches processed"
            )
            .expect("Failed to register batches_processed"),
        }
    }
}

/// Lightweight handle to the global sidecar metrics; clones share the same
/// underlying instruments.
#[derive(Clone)]
pub struct SidecarMetrics {
    _private: (),
}

impl Default for SidecarMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SidecarMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SidecarMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SidecarMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_batch_latency(&self, duration_secs: f64) {
        self.inner().batch_latency_seconds.observe(duration_secs);
    }

    pub fn record_batch(&self, metrics_received: i64) {
        self.inner().batch_metrics_received.set(metrics_received);
        self.inner().batches_processed.inc();
    }

    pub fn set_containers_tracked(&self, count: i64) {
        self.inner().containers_tracked.set(count);
    }

    pub fn set_pending_custom_values(&self, count: i64) {
        self.inner().pending_custom_values.set(count);
    }
}
