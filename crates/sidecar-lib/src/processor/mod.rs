//! Metric batch processing
//!
//! The processor turns each incoming batch into container state: it rebuilds
//! the object tree, splits the container subtree from custom metrics, drives
//! the docker and custom ingesters, and maintains the diagnostic counters
//! published at `/_status/processor`. All of this happens under the metric
//! memory write lock so readers observe whole batches only.

mod custom;
mod docker;
mod retention;

pub use retention::Retention;

use crate::config::SystemConfig;
use crate::memory::{MemoryInner, MetricMemory};
use crate::models::Metric;
use crate::objtree::{prune_empty, rebuild, remove};
use crate::observability::SidecarMetrics;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Namespace prefix marking container metrics.
pub const DOCKER_METRIC_PREFIX: &str = "/intel/docker";

/// Diagnostic counters for the processor half of the sidecar.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorCounters {
    pub metrics_received_total: usize,
    pub metrics_received_last: usize,
    pub containers_received_last: usize,
    pub containers_received_max: usize,
    pub custom_metric_values_received_total: usize,
    pub custom_metric_values_received_last: usize,
    pub custom_metric_values_discarded_total: usize,
    pub custom_metric_values_discarded_last: usize,
    pub custom_metric_specs_received_total: usize,
    pub custom_metric_specs_received_last: usize,
}

/// State carried through one processing run on a single batch.
pub(crate) struct BatchContext<'a> {
    pub retention: &'a Retention,
    pub memory: &'a mut MemoryInner,
    /// Container paths touched by the docker ingester this batch.
    pub containers_seen: BTreeSet<String>,
    /// Custom values delivered into exposed container stats.
    pub custom_values_rx: usize,
    /// Custom metric specs newly added to container specs.
    pub custom_specs_rx: usize,
    /// Custom values discarded for being older than any stored stats.
    pub custom_values_dd: usize,
}

/// Processor wired to the shared metric memory.
pub struct Processor {
    retention: Retention,
    memory: Arc<MetricMemory>,
    counters: RwLock<ProcessorCounters>,
    metrics: SidecarMetrics,
}

impl Processor {
    /// Builds a processor; fails fast on an invalid retention configuration.
    pub fn new(config: &SystemConfig, memory: Arc<MetricMemory>) -> Result<Self> {
        Ok(Self {
            retention: Retention::from_config(config)?,
            memory,
            counters: RwLock::new(ProcessorCounters::default()),
            metrics: SidecarMetrics::new(),
        })
    }

    /// Runs a processing pass over one batch of metrics.
    ///
    /// Holds the metric memory write lock and the counters lock for the
    /// whole run; concurrent readers see the pre- or post-batch state.
    pub fn process_metrics(&self, batch: Vec<Metric>) {
        let started = Instant::now();
        let num_metrics = batch.len();
        let mut memory = self.memory.write();
        let mut counters = self.counters.write().unwrap();

        let (containers_seen, values_rx, specs_rx, values_dd) = {
            let mut ctx = BatchContext {
                retention: &self.retention,
                memory: &mut *memory,
                containers_seen: BTreeSet::new(),
                custom_values_rx: 0,
                custom_specs_rx: 0,
                custom_values_dd: 0,
            };
            let mut tree = rebuild(batch);
            let mut container_paths = Vec::new();
            if let Some(dtree) = remove(&mut tree, DOCKER_METRIC_PREFIX) {
                prune_empty(&mut tree);
                container_paths = ctx.ingest_docker_tree(&dtree);
            }
            ctx.ingest_custom_metrics(&tree);
            for path in &container_paths {
                ctx.merge_custom_metrics_for(path);
                ctx.discard_too_old_custom_values_for(path);
            }
            (
                ctx.containers_seen.len(),
                ctx.custom_values_rx,
                ctx.custom_specs_rx,
                ctx.custom_values_dd,
            )
        };

        counters.metrics_received_last = num_metrics;
        counters.metrics_received_total += num_metrics;
        if containers_seen > counters.containers_received_max {
            counters.containers_received_max = containers_seen;
        }
        counters.containers_received_last = containers_seen;
        counters.custom_metric_values_received_last = values_rx;
        counters.custom_metric_values_received_total += values_rx;
        counters.custom_metric_specs_received_last = specs_rx;
        counters.custom_metric_specs_received_total += specs_rx;
        counters.custom_metric_values_discarded_last = values_dd;
        counters.custom_metric_values_discarded_total += values_dd;

        let pending: usize = memory
            .pending_metrics
            .values()
            .flat_map(|by_name| by_name.values())
            .map(Vec::len)
            .sum();
        self.metrics.observe_batch_latency(started.elapsed().as_secs_f64());
        self.metrics.record_batch(num_metrics as i64);
        self.metrics.set_containers_tracked(memory.container_map.len() as i64);
        self.metrics.set_pending_custom_values(pending as i64);
    }

    /// Snapshot of the diagnostic counters for status publishing.
    pub fn status(&self) -> ProcessorCounters {
        self.counters.read().unwrap().clone()
    }

    pub fn memory(&self) -> &Arc<MetricMemory> {
        &self.memory
    }
}
