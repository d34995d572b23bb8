//! Publisher entry point
//!
//! The external driver hands encoded batches to [`Publisher::publish`]. The
//! first call performs one-time wiring of the processor and the stats server;
//! if that wiring fails, the error is retained and surfaced on every
//! subsequent call instead of retrying.

use crate::config::SystemConfig;
use crate::memory::MetricMemory;
use crate::models::Metric;
use crate::processor::Processor;
use crate::server::ServerContext;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

struct Subsystems {
    processor: Arc<Processor>,
    // kept so the status publisher registry outlives the router
    #[allow(dead_code)]
    server: Arc<ServerContext>,
}

/// The publishing side of the sidecar, shared with the external driver.
pub struct Publisher {
    config: SystemConfig,
    memory: Arc<MetricMemory>,
    subsystems: OnceCell<Result<Subsystems, String>>,
}

impl Publisher {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            memory: Arc::new(MetricMemory::new()),
            subsystems: OnceCell::new(),
        }
    }

    /// Decodes one JSON batch of metrics and runs a processing pass over it.
    /// A decode failure drops the batch and surfaces to the caller.
    pub async fn publish(&self, content: &[u8]) -> Result<()> {
        let subsystems = self.ensure_initialized().await?;
        let batch: Vec<Metric> =
            serde_json::from_slice(content).context("error decoding metric batch")?;
        debug!(target: "publisher", num_metrics = batch.len(),
            "received metrics to process");
        subsystems.processor.process_metrics(batch);
        Ok(())
    }

    /// The metric memory backing this publisher.
    pub fn memory(&self) -> &Arc<MetricMemory> {
        &self.memory
    }

    /// Runs one-time initialization on first use; later calls are no-ops
    /// that replay the first outcome.
    async fn ensure_initialized(&self) -> Result<&Subsystems> {
        let outcome = self
            .subsystems
            .get_or_init(|| async {
                initialize(&self.config, self.memory.clone())
                    .await
                    .map_err(|err| format!("{err:#}"))
            })
            .await;
        match outcome {
            Ok(subsystems) => Ok(subsystems),
            Err(message) => Err(anyhow!("publisher failed to initialize: {message}")),
        }
    }
}

async fn initialize(config: &SystemConfig, memory: Arc<MetricMemory>) -> Result<Subsystems> {
    let processor = Arc::new(Processor::new(config, memory.clone())?);
    let server = ServerContext::new(config, memory);
    let status_source = processor.clone();
    server.add_status_publisher("processor", move || {
        serde_json::to_value(status_source.status()).unwrap_or_default()
    });
    server.clone().start().await?;
    Ok(Subsystems { processor, server })
}
