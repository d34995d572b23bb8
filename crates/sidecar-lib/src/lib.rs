//! Core library for the container-stats publishing sidecar
//!
//! This crate provides:
//! - Reconstruction of metric batches into an object tree
//! - Ingestion of container and custom metrics into a cAdvisor-shaped model
//! - Bounded, time-windowed retention of container stats
//! - An HTTP server answering stats queries and status requests

pub mod config;
pub mod duration;
pub mod extract;
pub mod memory;
pub mod models;
pub mod objtree;
pub mod observability;
pub mod processor;
pub mod publisher;
pub mod server;

pub use config::SystemConfig;
pub use memory::{MemoryInner, MetricMemory, PendingValues};
pub use models::*;
pub use observability::{build_env_filter, SidecarMetrics};
pub use processor::{Processor, ProcessorCounters, DOCKER_METRIC_PREFIX};
pub use publisher::Publisher;
pub use server::{create_router, ServerContext, ServerCounters};
