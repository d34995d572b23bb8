//! Shared metric memory
//!
//! The process-wide store both halves of the sidecar work against: the
//! processor rewrites it under the write lock for the whole of a batch, the
//! stats server copies out of it under the read lock. Readers therefore see
//! either the pre-batch or the post-batch state, never a partial append.

use crate::models::{ContainerInfo, MetricVal};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Pending custom values: container path → metric name → ordered samples.
pub type PendingValues = HashMap<String, HashMap<String, Vec<MetricVal>>>;

/// The guarded state.
#[derive(Debug, Default)]
pub struct MemoryInner {
    /// All containers known to the sidecar, keyed by container path.
    pub container_map: HashMap<String, ContainerInfo>,
    /// Custom metric values awaiting a sufficiently recent stats element.
    pub pending_metrics: PendingValues,
}

/// Reader/writer-locked metric storage shared between processor and server.
#[derive(Debug, Default)]
pub struct MetricMemory {
    inner: RwLock<MemoryInner>,
}

impl MetricMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap()
    }
}
