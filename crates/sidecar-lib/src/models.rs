//! Data models for the stats sidecar
//!
//! Two families live here: the wire model (`Metric`, `MetricData`) describing
//! the flat tuples delivered by the collection agent, and the cAdvisor-shaped
//! container model (`ContainerInfo` and friends) served back to scrapers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One metric tuple as decoded from an incoming batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Slash-joined namespace path, e.g. `/intel/docker/abc/stats/...`.
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub data: MetricData,
}

/// Payload carried by a metric tuple.
///
/// Variant order matters for untagged deserialization: a non-negative JSON
/// integer decodes as `Uint`, a negative one as `Int`, anything fractional as
/// `Float`. A JSON object decodes as a name-to-float map (the expand-map
/// shape used by some collectors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricData {
    Uint(u64),
    Int(i64),
    Float(f64),
    Str(String),
    FloatMap(BTreeMap<String, f64>),
}

impl fmt::Display for MetricData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricData::Uint(v) => write!(f, "{v}"),
            MetricData::Int(v) => write!(f, "{v}"),
            MetricData::Float(v) => write!(f, "{v}"),
            MetricData::Str(v) => write!(f, "{v}"),
            MetricData::FloatMap(m) => write!(f, "{m:?}"),
        }
    }
}

/// Container record exposed through the stats query endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Container path; always `/<id>`, the root container stays `/`.
    pub name: String,
    pub spec: ContainerSpec,
    #[serde(default)]
    pub stats: Vec<ContainerStats>,
}

impl ContainerInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            spec: ContainerSpec::default(),
            stats: Vec::new(),
        }
    }
}

/// Static descriptor of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    pub creation_time: DateTime<Utc>,
    pub image: String,
    pub has_cpu: bool,
    pub has_memory: bool,
    pub has_network: bool,
    pub has_filesystem: bool,
    pub has_custom_metrics: bool,
    #[serde(default)]
    pub memory: MemorySpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_metrics: Vec<MetricSpec>,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            labels: HashMap::new(),
            creation_time: DateTime::UNIX_EPOCH,
            image: String::new(),
            has_cpu: false,
            has_memory: false,
            has_network: false,
            has_filesystem: false,
            has_custom_metrics: false,
            memory: MemorySpec::default(),
            custom_metrics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySpec {
    pub limit: u64,
    pub swap_limit: u64,
}

/// One time-stamped snapshot of counters for a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cpu: CpuStats,
    #[serde(default)]
    pub memory: MemoryStats,
    #[serde(default)]
    pub network: NetworkStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<FsStats>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_metrics: HashMap<String, Vec<MetricVal>>,
}

impl ContainerStats {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu: CpuStats::default(),
            memory: MemoryStats::default(),
            network: NetworkStats::default(),
            filesystem: Vec::new(),
            custom_metrics: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage: CpuUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    pub total: u64,
    #[serde(rename = "per_cpu_usage", default, skip_serializing_if = "Vec::is_empty")]
    pub per_cpu: Vec<u64>,
    pub user: u64,
    pub system: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub usage: u64,
    pub cache: u64,
    pub rss: u64,
    pub failcnt: u64,
    pub container_data: MemoryData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryData {
    pub pgfault: u64,
    pub pgmajfault: u64,
}

/// Network counters; the aggregate "total" interface is flattened into the
/// top level, per-interface entries follow sorted by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(flatten)]
    pub interface: InterfaceStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceStats>,
    #[serde(default)]
    pub tcp: TcpStat,
    #[serde(default)]
    pub tcp6: TcpStat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub name: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

/// Counts of TCP connections by state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpStat {
    pub close: u64,
    pub close_wait: u64,
    pub closing: u64,
    pub established: u64,
    pub fin_wait1: u64,
    pub fin_wait2: u64,
    pub last_ack: u64,
    pub listen: u64,
    pub syn_recv: u64,
    pub syn_sent: u64,
    pub time_wait: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsStats {
    pub device: String,
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(rename = "capacity")]
    pub limit: u64,
    pub usage: u64,
    pub base_usage: u64,
    pub available: u64,
    pub inodes_free: u64,
    pub reads_completed: u64,
    pub reads_merged: u64,
    pub sectors_read: u64,
    pub read_time: u64,
    pub writes_completed: u64,
    pub writes_merged: u64,
    pub sectors_written: u64,
    pub write_time: u64,
    pub io_in_progress: u64,
    pub io_time: u64,
    pub weighted_io_time: u64,
}

/// Declaration of a user-defined custom metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub format: MetricFormat,
    pub units: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFormat {
    #[default]
    Int,
    Float,
}

/// One sample of a custom metric; exactly one of the value fields is set,
/// matching the spec's declared format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricVal {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_value: Option<f64>,
}

/// Body of a `POST /stats/container/` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRequest {
    /// Name of the container to retrieve stats for (defaults to all).
    #[serde(rename = "containerName", default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Maximum number of stats to return per container; unlimited if zero.
    #[serde(default)]
    pub num_stats: usize,
    /// Start of the time window; defaults to the beginning of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    /// End of the time window; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Accepted for wire compatibility; the query ignores it.
    #[serde(default)]
    pub subcontainers: bool,
}
