//! Container subtree ingestion
//!
//! Turns the subtree under `/intel/docker` into `ContainerInfo` records: the
//! spec branch is read once when a container is first observed, and every
//! batch appends one `ContainerStats` snapshot assembled from the cgroup,
//! network, connection and filesystem branches. Each subsystem is ingested
//! independently; an absent or malformed branch leaves defaults in place.

use super::BatchContext;
use crate::extract::{ExtractScope, MetricFields};
use crate::models::{ContainerInfo, ContainerStats, FsStats, InterfaceStats, MetricData, TcpStat};
use crate::objtree::{seek, walk, Node, WalkAction};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Creation time used when a container spec does not carry one.
const FALLBACK_CREATION_TIME: &str = "2003-03-03T03:03:03Z";

fn fallback_creation_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FALLBACK_CREATION_TIME)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Boot time of the host, derived once from the system uptime. The root
/// container reports it as its creation time.
fn host_boot_time() -> DateTime<Utc> {
    static HOST_BOOT_TIME: OnceLock<DateTime<Utc>> = OnceLock::new();
    *HOST_BOOT_TIME.get_or_init(|| {
        let now = Utc::now();
        let uptime_secs = std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|content| {
                content
                    .split_whitespace()
                    .next()
                    .and_then(|field| field.parse::<f64>().ok())
            });
        match uptime_secs {
            Some(secs) => now - Duration::milliseconds((secs * 1000.0) as i64),
            None => now,
        }
    })
}

fn container_path(id: &str) -> String {
    if id == "/" {
        "/".to_string()
    } else {
        format!("/{id}")
    }
}

impl BatchContext<'_> {
    /// Ingests the extracted container subtree; every immediate child is one
    /// container id, with the literal `root` mapped to `/`. Returns the
    /// container paths touched by this batch.
    pub(crate) fn ingest_docker_tree(&mut self, dtree: &Node) -> Vec<String> {
        let Some(branch) = dtree.as_branch() else {
            return Vec::new();
        };
        let mut container_paths = Vec::new();
        for (docker_id, subtree) in branch {
            let id = if docker_id == "root" { "/" } else { docker_id };
            let path = container_path(id);
            if !self.memory.container_map.contains_key(&path) {
                debug!(target: "processor", id = id,
                    "building info structures for new container");
                let info = build_container_info(id, &path, subtree);
                self.memory.container_map.insert(path.clone(), info);
            }
            self.containers_seen.insert(path.clone());
            self.update_container_stats(&path, id, subtree);
            container_paths.push(path);
        }
        container_paths
    }

    /// Builds one stats snapshot from the container subtree and appends it
    /// within the configured retention window.
    fn update_container_stats(&mut self, path: &str, id: &str, subtree: &Node) {
        let Some(stats_node) = seek(subtree, "/stats") else {
            warn!(target: "processor", container = path,
                "container subtree has no stats branch");
            return;
        };
        let mut newest: Option<DateTime<Utc>> = None;
        walk(stats_node, &mut |_, info| {
            if let Some(metric) = info.node.as_leaf() {
                if newest.map_or(true, |seen| metric.timestamp > seen) {
                    newest = Some(metric.timestamp);
                }
            }
            WalkAction::Continue
        });
        let Some(timestamp) = newest else {
            warn!(target: "processor", container = path,
                "stats branch carries no timestamped metrics");
            return;
        };

        let mut stats = ContainerStats::new(timestamp);
        ingest_cpu_stats(id, &mut stats, stats_node);
        ingest_memory_stats(id, &mut stats, stats_node);
        ingest_network_stats(id, &mut stats, stats_node);
        ingest_connection_stats(id, &mut stats, stats_node);
        ingest_fs_stats(id, &mut stats, stats_node);

        if let Some(container) = self.memory.container_map.get_mut(path) {
            self.retention.make_room(&mut container.stats, timestamp);
            container.stats.push(stats);
        }
    }
}

/// Allocates a container record and populates its spec from the `spec/*`
/// branch. Runs once per container lifetime.
fn build_container_info(id: &str, path: &str, subtree: &Node) -> ContainerInfo {
    let mut info = ContainerInfo::new(id, path);
    let mut scope = ExtractScope::new(format!("{id}/spec"));

    if let Some(spec_node) = seek(subtree, "/spec") {
        ingest_container_labels(&mut info, subtree);
        if let Some(fields) = MetricFields::from_node(spec_node) {
            info.spec.creation_time =
                scope.get_time(fields, "creation_time", fallback_creation_time());
            info.spec.image = scope.get_str(fields, "image_name", "");
        }
    } else if id == "/" {
        // the root container legitimately has no spec branch
        info.spec.creation_time = host_boot_time();
    } else {
        info.spec.creation_time = fallback_creation_time();
    }

    scope.enter(format!("{id}/memory_stats"));
    if let Some(mem_node) = seek(subtree, "/stats/cgroups/memory_stats/stats") {
        info.spec.has_memory = true;
        if let Some(fields) = MetricFields::from_node(mem_node) {
            info.spec.memory.limit = scope.get_u64(fields, "limit_in_bytes", 0);
            info.spec.memory.swap_limit = scope.get_u64(fields, "swap_limit_in_bytes", 0);
        }
    }

    info.spec.has_cpu = true;
    info.spec.has_network = true;
    info.spec.has_filesystem = true;
    info.spec.has_custom_metrics = true;

    scope.log_warnings();
    info
}

/// Reads `/spec/labels`, unwrapping `{"value": v}` leaves and rewriting `_`
/// in label keys to `.`.
fn ingest_container_labels(info: &mut ContainerInfo, subtree: &Node) {
    let Some(labels_node) = seek(subtree, "/spec/labels") else {
        return;
    };
    let Some(fields) = MetricFields::from_node(labels_node) else {
        return;
    };
    for (key, metric) in fields.flatten_values() {
        info.spec
            .labels
            .insert(key.replace('_', "."), metric.data.to_string());
    }
}

fn ingest_cpu_stats(id: &str, stats: &mut ContainerStats, stats_node: &Node) {
    let mut scope = ExtractScope::new(format!("{id}/cpu_stats"));
    let Some(usage_node) = seek(stats_node, "/cgroups/cpu_stats/cpu_usage") else {
        return;
    };
    if let Some(fields) = MetricFields::from_node(usage_node) {
        let usage = &mut stats.cpu.usage;
        usage.system = scope.get_u64(fields, "usage_in_kernelmode", 0);
        usage.user = scope.get_u64(fields, "usage_in_usermode", 0);
        usage.total = scope.get_u64(fields, "total_usage", 0);
    }

    if let Some(percpu_node) = seek(usage_node, "/percpu_usage") {
        scope.enter(format!("{id}/percpu_usage"));
        if let Some(fields) = MetricFields::from_node(percpu_node) {
            let mut per_cpu = BTreeMap::new();
            for (key, metric) in fields.flatten_values() {
                let Ok(index) = key.parse::<usize>() else {
                    scope.record(format!("cpu index '{key}' is not a number"));
                    continue;
                };
                match &metric.data {
                    MetricData::Uint(v) => {
                        per_cpu.insert(index, *v);
                    }
                    other => {
                        scope.record(format!("cpu slot '{key}' is not a u64 (got {other})"));
                        per_cpu.insert(index, 0);
                    }
                }
            }
            if let Some(&max_index) = per_cpu.keys().next_back() {
                stats.cpu.usage.per_cpu = (0..=max_index)
                    .map(|index| per_cpu.get(&index).copied().unwrap_or(0))
                    .collect();
            }
        }
    }
    scope.log_warnings();
}

fn ingest_memory_stats(id: &str, stats: &mut ContainerStats, stats_node: &Node) {
    let mut scope = ExtractScope::new(format!("{id}/memory_stats"));
    let Some(mem_node) = seek(stats_node, "/cgroups/memory_stats") else {
        return;
    };
    let memory = &mut stats.memory;
    if let Some(fields) = MetricFields::from_node(mem_node) {
        memory.cache = scope.get_u64(fields, "cache", 0);
    }
    if let Some(usage_node) = seek(mem_node, "/usage") {
        if let Some(fields) = MetricFields::from_node(usage_node) {
            memory.usage = scope.get_u64(fields, "usage", 0);
            memory.failcnt = scope.get_u64(fields, "failcnt", 0);
        }
    }
    if let Some(detail_node) = seek(mem_node, "/stats") {
        if let Some(fields) = MetricFields::from_node(detail_node) {
            memory.rss = scope.get_u64(fields, "rss", 0);
            memory.container_data.pgfault = scope.get_u64(fields, "pgfault", 0);
            memory.container_data.pgmajfault = scope.get_u64(fields, "pgmajfault", 0);
        }
    }
    scope.log_warnings();
}

fn ingest_network_stats(id: &str, stats: &mut ContainerStats, stats_node: &Node) {
    let mut scope = ExtractScope::new(format!("{id}/network"));
    let Some(network_node) = seek(stats_node, "/network") else {
        return;
    };
    let Some(branch) = network_node.as_branch() else {
        return;
    };

    let mut found_total = false;
    for (name, child) in branch {
        let Some(fields) = MetricFields::from_node(child) else {
            continue;
        };
        scope.enter(format!("{id}/network/{name}"));
        let iface = InterfaceStats {
            name: name.clone(),
            rx_bytes: scope.get_u64(fields, "rx_bytes", 0),
            rx_packets: scope.get_u64(fields, "rx_packets", 0),
            rx_errors: scope.get_u64(fields, "rx_errors", 0),
            rx_dropped: scope.get_u64(fields, "rx_dropped", 0),
            tx_bytes: scope.get_u64(fields, "tx_bytes", 0),
            tx_packets: scope.get_u64(fields, "tx_packets", 0),
            tx_errors: scope.get_u64(fields, "tx_errors", 0),
            tx_dropped: scope.get_u64(fields, "tx_dropped", 0),
        };
        if name == "total" {
            stats.network.interface = iface;
            found_total = true;
        } else {
            // branch iteration is already sorted by interface name
            stats.network.interfaces.push(iface);
        }
    }
    if !found_total {
        scope.enter(format!("{id}/network"));
        warn!(target: "processor", context = scope.context(),
            "found no total interface");
    }
    scope.log_warnings();
}

fn ingest_connection_stats(id: &str, stats: &mut ContainerStats, stats_node: &Node) {
    let mut scope = ExtractScope::new(format!("{id}/connection"));
    if let Some(tcp_node) = seek(stats_node, "/connection/tcp") {
        if let Some(fields) = MetricFields::from_node(tcp_node) {
            scope.enter(format!("{id}/tcp"));
            stats.network.tcp = read_tcp_stat(&mut scope, fields);
        }
    }
    scope.enter(format!("{id}/connection"));
    if let Some(tcp6_node) = seek(stats_node, "/connection/tcp6") {
        if let Some(fields) = MetricFields::from_node(tcp6_node) {
            scope.enter(format!("{id}/tcp6"));
            stats.network.tcp6 = read_tcp_stat(&mut scope, fields);
        }
    }
    scope.log_warnings();
}

fn read_tcp_stat(scope: &mut ExtractScope, fields: MetricFields<'_>) -> TcpStat {
    TcpStat {
        close: scope.get_u64(fields, "close", 0),
        close_wait: scope.get_u64(fields, "close_wait", 0),
        closing: scope.get_u64(fields, "closing", 0),
        established: scope.get_u64(fields, "established", 0),
        fin_wait1: scope.get_u64(fields, "fin_wait1", 0),
        fin_wait2: scope.get_u64(fields, "fin_wait2", 0),
        last_ack: scope.get_u64(fields, "last_ack", 0),
        listen: scope.get_u64(fields, "listen", 0),
        syn_recv: scope.get_u64(fields, "syn_recv", 0),
        syn_sent: scope.get_u64(fields, "syn_sent", 0),
        time_wait: scope.get_u64(fields, "time_wait", 0),
    }
}

fn ingest_fs_stats(id: &str, stats: &mut ContainerStats, stats_node: &Node) {
    let mut scope = ExtractScope::new(format!("{id}/filesystem"));
    let Some(fs_node) = seek(stats_node, "/filesystem") else {
        return;
    };
    let Some(branch) = fs_node.as_branch() else {
        return;
    };
    for (device, child) in branch {
        let Some(fields) = MetricFields::from_node(child) else {
            continue;
        };
        scope.enter(format!("{id}/filesystem/{device}"));
        let fs = FsStats {
            device: device.clone(),
            fs_type: fields
                .get("type")
                .map(|data| data.to_string())
                .unwrap_or_else(|| "null".to_string()),
            limit: scope.get_u64(fields, "capacity", 0),
            usage: scope.get_u64(fields, "usage", 0),
            base_usage: scope.get_u64(fields, "base_usage", 0),
            available: scope.get_u64(fields, "available", 0),
            inodes_free: scope.get_u64(fields, "inodes_free", 0),
            reads_completed: scope.get_u64(fields, "reads_completed", 0),
            reads_merged: scope.get_u64(fields, "reads_merged", 0),
            sectors_read: scope.get_u64(fields, "sectors_read", 0),
            read_time: scope.get_u64(fields, "read_time", 0),
            writes_completed: scope.get_u64(fields, "writes_completed", 0),
            writes_merged: scope.get_u64(fields, "writes_merged", 0),
            sectors_written: scope.get_u64(fields, "sectors_written", 0),
            write_time: scope.get_u64(fields, "write_time", 0),
            io_in_progress: scope.get_u64(fields, "io_in_progress", 0),
            io_time: scope.get_u64(fields, "io_time", 0),
            weighted_io_time: scope.get_u64(fields, "weighted_io_time", 0),
        };
        // branch iteration keeps the device ordering
        stats.filesystem.push(fs);
    }
    scope.log_warnings();
}
