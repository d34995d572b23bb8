//! End-to-end scenarios for the batch processing pipeline

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sidecar_lib::{Metric, MetricMemory, Processor, SystemConfig};
use std::sync::Arc;

const T0: &str = "2020-01-01T00:00:01Z";

fn stamp(value: &str) -> DateTime<Utc> {
    value.parse().unwrap()
}

fn offset(base: &str, seconds: i64) -> String {
    (stamp(base) + Duration::seconds(seconds)).to_rfc3339()
}

fn metric(namespace: &str, stamp: &str, data: serde_json::Value) -> Metric {
    serde_json::from_value(json!({
        "namespace": namespace,
        "timestamp": stamp,
        "data": data,
    }))
    .unwrap()
}

fn tagged_metric(
    namespace: &str,
    stamp: &str,
    tags: &[(&str, &str)],
    data: serde_json::Value,
) -> Metric {
    let tags: serde_json::Map<String, serde_json::Value> = tags
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    serde_json::from_value(json!({
        "namespace": namespace,
        "timestamp": stamp,
        "tags": tags,
        "data": data,
    }))
    .unwrap()
}

fn processor_with(stats_depth: usize, stats_span: &str) -> Processor {
    let config = SystemConfig {
        stats_depth,
        stats_span: stats_span.to_string(),
        ..SystemConfig::default()
    };
    Processor::new(&config, Arc::new(MetricMemory::new())).unwrap()
}

fn cpu_batch(container: &str, stamp: &str, total_usage: u64) -> Vec<Metric> {
    vec![metric(
        &format!("/intel/docker/{container}/stats/cgroups/cpu_stats/cpu_usage/total_usage"),
        stamp,
        json!(total_usage),
    )]
}

#[test]
fn single_batch_builds_container_with_cpu_breakdown() {
    let processor = processor_with(0, "10m");
    processor.process_metrics(vec![
        metric(
            "/intel/docker/abc/spec/creation_time",
            T0,
            json!("2020-01-01T00:00:00Z"),
        ),
        metric("/intel/docker/abc/spec/image_name", T0, json!("nginx")),
        metric(
            "/intel/docker/abc/stats/cgroups/cpu_stats/cpu_usage/total_usage",
            T0,
            json!(100),
        ),
        metric(
            "/intel/docker/abc/stats/cgroups/cpu_stats/cpu_usage/percpu_usage/0",
            T0,
            json!(60),
        ),
        metric(
            "/intel/docker/abc/stats/cgroups/cpu_stats/cpu_usage/percpu_usage/2",
            T0,
            json!(40),
        ),
    ]);

    let memory = processor.memory().read();
    let container = &memory.container_map["/abc"];
    assert_eq!(container.spec.image, "nginx");
    assert_eq!(
        container.spec.creation_time,
        stamp("2020-01-01T00:00:00Z")
    );
    assert_eq!(container.stats.len(), 1);
    let stats = &container.stats[0];
    assert_eq!(stats.cpu.usage.total, 100);
    assert_eq!(stats.cpu.usage.per_cpu, vec![60, 0, 40]);
    assert_eq!(stats.timestamp, stamp(T0));
}

#[test]
fn stats_depth_bounds_history_to_a_fifo() {
    let processor = processor_with(2, "10m");
    for seconds in [0, 1, 2] {
        processor.process_metrics(cpu_batch("abc", &offset(T0, seconds), seconds as u64));
    }

    let memory = processor.memory().read();
    let stats = &memory.container_map["/abc"].stats;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].timestamp, stamp(&offset(T0, 1)));
    assert_eq!(stats[1].timestamp, stamp(&offset(T0, 2)));
}

#[test]
fn stats_span_drops_elements_out_of_the_window() {
    let processor = processor_with(0, "10s");
    for seconds in [0, 5, 20] {
        processor.process_metrics(cpu_batch("abc", &offset(T0, seconds), seconds as u64));
    }

    let memory = processor.memory().read();
    let stats = &memory.container_map["/abc"].stats;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].timestamp, stamp(&offset(T0, 20)));
}

#[test]
fn retention_bound_holds_after_every_batch() {
    let processor = processor_with(3, "30s");
    for seconds in 0..40 {
        processor.process_metrics(cpu_batch("abc", &offset(T0, seconds * 7), 1));
        let memory = processor.memory().read();
        let stats = &memory.container_map["/abc"].stats;
        assert!(stats.len() <= 3);
        if let (Some(first), Some(last)) = (stats.first(), stats.last()) {
            assert!(last.timestamp - first.timestamp <= Duration::seconds(30));
        }
    }
}

#[test]
fn custom_value_merges_into_oldest_covering_stats_element() {
    let processor = processor_with(0, "10m");
    // the container has to exist before a custom metric can target it
    processor.process_metrics(cpu_batch("abc", &offset(T0, -1), 1));
    processor.process_metrics(vec![tagged_metric(
        "/observed/hits",
        T0,
        &[
            ("custom_metric_name", "hits"),
            ("custom_metric_format", "int"),
            ("custom_metric_container_path", "/abc"),
        ],
        json!(42),
    )]);
    processor.process_metrics(cpu_batch("abc", &offset(T0, 1), 2));

    let memory = processor.memory().read();
    let container = &memory.container_map["/abc"];
    assert!(container
        .spec
        .custom_metrics
        .iter()
        .any(|spec| spec.name == "hits"));
    let newest = container.stats.last().unwrap();
    assert_eq!(newest.timestamp, stamp(&offset(T0, 1)));
    let values = &newest.custom_metrics["hits"];
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].int_value, Some(42));
    // delivered exactly once
    assert!(container.stats[0].custom_metrics.is_empty());
    assert!(memory.pending_metrics["/abc"]["hits"].is_empty());
}

#[test]
fn custom_value_newer_than_all_stats_never_surfaces() {
    let processor = processor_with(0, "10m");
    processor.process_metrics(cpu_batch("abc", &offset(T0, -2), 1));
    processor.process_metrics(vec![tagged_metric(
        "/observed/hits",
        T0,
        &[
            ("custom_metric_name", "hits"),
            ("custom_metric_format", "int"),
            ("custom_metric_container_path", "/abc"),
        ],
        json!(42),
    )]);
    processor.process_metrics(cpu_batch("abc", &offset(T0, -1), 2));

    let memory = processor.memory().read();
    let container = &memory.container_map["/abc"];
    for stats in &container.stats {
        assert!(stats.custom_metrics.is_empty());
    }
    // the value awaits a stats element recent enough to hold it
    assert_eq!(memory.pending_metrics["/abc"]["hits"].len(), 1);
    drop(memory);
    let counters = processor.status();
    assert_eq!(counters.custom_metric_values_received_total, 0);
}

#[test]
fn custom_metric_for_unknown_container_creates_no_ghost() {
    let processor = processor_with(0, "10m");
    processor.process_metrics(vec![tagged_metric(
        "/observed/hits",
        T0,
        &[("custom_metric_container_path", "/ghost")],
        json!(1),
    )]);

    let memory = processor.memory().read();
    assert!(memory.container_map.is_empty());
    assert!(memory.pending_metrics.is_empty());
}

#[test]
fn expand_map_produces_one_spec_per_entry() {
    let processor = processor_with(0, "10m");
    processor.process_metrics(cpu_batch("abc", &offset(T0, -1), 1));
    processor.process_metrics(vec![tagged_metric(
        "/observed/io",
        T0,
        &[
            ("custom_metric_name", "io"),
            ("custom_metric_format", "float"),
            ("custom_metric_container_path", "/abc"),
        ],
        json!({"reads": 5.0, "writes": 6.5}),
    )]);
    processor.process_metrics(cpu_batch("abc", &offset(T0, 1), 2));

    let memory = processor.memory().read();
    let container = &memory.container_map["/abc"];
    let mut names: Vec<&str> = container
        .spec
        .custom_metrics
        .iter()
        .map(|spec| spec.name.as_str())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["io/reads", "io/writes"]);
    let newest = container.stats.last().unwrap();
    assert_eq!(newest.custom_metrics["io/reads"][0].float_value, Some(5.0));
    assert_eq!(newest.custom_metrics["io/writes"][0].float_value, Some(6.5));
}

#[test]
fn processor_counters_track_batches() {
    let processor = processor_with(0, "10m");
    processor.process_metrics(cpu_batch("abc", T0, 1));
    processor.process_metrics(vec![
        metric(
            "/intel/docker/abc/stats/cgroups/cpu_stats/cpu_usage/total_usage",
            &offset(T0, 1),
            json!(2),
        ),
        metric(
            "/intel/docker/def/stats/cgroups/cpu_stats/cpu_usage/total_usage",
            &offset(T0, 1),
            json!(3),
        ),
    ]);

    let counters = processor.status();
    assert_eq!(counters.metrics_received_total, 3);
    assert_eq!(counters.metrics_received_last, 2);
    assert_eq!(counters.containers_received_last, 2);
    assert_eq!(counters.containers_received_max, 2);
}

#[test]
fn invalid_stats_span_fails_initialization() {
    let config = SystemConfig {
        stats_span: "eleven".to_string(),
        ..SystemConfig::default()
    };
    assert!(Processor::new(&config, Arc::new(MetricMemory::new())).is_err());
}
