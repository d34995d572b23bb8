//! Custom metric ingestion
//!
//! Custom metrics are leaves outside the container subtree that carry
//! `custom_metric_*` tags. Each one contributes a `MetricSpec` to its target
//! container and a value sample buffered until a stats element recent enough
//! to hold it arrives. Values that can no longer be placed are discarded and
//! counted.

use super::BatchContext;
use crate::models::{Metric, MetricData, MetricFormat, MetricKind, MetricSpec, MetricVal};
use crate::objtree::{walk, Node, WalkAction};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

const CUSTOM_METRIC_NAME: &str = "custom_metric_name";
const CUSTOM_METRIC_TYPE: &str = "custom_metric_type";
const CUSTOM_METRIC_FORMAT: &str = "custom_metric_format";
const CUSTOM_METRIC_UNITS: &str = "custom_metric_units";
const CUSTOM_METRIC_CONTAINER_PATH: &str = "custom_metric_container_path";

const CUSTOM_TAGS: &[&str] = &[
    CUSTOM_METRIC_NAME,
    CUSTOM_METRIC_TYPE,
    CUSTOM_METRIC_FORMAT,
    CUSTOM_METRIC_UNITS,
    CUSTOM_METRIC_CONTAINER_PATH,
];

const DEF_CUSTOM_METRIC_UNITS: &str = "none";
const DEF_CUSTOM_METRIC_CONTAINER_PATH: &str = "/";

/// Specs extracted from one custom metric, paired with the value sample for
/// each (absent when the data could not be coerced to the spec format).
struct CustomExtraction {
    container_path: String,
    entries: Vec<(MetricSpec, Option<MetricVal>)>,
}

impl BatchContext<'_> {
    /// Scans the remaining object tree for metrics tagged as custom and
    /// ingests each of them.
    pub(crate) fn ingest_custom_metrics(&mut self, tree: &Node) {
        let mut custom_leaves: Vec<Metric> = Vec::new();
        walk(tree, &mut |_, info| {
            if let Some(metric) = info.node.as_leaf() {
                if is_custom_metric(metric) {
                    custom_leaves.push(metric.clone());
                }
            }
            WalkAction::Continue
        });
        for metric in custom_leaves {
            self.ingest_custom_metric(&metric);
        }
    }

    /// Materializes specs and values for one custom metric. Unknown target
    /// containers drop the metric; a custom metric never creates a container.
    fn ingest_custom_metric(&mut self, metric: &Metric) {
        let Some(extraction) = extract_custom_metrics(metric) else {
            return;
        };
        let Some(container) = self.memory.container_map.get_mut(&extraction.container_path)
        else {
            debug!(target: "processor::custom",
                container = %extraction.container_path, namespace = %metric.namespace,
                "dropping custom metric for unknown container");
            return;
        };
        let mut num_extracted = 0;
        for (spec, value) in extraction.entries {
            let known = container
                .spec
                .custom_metrics
                .iter()
                .any(|existing| existing.name == spec.name);
            if !known {
                container.spec.custom_metrics.push(spec.clone());
                self.custom_specs_rx += 1;
            }
            let Some(value) = value else {
                debug!(target: "processor::custom", metric_name = %spec.name,
                    "found no instance value for custom metric");
                continue;
            };
            self.memory
                .pending_metrics
                .entry(extraction.container_path.clone())
                .or_default()
                .entry(spec.name.clone())
                .or_default()
                .push(value);
            num_extracted += 1;
        }
        if num_extracted > 0 {
            debug!(target: "processor::custom", num_extracted, "extracted custom metrics");
        }
    }

    /// Flushes pending custom values into the stats of the container at
    /// `container_path`: each value moves into the oldest stats element whose
    /// timestamp is at or past the value's own.
    pub(crate) fn merge_custom_metrics_for(&mut self, container_path: &str) {
        let Some(pending) = self.memory.pending_metrics.get_mut(container_path) else {
            return;
        };
        let Some(container) = self.memory.container_map.get_mut(container_path) else {
            return;
        };
        for stats_elem in container.stats.iter_mut() {
            for (metric_name, values) in pending.iter_mut() {
                let mut still_pending = Vec::with_capacity(values.len());
                for value in values.drain(..) {
                    if value.timestamp <= stats_elem.timestamp {
                        stats_elem
                            .custom_metrics
                            .entry(metric_name.clone())
                            .or_default()
                            .push(value);
                        self.custom_values_rx += 1;
                    } else {
                        still_pending.push(value);
                    }
                }
                *values = still_pending;
            }
        }
    }

    /// Removes pending values that can never be flushed: anything strictly
    /// older than the oldest stats element still stored for the container.
    /// Kept values are collected into a fresh list; removed ones count as
    /// discarded.
    pub(crate) fn discard_too_old_custom_values_for(&mut self, container_path: &str) {
        let Some(pending) = self.memory.pending_metrics.get_mut(container_path) else {
            return;
        };
        let Some(container) = self.memory.container_map.get(container_path) else {
            return;
        };
        let Some(oldest) = container.stats.iter().map(|elem| elem.timestamp).min() else {
            return;
        };
        for values in pending.values_mut() {
            let num_before = values.len();
            let kept: Vec<MetricVal> = values
                .drain(..)
                .filter(|value| value.timestamp >= oldest)
                .collect();
            self.custom_values_dd += num_before - kept.len();
            *values = kept;
        }
    }
}

fn is_custom_metric(metric: &Metric) -> bool {
    CUSTOM_TAGS.iter().any(|tag| metric.tags.contains_key(*tag))
}

/// Extracts the target container path and one or more spec/value pairs from
/// a tagged metric. Map-shaped data expands into one entry per map key, the
/// spec name suffixed with that key.
fn extract_custom_metrics(metric: &Metric) -> Option<CustomExtraction> {
    if !is_custom_metric(metric) {
        return None;
    }
    let tags = &metric.tags;
    let base_name = tags
        .get(CUSTOM_METRIC_NAME)
        .cloned()
        .unwrap_or_else(|| namespace_name(&metric.namespace));
    let kind = parse_kind(tags.get(CUSTOM_METRIC_TYPE), &base_name);
    let format = parse_format(tags.get(CUSTOM_METRIC_FORMAT), &base_name);
    let units = tags
        .get(CUSTOM_METRIC_UNITS)
        .cloned()
        .unwrap_or_else(|| DEF_CUSTOM_METRIC_UNITS.to_string());
    let container_path = tags
        .get(CUSTOM_METRIC_CONTAINER_PATH)
        .cloned()
        .unwrap_or_else(|| DEF_CUSTOM_METRIC_CONTAINER_PATH.to_string());

    let entries = match &metric.data {
        MetricData::FloatMap(map) => map
            .iter()
            .map(|(key, value)| {
                let spec = MetricSpec {
                    name: format!("{base_name}/{key}"),
                    kind,
                    format,
                    units: units.clone(),
                };
                let value =
                    coerce_value(&spec, metric.timestamp, &MetricData::Float(*value));
                (spec, value)
            })
            .collect(),
        data => {
            let spec = MetricSpec {
                name: base_name,
                kind,
                format,
                units,
            };
            let value = coerce_value(&spec, metric.timestamp, data);
            vec![(spec, value)]
        }
    };

    Some(CustomExtraction {
        container_path,
        entries,
    })
}

/// Default spec name: the namespace segments joined with slashes.
fn namespace_name(namespace: &str) -> String {
    namespace
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_kind(tag: Option<&String>, metric_name: &str) -> MetricKind {
    match tag.map(String::as_str) {
        None | Some("gauge") => MetricKind::Gauge,
        Some("cumulative") => MetricKind::Cumulative,
        Some(other) => {
            warn!(target: "processor::custom", metric_name, kind = other,
                "unknown custom metric type, using gauge");
            MetricKind::Gauge
        }
    }
}

fn parse_format(tag: Option<&String>, metric_name: &str) -> MetricFormat {
    match tag.map(String::as_str) {
        None | Some("int") => MetricFormat::Int,
        Some("float") => MetricFormat::Float,
        Some(other) => {
            warn!(target: "processor::custom", metric_name, format = other,
                "unknown custom metric format, using int");
            MetricFormat::Int
        }
    }
}

/// Coerces raw data to the spec's declared format. Integer formats accept
/// any integer width; float formats accept integers and floats. Anything
/// else drops the value with a warning.
fn coerce_value(
    spec: &MetricSpec,
    timestamp: DateTime<Utc>,
    data: &MetricData,
) -> Option<MetricVal> {
    match spec.format {
        MetricFormat::Int => match data {
            MetricData::Int(v) => Some(MetricVal {
                timestamp,
                int_value: Some(*v),
                float_value: None,
            }),
            MetricData::Uint(v) => Some(MetricVal {
                timestamp,
                int_value: Some(*v as i64),
                float_value: None,
            }),
            other => {
                warn!(target: "processor::custom", metric_name = %spec.name, value = %other,
                    "custom metric cannot be handled as an int value");
                None
            }
        },
        MetricFormat::Float => match data {
            MetricData::Float(v) => Some(MetricVal {
                timestamp,
                int_value: None,
                float_value: Some(*v),
            }),
            MetricData::Int(v) => Some(MetricVal {
                timestamp,
                int_value: None,
                float_value: Some(*v as f64),
            }),
            MetricData::Uint(v) => Some(MetricVal {
                timestamp,
                int_value: None,
                float_value: Some(*v as f64),
            }),
            other => {
                warn!(target: "processor::custom", metric_name = %spec.name, value = %other,
                    "custom metric cannot be handled as a float value");
                None
            }
        },
    }
}
