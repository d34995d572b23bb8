//! Typed reads over freeform metric subtrees
//!
//! Ingesters look up named fields inside rebuilt branches and coerce them to
//! concrete types with a default on mismatch. An [`ExtractScope`] accumulates
//! the first error seen under a human-readable context tag so a whole subtree
//! produces at most one warning.

use crate::models::{Metric, MetricData};
use crate::objtree::Node;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// View over a branch whose children are metric leaves.
#[derive(Clone, Copy)]
pub struct MetricFields<'a> {
    map: &'a BTreeMap<String, Node>,
}

impl<'a> MetricFields<'a> {
    /// Wraps an interior branch node; `None` for leaves and lists.
    pub fn from_node(node: &'a Node) -> Option<Self> {
        node.as_branch().map(|map| Self { map })
    }

    /// Raw data of the leaf child named `key`, if present.
    pub fn get(&self, key: &str) -> Option<&'a MetricData> {
        match self.map.get(key)? {
            Node::Leaf(metric) => Some(&metric.data),
            _ => None,
        }
    }

    /// Collapses one level of `{key: {"value": leaf}}` wrapping, mapping each
    /// key to the wrapped leaf's metric. Children that already are leaves map
    /// directly; anything else is skipped.
    pub fn flatten_values(&self) -> BTreeMap<&'a str, &'a Metric> {
        let mut flat = BTreeMap::new();
        for (key, child) in self.map {
            match child {
                Node::Leaf(metric) => {
                    flat.insert(key.as_str(), metric);
                }
                Node::Branch(inner) => {
                    if let Some(Node::Leaf(metric)) = inner.get("value") {
                        flat.insert(key.as_str(), metric);
                    }
                }
                Node::List(_) => {}
            }
        }
        flat
    }
}

/// Scoped extractor: reads `(name, default)` pairs out of a [`MetricFields`]
/// view, keeping the first coercion error per scope. Missing fields are
/// silent; only type mismatches are recorded.
pub struct ExtractScope {
    context: String,
    first_error: Option<String>,
}

impl ExtractScope {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            first_error: None,
        }
    }

    /// Retags the scope; the tracked error keeps the tag it was recorded under.
    pub fn enter(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn record(&mut self, message: impl fmt::Display) {
        if self.first_error.is_none() {
            self.first_error = Some(format!("{}: {}", self.context, message));
        }
    }

    pub fn first_error(&self) -> Option<&str> {
        self.first_error.as_deref()
    }

    /// Emits one warning for the scope if any extraction failed.
    pub fn log_warnings(&self) {
        if let Some(error) = &self.first_error {
            tracing::warn!(target: "processor", error = %error,
                "could not read all incoming fields, used defaults");
        }
    }

    /// Unsigned read; accepts only `u64`-shaped leaves.
    pub fn get_u64(&mut self, fields: MetricFields<'_>, key: &str, default: u64) -> u64 {
        match fields.get(key) {
            None => default,
            Some(MetricData::Uint(v)) => *v,
            Some(other) => {
                self.record(format!("field '{key}' is not a u64 (got {other})"));
                default
            }
        }
    }

    pub fn get_str(&mut self, fields: MetricFields<'_>, key: &str, default: &str) -> String {
        match fields.get(key) {
            None => default.to_string(),
            Some(MetricData::Str(v)) => v.clone(),
            Some(other) => {
                self.record(format!("field '{key}' is not a string (got {other})"));
                default.to_string()
            }
        }
    }

    /// Reads an ISO-8601 timestamp carried as a string leaf.
    pub fn get_time(
        &mut self,
        fields: MetricFields<'_>,
        key: &str,
        default: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match fields.get(key) {
            None => default,
            Some(MetricData::Str(v)) => match DateTime::parse_from_rfc3339(v) {
                Ok(parsed) => parsed.with_timezone(&Utc),
                Err(err) => {
                    self.record(format!("field '{key}' does not parse as time: {err}"));
                    default
                }
            },
            Some(other) => {
                self.record(format!("field '{key}' is not a time string (got {other})"));
                default
            }
        }
    }
}
