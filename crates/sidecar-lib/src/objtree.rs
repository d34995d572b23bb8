//! Object-tree reconstruction and traversal
//!
//! Incoming batches are flat lists of `(namespace, value)` tuples. This
//! module rebuilds them into a nested tree keyed by path segment and offers
//! the traversal primitives the ingesters work with:
//! - `rebuild` turns a batch into a tree
//! - `walk` visits nodes depth-first in deterministic order
//! - `seek` / `remove` locate or detach a subtree by path
//! - `prune_empty` drops interior nodes left empty after extraction

use crate::models::Metric;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A `/`-joined metric namespace split into its segments.
///
/// Paths order lexicographically element by element, a shorter prefix coming
/// before any of its extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub literal: String,
    pub segments: Vec<String>,
}

impl ObjectPath {
    pub fn new(literal: impl Into<String>) -> Self {
        let literal = literal.into();
        let segments = split_path(&literal);
        Self { literal, segments }
    }
}

impl PartialOrd for ObjectPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

/// One node of a rebuilt metric tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// Interior node keyed by path segment.
    Branch(BTreeMap<String, Node>),
    /// Interior node keyed by decimal index.
    List(Vec<Node>),
    /// Leaf carrying the originating metric record.
    Leaf(Metric),
}

impl Node {
    pub fn empty() -> Self {
        Node::Branch(BTreeMap::new())
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Branch(_) | Node::List(_))
    }

    pub fn as_branch(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Branch(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Metric> {
        match self {
            Node::Leaf(metric) => Some(metric),
            _ => None,
        }
    }
}

/// Outcome of a visitor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    /// Skip the children of the node just visited.
    SkipSubtree,
}

/// Borrowed view of a visited node.
pub struct NodeInfo<'a> {
    /// Basename of the node's path; `/` for the root.
    pub name: &'a str,
    pub is_dir: bool,
    pub node: &'a Node,
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_path(base: &str, segment: &str) -> String {
    if base == "/" {
        format!("/{segment}")
    } else {
        format!("{base}/{segment}")
    }
}

/// Basename of a slash-separated path; the root maps to itself.
pub fn basename(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit('/').next() {
        Some("") | None => "/",
        Some(base) => base,
    }
}

/// Rebuilds a nested tree from a flat batch of metrics.
///
/// Paths are sorted first, then every metric is attached as a leaf under its
/// basename, creating interior branches as needed. A later metric whose path
/// collides with an existing node replaces it.
pub fn rebuild(mut metrics: Vec<Metric>) -> Node {
    metrics.sort_by_cached_key(|m| ObjectPath::new(m.namespace.as_str()).segments);
    let mut root = BTreeMap::new();
    for metric in metrics {
        let segments = split_path(&metric.namespace);
        let Some((last, parents)) = segments.split_last() else {
            tracing::debug!(target: "processor", namespace = %metric.namespace,
                "ignoring metric addressed at tree root");
            continue;
        };
        let mut cursor = &mut root;
        for segment in parents {
            let entry = cursor
                .entry(segment.clone())
                .or_insert_with(Node::empty);
            if !matches!(entry, Node::Branch(_)) {
                *entry = Node::empty();
            }
            match entry {
                Node::Branch(map) => cursor = map,
                _ => unreachable!("entry was just made a branch"),
            }
        }
        cursor.insert(last.clone(), Node::Leaf(metric));
    }
    Node::Branch(root)
}

/// Visits `root` and all nodes below it, depth-first, children in key order.
/// The visitor receives the node's full path and may skip a subtree.
pub fn walk<F>(root: &Node, visit: &mut F)
where
    F: FnMut(&str, NodeInfo<'_>) -> WalkAction,
{
    walk_inner(root, "/", visit);
}

/// Like [`walk`] but starts at the subtree located at `path`; reported paths
/// are rooted at that prefix. Returns `false` if the path does not exist.
pub fn walk_from<F>(root: &Node, path: &str, visit: &mut F) -> bool
where
    F: FnMut(&str, NodeInfo<'_>) -> WalkAction,
{
    match seek(root, path) {
        Some(node) => {
            walk_inner(node, path, visit);
            true
        }
        None => false,
    }
}

fn walk_inner<F>(node: &Node, path: &str, visit: &mut F)
where
    F: FnMut(&str, NodeInfo<'_>) -> WalkAction,
{
    let info = NodeInfo {
        name: basename(path),
        is_dir: node.is_dir(),
        node,
    };
    let action = visit(path, info);
    if action == WalkAction::SkipSubtree {
        return;
    }
    match node {
        Node::Branch(map) => {
            for (key, child) in map {
                walk_inner(child, &join_path(path, key), visit);
            }
        }
        Node::List(items) => {
            for (index, child) in items.iter().enumerate() {
                walk_inner(child, &join_path(path, &index.to_string()), visit);
            }
        }
        Node::Leaf(_) => {}
    }
}

/// Locates the subtree at `path`, descending branch keys and list indices.
pub fn seek<'a>(root: &'a Node, path: &str) -> Option<&'a Node> {
    let mut cursor = root;
    for segment in split_path(path) {
        cursor = match cursor {
            Node::Branch(map) => map.get(&segment)?,
            Node::List(items) => items.get(segment.parse::<usize>().ok()?)?,
            Node::Leaf(_) => return None,
        };
    }
    Some(cursor)
}

/// Detaches and returns the subtree at `path`. Only branch parents support
/// removal; the root itself cannot be detached.
pub fn remove(root: &mut Node, path: &str) -> Option<Node> {
    let segments = split_path(path);
    let (last, parents) = segments.split_last()?;
    let mut cursor = root;
    for segment in parents {
        cursor = match cursor {
            Node::Branch(map) => map.get_mut(segment)?,
            _ => return None,
        };
    }
    match cursor {
        Node::Branch(map) => map.remove(last),
        _ => None,
    }
}

/// Removes empty interior nodes bottom-up so a subtree extraction leaves no
/// hollow skeleton behind. The root node itself is retained even when empty.
pub fn prune_empty(node: &mut Node) {
    match node {
        Node::Branch(map) => {
            for child in map.values_mut() {
                prune_empty(child);
            }
            map.retain(|_, child| !is_empty_dir(child));
        }
        Node::List(items) => {
            for child in items.iter_mut() {
                prune_empty(child);
            }
            items.retain(|child| !is_empty_dir(child));
        }
        Node::Leaf(_) => {}
    }
}

fn is_empty_dir(node: &Node) -> bool {
    match node {
        Node::Branch(map) => map.is_empty(),
        Node::List(items) => items.is_empty(),
        Node::Leaf(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricData;
    use chrono::Utc;

    fn metric(namespace: &str) -> Metric {
        Metric {
            namespace: namespace.to_string(),
            timestamp: Utc::now(),
            tags: Default::default(),
            data: MetricData::Uint(1),
        }
    }

    fn all_paths(root: &Node) -> Vec<String> {
        let mut paths = Vec::new();
        walk(root, &mut |path, _| {
            paths.push(path.to_string());
            WalkAction::Continue
        });
        paths
    }

    #[test]
    fn object_path_orders_element_wise() {
        let mut paths: Vec<ObjectPath> = ["/b/b/d", "/b/d", "/a/b/c", "/b", "/b/b/c"]
            .iter()
            .map(|p| ObjectPath::new(*p))
            .collect();
        paths.sort();
        let literals: Vec<&str> = paths.iter().map(|p| p.literal.as_str()).collect();
        assert_eq!(literals, vec!["/a/b/c", "/b", "/b/b/c", "/b/b/d", "/b/d"]);
    }

    #[test]
    fn rebuild_reflects_all_namespaces() {
        let batch = vec![
            metric("/uno/1"),
            metric("/uno/2"),
            metric("/foo"),
            metric("/hop/lol/bonk"),
            metric("/hop/rotfl"),
        ];
        let root = rebuild(batch);
        assert_eq!(
            all_paths(&root),
            vec![
                "/",
                "/foo",
                "/hop",
                "/hop/lol",
                "/hop/lol/bonk",
                "/hop/rotfl",
                "/uno",
                "/uno/1",
                "/uno/2",
            ]
        );
    }

    #[test]
    fn rebuild_then_walk_round_trips_sorted_paths() {
        let mut input = vec!["/b/b/c", "/a", "/b/d", "/c/x/y", "/c/x/z"];
        let root = rebuild(input.iter().map(|p| metric(p)).collect());
        input.sort();
        let leaves: Vec<String> = {
            let mut acc = Vec::new();
            walk(&root, &mut |path, info| {
                if !info.is_dir {
                    acc.push(path.to_string());
                }
                WalkAction::Continue
            });
            acc
        };
        assert_eq!(leaves, input);
    }

    #[test]
    fn walk_reports_dir_flags_and_names() {
        let root = rebuild(vec![metric("/hop/lol/bonk"), metric("/foo")]);
        let mut dirs = Vec::new();
        let mut names = Vec::new();
        walk(&root, &mut |path, info| {
            names.push(info.name.to_string());
            if info.is_dir {
                dirs.push(path.to_string());
            }
            WalkAction::Continue
        });
        assert_eq!(dirs, vec!["/", "/hop", "/hop/lol"]);
        assert_eq!(names, vec!["/", "foo", "hop", "lol", "bonk"]);
    }

    #[test]
    fn walk_skips_subtree_on_request() {
        let root = rebuild(vec![metric("/hop/lol/bonk"), metric("/uno/1")]);
        let mut seen = Vec::new();
        walk(&root, &mut |path, info| {
            seen.push(path.to_string());
            if info.is_dir && path == "/hop" {
                WalkAction::SkipSubtree
            } else {
                WalkAction::Continue
            }
        });
        assert_eq!(seen, vec!["/", "/hop", "/uno", "/uno/1"]);
    }

    #[test]
    fn seek_finds_subtrees_and_reports_missing() {
        let root = rebuild(vec![metric("/hop/lol/bonk"), metric("/foo")]);
        assert!(seek(&root, "/hop/lol").is_some());
        assert!(seek(&root, "/hop/lol/bonk").unwrap().as_leaf().is_some());
        assert!(seek(&root, "/tres").is_none());
        assert!(seek(&root, "/").is_some());
    }

    #[test]
    fn walk_from_starts_at_prefix() {
        let root = rebuild(vec![metric("/intel/docker/abc/stats/x")]);
        let mut seen = Vec::new();
        let found = walk_from(&root, "/intel/docker", &mut |path, _| {
            seen.push(path.to_string());
            WalkAction::Continue
        });
        assert!(found);
        assert_eq!(seen[0], "/intel/docker");
        assert!(seen.contains(&"/intel/docker/abc/stats/x".to_string()));
        assert!(!walk_from(&root, "/missing", &mut |_, _| WalkAction::Continue));
    }

    #[test]
    fn remove_detaches_subtree_and_prune_clears_skeleton() {
        let mut root = rebuild(vec![
            metric("/intel/docker/abc/stats/x"),
            metric("/foo/custom"),
        ]);
        let taken = remove(&mut root, "/intel/docker").expect("subtree exists");
        assert!(seek(&taken, "/abc/stats/x").is_some());
        prune_empty(&mut root);
        assert_eq!(all_paths(&root), vec!["/", "/foo", "/foo/custom"]);
    }

    #[test]
    fn prune_empty_is_idempotent() {
        let mut root = rebuild(vec![metric("/a/b/c"), metric("/d")]);
        remove(&mut root, "/a/b/c");
        prune_empty(&mut root);
        let once = all_paths(&root);
        prune_empty(&mut root);
        assert_eq!(all_paths(&root), once);
        assert_eq!(once, vec!["/", "/d"]);
    }

    #[test]
    fn basename_of_root_is_root() {
        assert_eq!(basename("/"), "/");
        assert_eq!(basename("/a/b"), "b");
        assert_eq!(basename("/a"), "a");
    }
}
