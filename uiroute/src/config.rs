//! JSON automation packages and how they are merged into a [`NavGraph`].
//!
//! A package looks like:
//!
//! ```json
//! {
//!   "appName": "Chat",
//!   "packageName": "com.example.chat",
//!   "description": "Messaging flows",
//!   "nodes": [{"name": "Home", "activityName": ".MainActivity", "nodeType": "APP_HOME"}],
//!   "edges": [{"from": "Home", "to": "Chats", "operations": [{"type": "click", "selector": "text:Chats"}]}],
//!   "functions": [{"name": "open_chats", "description": "Open chat list",
//!                  "targetNodeName": "Chats", "operation": {"type": "wait", "durationMs": 100}}]
//! }
//! ```
//!
//! Entries are decoded one by one: a malformed node, edge or function is
//! logged and skipped, the rest of the package still loads.

use crate::errors::AutomationError;
use crate::graph::{Edge, Function, NavGraph, Node, NodeType};
use crate::operation::Operation;
use crate::selector::{deserialize_selectors, Selector};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument, warn};

/// One automation package as read from disk. Entries stay as raw JSON until
/// [`load_package`] decodes them individually.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
    #[serde(default)]
    pub functions: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    activity_name: Option<String>,
    #[serde(default)]
    package_name: Option<String>,
    node_type: NodeType,
    #[serde(default, deserialize_with = "deserialize_selectors")]
    anchors: Vec<Selector>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeEntry {
    from: String,
    to: String,
    operations: Vec<Operation>,
    #[serde(default)]
    validation: Option<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionEntry {
    name: String,
    #[serde(default)]
    description: String,
    target_node_name: String,
    operation: Operation,
}

impl AutomationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, AutomationError> {
        serde_json::from_str(json)
            .map_err(|e| AutomationError::ConfigLoad(format!("package is not valid JSON: {e}")))
    }

    pub fn from_value(value: Value) -> Result<Self, AutomationError> {
        serde_json::from_value(value)
            .map_err(|e| AutomationError::ConfigLoad(format!("package has invalid shape: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::ConfigLoad(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    pub fn display_name(&self) -> &str {
        if !self.app_name.is_empty() {
            &self.app_name
        } else if !self.package_name.is_empty() {
            &self.package_name
        } else {
            "<unnamed package>"
        }
    }
}

/// Which section of a package an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Node,
    Edge,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub kind: EntryKind,
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reason: String,
}

/// Outcome of loading one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub package: String,
    pub nodes_loaded: usize,
    pub edges_loaded: usize,
    pub functions_loaded: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, kind: EntryKind, index: usize, raw: &Value, error: AutomationError) {
        let name = entry_label(kind, raw);
        warn!(
            package = %self.package,
            ?kind,
            index,
            name = name.as_deref().unwrap_or("?"),
            "Skipping malformed entry: {error}"
        );
        self.skipped.push(SkippedEntry {
            kind,
            index,
            name,
            reason: error.to_string(),
        });
    }
}

fn entry_label(kind: EntryKind, raw: &Value) -> Option<String> {
    match kind {
        EntryKind::Node | EntryKind::Function => {
            raw.get("name").and_then(Value::as_str).map(str::to_string)
        }
        EntryKind::Edge => {
            let from = raw.get("from").and_then(Value::as_str)?;
            let to = raw.get("to").and_then(Value::as_str)?;
            Some(format!("{from} -> {to}"))
        }
    }
}

fn decode<T: DeserializeOwned>(raw: &Value) -> Result<T, AutomationError> {
    T::deserialize(raw).map_err(|e| AutomationError::ConfigLoad(e.to_string()))
}

/// Applies `config` on top of `base` and returns the resulting graph.
///
/// With `base` empty this is a plain load. Otherwise later definitions win:
/// a node or function with an existing name replaces it, and the package's
/// edges replace every existing edge with the same `(from, to)` pair.
#[instrument(skip_all, fields(package = %config.display_name()))]
pub fn load_package(base: &NavGraph, config: &AutomationConfig) -> (NavGraph, LoadReport) {
    let mut graph = base.clone();
    let mut report = LoadReport {
        package: config.display_name().to_string(),
        ..Default::default()
    };

    for (index, raw) in config.nodes.iter().enumerate() {
        let result = decode::<NodeEntry>(raw).and_then(|entry| {
            let app_id = entry.package_name.or_else(|| {
                (!config.package_name.is_empty()).then(|| config.package_name.clone())
            });
            graph.define_node(Node {
                name: entry.name,
                description: entry.description,
                app_id,
                activity: entry.activity_name,
                node_type: entry.node_type,
                anchors: entry.anchors,
            })
        });
        match result {
            Ok(()) => report.nodes_loaded += 1,
            Err(e) => report.skip(EntryKind::Node, index, raw, e),
        }
    }

    // Edges are validated against the updated node set first, then swapped in
    // as a block so replaced pairs disappear together.
    let mut accepted = Vec::new();
    for (index, raw) in config.edges.iter().enumerate() {
        let result = decode::<EdgeEntry>(raw).and_then(|entry| {
            let edge = Edge {
                from: entry.from,
                to: entry.to,
                operations: entry.operations,
                validation: entry.validation,
            };
            graph.check_edge(&edge).map(|_| edge)
        });
        match result {
            Ok(edge) => accepted.push(edge),
            Err(e) => report.skip(EntryKind::Edge, index, raw, e),
        }
    }
    let pairs: HashSet<(String, String)> = accepted
        .iter()
        .map(|e| (e.from.clone(), e.to.clone()))
        .collect();
    graph.remove_edges_between(&pairs);
    for edge in accepted {
        match graph.define_edge(edge) {
            Ok(()) => report.edges_loaded += 1,
            Err(e) => warn!("Edge rejected after validation: {e}"),
        }
    }

    for (index, raw) in config.functions.iter().enumerate() {
        let result = decode::<FunctionEntry>(raw).and_then(|entry| {
            graph.define_function(Function {
                name: entry.name,
                description: entry.description,
                target_node: entry.target_node_name,
                operation: entry.operation,
            })
        });
        match result {
            Ok(()) => report.functions_loaded += 1,
            Err(e) => report.skip(EntryKind::Function, index, raw, e),
        }
    }

    info!(
        nodes = report.nodes_loaded,
        edges = report.edges_loaded,
        functions = report.functions_loaded,
        skipped = report.skipped.len(),
        "Loaded automation package"
    );
    (graph, report)
}
