//! Screens, transitions and functions of one or more merged automation packages.
//!
//! A [`NavGraph`] is built once per load and shared behind an `Arc`; loading
//! another package produces a new graph instead of mutating the shared one.

use crate::errors::AutomationError;
use crate::operation::Operation;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Coarse classification of a screen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    AppHome,
    ListPage,
    DetailPage,
    SearchPage,
    InputPage,
    Dialog,
    Other(String),
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "APP_HOME" => NodeType::AppHome,
            "LIST_PAGE" => NodeType::ListPage,
            "DETAIL_PAGE" => NodeType::DetailPage,
            "SEARCH_PAGE" => NodeType::SearchPage,
            "INPUT_PAGE" => NodeType::InputPage,
            "DIALOG" => NodeType::Dialog,
            _ => NodeType::Other(value),
        }
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::AppHome => "APP_HOME",
            NodeType::ListPage => "LIST_PAGE",
            NodeType::DetailPage => "DETAIL_PAGE",
            NodeType::SearchPage => "SEARCH_PAGE",
            NodeType::InputPage => "INPUT_PAGE",
            NodeType::Dialog => "DIALOG",
            NodeType::Other(other) => other,
        };
        f.write_str(s)
    }
}

/// A distinct, named UI state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub description: Option<String>,
    pub app_id: Option<String>,
    pub activity: Option<String>,
    pub node_type: NodeType,
    /// Elements that identify this screen when the activity alone is ambiguous
    /// or unavailable.
    pub anchors: Vec<Selector>,
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            name: name.into(),
            description: None,
            app_id: None,
            activity: None,
            node_type,
            anchors: Vec::new(),
        }
    }

    pub fn app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn anchor(mut self, selector: Selector) -> Self {
        self.anchors.push(selector);
        self
    }
}

/// A directed transition between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub operations: Vec<Operation>,
    pub validation: Option<Operation>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            operations,
            validation: None,
        }
    }

    pub fn with_validation(mut self, validation: Operation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn is_reset(&self) -> bool {
        self.operations
            .iter()
            .find_map(Operation::first_primitive)
            .is_some_and(Operation::is_reset)
    }

    pub fn parameter_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for op in self.operations.iter().chain(self.validation.iter()) {
            op.collect_parameter_keys(&mut keys);
        }
        keys
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A named automation goal: reach `target_node`, then run `operation` there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub description: String,
    pub target_node: String,
    pub operation: Operation,
}

impl Function {
    pub fn parameter_keys(&self) -> BTreeSet<String> {
        self.operation.parameter_keys()
    }
}

/// Public listing entry for a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
    pub target_node_name: String,
}

/// Immutable lookup structure for nodes, edges and functions.
///
/// Nodes and functions keep their definition order; re-defining a name
/// replaces the entry in place. Edges keep definition order, which the
/// pathfinder uses to break ties.
#[derive(Debug, Clone, Default)]
pub struct NavGraph {
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    functions: Vec<Function>,
    function_index: HashMap<String, usize>,
}

impl NavGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_node(&mut self, node: Node) -> Result<(), AutomationError> {
        if node.name.trim().is_empty() {
            return Err(AutomationError::ConfigLoad(
                "node name must not be empty".to_string(),
            ));
        }
        match self.node_index.get(&node.name) {
            Some(&idx) => {
                debug!(node = %node.name, "Replacing existing node definition");
                self.nodes[idx] = node;
            }
            None => {
                self.node_index.insert(node.name.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
        Ok(())
    }

    pub fn define_edge(&mut self, edge: Edge) -> Result<(), AutomationError> {
        self.check_edge(&edge)?;
        self.edges.push(edge);
        Ok(())
    }

    /// Referential checks an edge must pass before it can be added.
    pub fn check_edge(&self, edge: &Edge) -> Result<(), AutomationError> {
        for endpoint in [&edge.from, &edge.to] {
            if !self.contains_node(endpoint) {
                return Err(AutomationError::ConfigLoad(format!(
                    "edge {edge} references unknown node '{endpoint}'"
                )));
            }
        }
        if edge.operations.is_empty() {
            return Err(AutomationError::ConfigLoad(format!(
                "edge {edge} has no operations"
            )));
        }
        for op in edge.operations.iter().chain(edge.validation.iter()) {
            self.check_operation_refs(op)
                .map_err(|e| AutomationError::ConfigLoad(format!("edge {edge}: {e}")))?;
        }
        if let Some(validation) = &edge.validation {
            if !validation.is_validation() {
                return Err(AutomationError::ConfigLoad(format!(
                    "edge {edge} validation must be validate_state or validate_element, got {}",
                    validation.kind()
                )));
            }
        }
        Ok(())
    }

    pub fn define_function(&mut self, function: Function) -> Result<(), AutomationError> {
        if function.name.trim().is_empty() {
            return Err(AutomationError::ConfigLoad(
                "function name must not be empty".to_string(),
            ));
        }
        if !self.contains_node(&function.target_node) {
            return Err(AutomationError::ConfigLoad(format!(
                "function '{}' targets unknown node '{}'",
                function.name, function.target_node
            )));
        }
        self.check_operation_refs(&function.operation).map_err(|e| {
            AutomationError::ConfigLoad(format!("function '{}': {e}", function.name))
        })?;

        match self.function_index.get(&function.name) {
            Some(&idx) => {
                debug!(function = %function.name, "Replacing existing function definition");
                self.functions[idx] = function;
            }
            None => {
                self.function_index
                    .insert(function.name.clone(), self.functions.len());
                self.functions.push(function);
            }
        }
        Ok(())
    }

    fn check_operation_refs(&self, op: &Operation) -> Result<(), AutomationError> {
        match op
            .referenced_nodes()
            .into_iter()
            .find(|name| !self.contains_node(name))
        {
            Some(missing) => Err(AutomationError::UnknownNode(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Drops every edge whose `(from, to)` pair appears in `pairs`, keeping the
    /// relative order of the rest. Used when a merged package redefines a transition.
    pub(crate) fn remove_edges_between(&mut self, pairs: &HashSet<(String, String)>) {
        let before = self.edges.len();
        self.edges
            .retain(|e| !pairs.contains(&(e.from.clone(), e.to.clone())));
        let removed = before - self.edges.len();
        if removed > 0 {
            warn!(removed, "Merged package replaced existing edges");
        }
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.node_index.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.node_index.get(name).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges of `name` in definition order.
    pub fn edges_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == name)
    }

    pub fn reset_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.is_reset())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.function_index
            .get(name)
            .map(|&idx| &self.functions[idx])
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function_infos(&self) -> Vec<FunctionInfo> {
        self.functions
            .iter()
            .map(|f| FunctionInfo {
                name: f.name.clone(),
                description: f.description.clone(),
                target_node_name: f.target_node.clone(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> NavGraph {
        let mut g = NavGraph::new();
        g.define_node(Node::new("Home", NodeType::AppHome)).unwrap();
        g.define_node(Node::new("Chat", NodeType::DetailPage)).unwrap();
        g
    }

    #[test]
    fn edges_must_reference_known_nodes() {
        let mut g = graph();
        let ok = Edge::new("Home", "Chat", vec![Operation::click(Selector::text("Chats"))]);
        assert!(g.define_edge(ok).is_ok());

        let bad = Edge::new("Home", "Nowhere", vec![Operation::click(Selector::text("x"))]);
        assert!(matches!(
            g.define_edge(bad),
            Err(AutomationError::ConfigLoad(_))
        ));
        assert_eq!(g.edges().len(), 1);
    }

    #[test]
    fn validation_must_be_a_check() {
        let g = graph();
        let edge = Edge::new("Home", "Chat", vec![Operation::click(Selector::text("Chats"))])
            .with_validation(Operation::Wait { duration_ms: 10 });
        assert!(g.check_edge(&edge).is_err());

        let edge = Edge::new("Home", "Chat", vec![Operation::click(Selector::text("Chats"))])
            .with_validation(Operation::validate_state("Missing"));
        assert!(g.check_edge(&edge).is_err());
    }

    #[test]
    fn redefining_a_node_keeps_names_unique() {
        let mut g = graph();
        g.define_node(Node::new("Home", NodeType::ListPage).activity(".Main"))
            .unwrap();
        assert_eq!(g.nodes().len(), 2);
        assert_eq!(g.node("Home").unwrap().node_type, NodeType::ListPage);
        assert_eq!(g.nodes()[0].name, "Home");
    }

    #[test]
    fn functions_must_target_known_nodes() {
        let mut g = graph();
        let f = Function {
            name: "send".into(),
            description: "Send a message".into(),
            target_node: "Missing".into(),
            operation: Operation::click(Selector::text("Send")),
        };
        assert!(g.define_function(f).is_err());
        assert!(g.function_infos().is_empty());
    }

    #[test]
    fn node_type_round_trips_unknown_tags() {
        assert_eq!(NodeType::from("list_page".to_string()), NodeType::ListPage);
        let custom = NodeType::from("SETTINGS_PAGE".to_string());
        assert_eq!(custom, NodeType::Other("SETTINGS_PAGE".into()));
        assert_eq!(custom.to_string(), "SETTINGS_PAGE");
    }

    #[test]
    fn reset_edges_start_with_launch_or_kill() {
        let mut g = graph();
        g.define_edge(Edge::new("Home", "Home", vec![Operation::launch("com.chat")]))
            .unwrap();
        g.define_edge(Edge::new("Home", "Chat", vec![Operation::click(Selector::text("Chats"))]))
            .unwrap();
        assert_eq!(g.reset_edges().count(), 1);
    }
}
