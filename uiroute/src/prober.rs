//! Maps a live snapshot onto a known node.
//!
//! Matching order:
//! 1. exact `(app, activity)` match, anchors break ties between screens that
//!    share an activity (a node is never picked when none of its anchors are
//!    on screen);
//! 2. structural match on anchor elements alone;
//! 3. [`ProbedState::Unknown`].
//!
//! "No match" is an ordinary outcome, not an error.

use crate::errors::AutomationError;
use crate::graph::{NavGraph, Node};
use crate::platforms::UiStateQuery;
use crate::state::UiSnapshot;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, trace};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Confidence {
    Exact,
    /// Share of the node's anchors present on screen, in `(0, 1]`.
    Structural { score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbedState {
    Known { node: String, confidence: Confidence },
    Unknown,
}

impl ProbedState {
    pub fn node_name(&self) -> Option<&str> {
        match self {
            ProbedState::Known { node, .. } => Some(node),
            ProbedState::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ProbedState::Known { .. })
    }

    pub fn is_node(&self, name: &str) -> bool {
        self.node_name() == Some(name)
    }
}

impl fmt::Display for ProbedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node_name().unwrap_or("Unknown"))
    }
}

/// A snapshot together with the node it resolved to.
#[derive(Debug, Clone)]
pub struct Probe {
    pub state: ProbedState,
    pub snapshot: UiSnapshot,
}

#[derive(Debug, Clone)]
pub struct StateProber {
    structural_threshold: f64,
    timeout: Duration,
}

impl StateProber {
    pub fn new(structural_threshold: f64, timeout: Duration) -> Self {
        Self {
            structural_threshold,
            timeout,
        }
    }

    /// Reads the live state and resolves it against `graph`.
    #[instrument(level = "debug", skip_all)]
    pub async fn probe(
        &self,
        graph: &NavGraph,
        query: &dyn UiStateQuery,
    ) -> Result<Probe, AutomationError> {
        let snapshot = tokio::time::timeout(self.timeout, query.get_current_state())
            .await
            .map_err(|_| {
                AutomationError::Timeout(format!(
                    "reading UI state took longer than {:?}",
                    self.timeout
                ))
            })??;
        let state = self.resolve(graph, &snapshot);
        debug!(
            app = %snapshot.app_id,
            screen = %snapshot.screen_id,
            %state,
            "Probed live state"
        );
        Ok(Probe { state, snapshot })
    }

    /// Pure matching step of [`StateProber::probe`].
    pub fn resolve(&self, graph: &NavGraph, snapshot: &UiSnapshot) -> ProbedState {
        if let Some((node, confidence)) = self.exact_match(graph, snapshot) {
            return ProbedState::Known {
                node: node.name.clone(),
                confidence,
            };
        }
        if let Some((node, score)) = self.structural_match(graph, snapshot) {
            return ProbedState::Known {
                node: node.name.clone(),
                confidence: Confidence::Structural { score },
            };
        }
        ProbedState::Unknown
    }

    fn exact_match<'g>(
        &self,
        graph: &'g NavGraph,
        snapshot: &UiSnapshot,
    ) -> Option<(&'g Node, Confidence)> {
        let candidates: Vec<&Node> = graph
            .nodes()
            .iter()
            .filter(|n| same_app(n, snapshot))
            .filter(|n| {
                n.activity
                    .as_deref()
                    .is_some_and(|a| activity_matches(&snapshot.screen_id, a))
            })
            .collect();

        match candidates.as_slice() {
            [] => None,
            [only] => Some((*only, Confidence::Exact)),
            many => {
                trace!(count = many.len(), "Several nodes share this activity");
                // Most specific node with every anchor on screen first.
                if let Some(node) = many
                    .iter()
                    .filter(|n| !n.anchors.is_empty() && anchor_score(n, snapshot) >= 1.0)
                    .max_by_key(|n| (n.anchors.len(), std::cmp::Reverse(position(graph, n))))
                {
                    return Some((*node, Confidence::Exact));
                }
                // Then the node with the best partial anchor score, earliest on ties.
                let mut best: Option<(&Node, f64)> = None;
                for node in many.iter() {
                    let score = anchor_score(node, snapshot);
                    if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                        best = Some((*node, score));
                    }
                }
                if let Some((node, score)) = best {
                    return Some((node, Confidence::Structural { score }));
                }
                // No anchor is on screen: only an anchor-less node can claim it.
                many.iter()
                    .find(|n| n.anchors.is_empty())
                    .map(|n| (*n, Confidence::Exact))
            }
        }
    }

    fn structural_match<'g>(
        &self,
        graph: &'g NavGraph,
        snapshot: &UiSnapshot,
    ) -> Option<(&'g Node, f64)> {
        let mut best: Option<(&Node, f64)> = None;
        for node in graph.nodes().iter().filter(|n| !n.anchors.is_empty()) {
            if !same_app(node, snapshot) {
                continue;
            }
            let score = anchor_score(node, snapshot);
            if score < self.structural_threshold || score == 0.0 {
                continue;
            }
            // Strictly greater keeps the earliest definition on ties.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((node, score));
            }
        }
        best
    }
}

fn same_app(node: &Node, snapshot: &UiSnapshot) -> bool {
    node.app_id
        .as_deref()
        .map_or(true, |app| app == snapshot.app_id)
}

/// `.MainActivity` matches `com.app.MainActivity`.
fn activity_matches(screen_id: &str, activity: &str) -> bool {
    screen_id == activity || (activity.starts_with('.') && screen_id.ends_with(activity))
}

fn anchor_score(node: &Node, snapshot: &UiSnapshot) -> f64 {
    if node.anchors.is_empty() {
        return 0.0;
    }
    let present = node
        .anchors
        .iter()
        .filter(|a| a.find_in(snapshot).is_some())
        .count();
    present as f64 / node.anchors.len() as f64
}

fn position(graph: &NavGraph, node: &Node) -> usize {
    graph
        .nodes()
        .iter()
        .position(|n| n.name == node.name)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;
    use crate::selector::Selector;
    use crate::state::UiElement;

    fn prober() -> StateProber {
        StateProber::new(0.6, Duration::from_secs(1))
    }

    fn graph() -> NavGraph {
        let mut g = NavGraph::new();
        g.define_node(
            Node::new("Home", NodeType::AppHome)
                .app("com.chat")
                .activity(".MainActivity"),
        )
        .unwrap();
        g.define_node(
            Node::new("ChatList", NodeType::ListPage)
                .app("com.chat")
                .activity(".TabActivity")
                .anchor(Selector::id("chat_list")),
        )
        .unwrap();
        g.define_node(
            Node::new("Contacts", NodeType::ListPage)
                .app("com.chat")
                .activity(".TabActivity")
                .anchor(Selector::id("contact_list"))
                .anchor(Selector::text("Contacts")),
        )
        .unwrap();
        g.define_node(
            Node::new("Compose", NodeType::InputPage)
                .app("com.chat")
                .anchor(Selector::id("message_box"))
                .anchor(Selector::desc("Send")),
        )
        .unwrap();
        g
    }

    #[test]
    fn exact_match_on_app_and_activity() {
        let snap = UiSnapshot::new("com.chat", "com.chat.MainActivity");
        let state = prober().resolve(&graph(), &snap);
        assert_eq!(
            state,
            ProbedState::Known {
                node: "Home".into(),
                confidence: Confidence::Exact
            }
        );
    }

    #[test]
    fn anchors_disambiguate_shared_activity() {
        let snap = UiSnapshot::new("com.chat", "com.chat.TabActivity").with_elements(vec![
            UiElement::with_id("com.chat:id/contact_list"),
            UiElement::with_text("Contacts"),
        ]);
        assert!(prober().resolve(&graph(), &snap).is_node("Contacts"));

        let snap = UiSnapshot::new("com.chat", "com.chat.TabActivity")
            .with_elements(vec![UiElement::with_id("com.chat:id/chat_list")]);
        assert!(prober().resolve(&graph(), &snap).is_node("ChatList"));
    }

    #[test]
    fn shared_activity_follows_the_anchors_that_are_present() {
        let snap = UiSnapshot::new("com.chat", "com.chat.TabActivity")
            .with_elements(vec![UiElement::with_id("com.chat:id/contact_list")]);
        assert_eq!(
            prober().resolve(&graph(), &snap),
            ProbedState::Known {
                node: "Contacts".into(),
                confidence: Confidence::Structural { score: 0.5 }
            }
        );

        // Neither tab's anchors are visible, so the screen cannot be named.
        let snap = UiSnapshot::new("com.chat", "com.chat.TabActivity");
        assert_eq!(prober().resolve(&graph(), &snap), ProbedState::Unknown);
    }

    #[test]
    fn anchorless_node_takes_a_shared_activity_without_anchors_on_screen() {
        let mut g = graph();
        g.define_node(
            Node::new("Tabs", NodeType::Other("tabs".into()))
                .app("com.chat")
                .activity(".TabActivity"),
        )
        .unwrap();
        let snap = UiSnapshot::new("com.chat", "com.chat.TabActivity");
        assert!(prober().resolve(&g, &snap).is_node("Tabs"));

        let snap = UiSnapshot::new("com.chat", "com.chat.TabActivity")
            .with_elements(vec![UiElement::with_id("com.chat:id/chat_list")]);
        assert!(prober().resolve(&g, &snap).is_node("ChatList"));
    }

    #[test]
    fn structural_match_when_activity_is_unknown() {
        let snap = UiSnapshot::new("com.chat", "com.chat.SomethingElse").with_elements(vec![
            UiElement::with_id("com.chat:id/message_box"),
            UiElement::default().desc("Send"),
        ]);
        match prober().resolve(&graph(), &snap) {
            ProbedState::Known {
                node,
                confidence: Confidence::Structural { score },
            } => {
                assert_eq!(node, "Compose");
                assert!((score - 1.0).abs() < f64::EPSILON);
            }
            other => panic!("expected structural match, got {other:?}"),
        }
    }

    #[test]
    fn below_threshold_or_other_app_is_unknown() {
        let snap = UiSnapshot::new("com.chat", "com.chat.SomethingElse")
            .with_elements(vec![UiElement::with_id("com.chat:id/message_box")]);
        assert_eq!(prober().resolve(&graph(), &snap), ProbedState::Unknown);

        let snap = UiSnapshot::new("com.other", "com.chat.MainActivity");
        assert_eq!(prober().resolve(&graph(), &snap), ProbedState::Unknown);
        assert_eq!(ProbedState::Unknown.to_string(), "Unknown");
    }
}
