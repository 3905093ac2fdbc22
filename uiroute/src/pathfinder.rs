//! Shortest routes over the navigation graph.
//!
//! Breadth-first search with uniform edge cost. Outgoing edges are expanded in
//! definition order and a node is claimed by the first edge that reaches it,
//! so equal-length alternatives always resolve to the same route.

use crate::errors::AutomationError;
use crate::graph::{Edge, NavGraph};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, instrument};

/// Label used for the synthetic start state when the current screen is unknown.
pub const RESET_STATE: &str = "<reset>";

/// Computes the route from `start` to `target`.
///
/// `start = None` means the current screen is unknown: the search then begins
/// at a synthetic reset state whose only exits are edges that start by
/// launching or killing an app.
#[instrument(level = "debug", skip(graph))]
pub fn find_route(
    graph: &NavGraph,
    start: Option<&str>,
    target: &str,
) -> Result<Vec<Edge>, AutomationError> {
    if !graph.contains_node(target) {
        return Err(AutomationError::UnknownNode(target.to_string()));
    }
    if let Some(start) = start {
        if !graph.contains_node(start) {
            return Err(AutomationError::UnknownNode(start.to_string()));
        }
        if start == target {
            return Ok(Vec::new());
        }
    }

    let edges = graph.edges();
    let mut adjacency: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        adjacency.entry(edge.from.as_str()).or_default().push(idx);
    }

    // node -> index of the edge that first reached it
    let mut reached_by: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    match start {
        Some(start) => {
            // Claim the start so cycles back to it are never taken.
            reached_by.insert(start, usize::MAX);
            queue.push_back(start);
        }
        None => {
            for (idx, edge) in edges.iter().enumerate().filter(|(_, e)| e.is_reset()) {
                if !reached_by.contains_key(edge.to.as_str()) {
                    reached_by.insert(edge.to.as_str(), idx);
                    queue.push_back(edge.to.as_str());
                }
            }
        }
    }

    while let Some(node) = queue.pop_front() {
        if node == target {
            break;
        }
        for &idx in adjacency.get(node).map(Vec::as_slice).unwrap_or_default() {
            let next = edges[idx].to.as_str();
            if !reached_by.contains_key(next) {
                reached_by.insert(next, idx);
                queue.push_back(next);
            }
        }
    }

    let from_label = start.unwrap_or(RESET_STATE);
    if !reached_by.contains_key(target) {
        return Err(AutomationError::NoPathFound {
            from: from_label.to_string(),
            to: target.to_string(),
        });
    }

    let mut route = Vec::new();
    let mut cursor = target;
    while let Some(&idx) = reached_by.get(cursor) {
        if idx == usize::MAX {
            break;
        }
        let edge = &edges[idx];
        route.push(edge.clone());
        // From the reset state every reset edge is a seed, so the walk ends there.
        if start.is_none() && edge.is_reset() {
            break;
        }
        cursor = edge.from.as_str();
    }
    route.reverse();

    debug!(
        from = from_label,
        to = target,
        hops = route.len(),
        "Computed route"
    );
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeType};
    use crate::operation::Operation;
    use crate::selector::Selector;
    use std::collections::HashSet;

    fn tap(label: &str) -> Vec<Operation> {
        vec![Operation::click(Selector::text(label))]
    }

    fn graph(nodes: &[&str], edges: &[(&str, &str, &str)]) -> NavGraph {
        let mut g = NavGraph::new();
        for n in nodes {
            g.define_node(Node::new(*n, NodeType::ListPage)).unwrap();
        }
        for (from, to, label) in edges {
            let ops = if label.starts_with("launch") {
                vec![Operation::launch("com.chat")]
            } else {
                tap(label)
            };
            g.define_edge(Edge::new(*from, *to, ops)).unwrap();
        }
        g
    }

    fn hops(route: &[Edge]) -> Vec<String> {
        route.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn finds_shortest_route() {
        let g = graph(
            &["Home", "Chats", "Chat", "Settings"],
            &[
                ("Home", "Settings", "gear"),
                ("Settings", "Chats", "back"),
                ("Home", "Chats", "chats"),
                ("Chats", "Chat", "row"),
            ],
        );
        let route = find_route(&g, Some("Home"), "Chat").unwrap();
        assert_eq!(hops(&route), vec!["Home -> Chats", "Chats -> Chat"]);
    }

    #[test]
    fn ties_resolve_by_definition_order() {
        let g = graph(
            &["A", "B", "C", "D"],
            &[
                ("A", "C", "first"),
                ("A", "B", "second"),
                ("B", "D", "via-b"),
                ("C", "D", "via-c"),
                ("A", "D", "direct-later"),
            ],
        );
        let route = find_route(&g, Some("A"), "D").unwrap();
        assert_eq!(hops(&route), vec!["A -> D"]);

        let g = graph(
            &["A", "B", "C", "D"],
            &[
                ("A", "C", "first"),
                ("A", "B", "second"),
                ("B", "D", "via-b"),
                ("C", "D", "via-c"),
            ],
        );
        let route = find_route(&g, Some("A"), "D").unwrap();
        assert_eq!(hops(&route), vec!["A -> C", "C -> D"]);
    }

    #[test]
    fn parallel_edges_pick_the_first_defined() {
        let g = graph(&["A", "B"], &[("A", "B", "one"), ("A", "B", "two")]);
        let route = find_route(&g, Some("A"), "B").unwrap();
        assert_eq!(route[0].operations, tap("one"));
    }

    #[test]
    fn start_equal_to_target_is_empty_route() {
        let g = graph(&["A"], &[]);
        assert!(find_route(&g, Some("A"), "A").unwrap().is_empty());
    }

    #[test]
    fn unknown_start_begins_with_a_reset_edge() {
        let g = graph(
            &["Home", "Chats", "Chat"],
            &[
                ("Home", "Chats", "chats"),
                ("Chats", "Chat", "row"),
                ("Chat", "Home", "launch"),
            ],
        );
        let route = find_route(&g, None, "Chat").unwrap();
        assert_eq!(
            hops(&route),
            vec!["Chat -> Home", "Home -> Chats", "Chats -> Chat"]
        );
        assert!(route[0].is_reset());
    }

    #[test]
    fn unknown_start_without_reset_edges_has_no_path() {
        let g = graph(&["Home", "Chats"], &[("Home", "Chats", "chats")]);
        assert_eq!(
            find_route(&g, None, "Chats").unwrap_err(),
            AutomationError::NoPathFound {
                from: RESET_STATE.into(),
                to: "Chats".into()
            }
        );
    }

    #[test]
    fn unreachable_target_and_unknown_nodes() {
        let g = graph(&["A", "B", "C"], &[("A", "B", "x"), ("C", "A", "y")]);
        assert!(matches!(
            find_route(&g, Some("A"), "C"),
            Err(AutomationError::NoPathFound { .. })
        ));
        assert!(matches!(
            find_route(&g, Some("A"), "Z"),
            Err(AutomationError::UnknownNode(_))
        ));
    }

    /// Reference all-pairs distances for random graphs.
    fn distances(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<Option<usize>>> {
        let mut dist = vec![vec![None; n]; n];
        for (i, row) in dist.iter_mut().enumerate() {
            row[i] = Some(0);
        }
        for &(a, b) in edges {
            if a != b {
                dist[a][b] = Some(1);
            }
        }
        for k in 0..n {
            for i in 0..n {
                for j in 0..n {
                    if let (Some(ik), Some(kj)) = (dist[i][k], dist[k][j]) {
                        if dist[i][j].map_or(true, |d| ik + kj < d) {
                            dist[i][j] = Some(ik + kj);
                        }
                    }
                }
            }
        }
        dist
    }

    #[test]
    fn routes_are_shortest_and_never_repeat_nodes() {
        // Small deterministic LCG so the test needs no extra crates.
        let mut seed: u64 = 0x5eed;
        let mut next = |bound: usize| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as usize) % bound
        };

        for _ in 0..40 {
            let n = 2 + next(7);
            let m = next(n * 3);
            let names: Vec<String> = (0..n).map(|i| format!("N{i}")).collect();
            let mut raw = Vec::new();
            let mut g = NavGraph::new();
            for name in &names {
                g.define_node(Node::new(name.clone(), NodeType::ListPage)).unwrap();
            }
            for _ in 0..m {
                let (a, b) = (next(n), next(n));
                raw.push((a, b));
                g.define_edge(Edge::new(names[a].clone(), names[b].clone(), tap("go")))
                    .unwrap();
            }
            let dist = distances(n, &raw);

            for s in 0..n {
                for t in 0..n {
                    match (find_route(&g, Some(&names[s]), &names[t]), dist[s][t]) {
                        (Ok(route), Some(d)) => {
                            assert_eq!(route.len(), d);
                            let mut seen = HashSet::new();
                            seen.insert(names[s].clone());
                            let mut at = names[s].clone();
                            for edge in &route {
                                assert_eq!(edge.from, at);
                                assert!(seen.insert(edge.to.clone()), "node repeated");
                                at = edge.to.clone();
                            }
                            assert_eq!(at, names[t]);
                        }
                        (Err(AutomationError::NoPathFound { .. }), None) => {}
                        (other, d) => panic!("mismatch: {other:?} vs distance {d:?}"),
                    }
                }
            }
        }
    }
}
