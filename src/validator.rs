//! Validator (§4.11): the final pass before emit. Strips dangling,
//! self-loop (non-virtual), and duplicate edges, then breaks simple
//! 2-cycles by a fixed priority rule.

use std::collections::HashSet;

use crate::graph::Graph;
use crate::model::Edge;

fn edge_priority(graph: &Graph, edge: &Edge) -> u8 {
    if let Some(source) = graph.get(&edge.source) {
        if source.is_alarm {
            return 3;
        }
        if source.is_root {
            return 2;
        }
    }
    if edge.label == Edge::LABEL_NET_TO_ENDPOINT {
        return 1;
    }
    0
}

/// Removes edges with empty/dangling endpoints, self-loops on non-virtual
/// non-explore nodes, and duplicate `(source, target)` pairs (keeping the
/// first occurrence), per §4.11 first clause.
fn strip_malformed_edges(graph: &mut Graph) {
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    let mut to_remove: Vec<(String, String)> = Vec::new();

    let mut edges: Vec<Edge> = graph.edges().cloned().collect();
    edges.sort_by(|a, b| (a.source.clone(), a.target.clone()).cmp(&(b.source.clone(), b.target.clone())));

    for edge in &edges {
        if edge.source.is_empty() || edge.target.is_empty() {
            to_remove.push((edge.source.clone(), edge.target.clone()));
            continue;
        }
        if !graph.contains(&edge.source) || !graph.contains(&edge.target) {
            to_remove.push((edge.source.clone(), edge.target.clone()));
            continue;
        }
        if edge.source == edge.target {
            let permitted = graph
                .get(&edge.source)
                .map(|n| n.virtual_ || n.node_type == crate::model::NodeType::Explore)
                .unwrap_or(false);
            if !permitted {
                to_remove.push((edge.source.clone(), edge.target.clone()));
                continue;
            }
        }
        let pair = (edge.source.clone(), edge.target.clone());
        if !seen_pairs.insert(pair.clone()) {
            to_remove.push(pair);
        }
    }

    for (source, target) in to_remove {
        graph.remove_edge(&source, &target);
    }
}

/// Detects simple `A -> B` / `B -> A` cycles and removes the
/// lower-priority edge, tiebreaking on the larger source id, per §4.11
/// second clause.
fn break_two_cycles(graph: &mut Graph) {
    let edges: Vec<Edge> = graph.edges().cloned().collect();
    let mut handled: HashSet<(String, String)> = HashSet::new();

    for edge in &edges {
        let forward = (edge.source.clone(), edge.target.clone());
        let backward = (edge.target.clone(), edge.source.clone());
        if handled.contains(&forward) || handled.contains(&backward) {
            continue;
        }
        let has_reverse = graph
            .outgoing_of(&edge.target)
            .iter()
            .any(|e| e.target == edge.source);
        if !has_reverse {
            continue;
        }

        let reverse_edge = graph
            .outgoing_of(&edge.target)
            .iter()
            .find(|e| e.target == edge.source)
            .cloned()
            .expect("has_reverse confirmed it exists");

        let forward_priority = edge_priority(graph, edge);
        let backward_priority = edge_priority(graph, &reverse_edge);

        let drop = if forward_priority != backward_priority {
            if forward_priority < backward_priority {
                edge.clone()
            } else {
                reverse_edge.clone()
            }
        } else if edge.source > reverse_edge.source {
            edge.clone()
        } else {
            reverse_edge.clone()
        };

        graph.remove_edge(&drop.source, &drop.target);
        handled.insert(forward);
        handled.insert(backward);
    }
}

/// Runs the validator pass, per §4.11.
pub fn validate(graph: &mut Graph) {
    strip_malformed_edges(graph);
    break_two_cycles(graph);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    fn proc(id: &str) -> Node {
        Node::new_process(id, false)
    }

    #[test]
    fn dangling_edge_is_removed() {
        let mut graph = Graph::new();
        graph.upsert_node(proc("a"));
        graph.add_edge("a", "ghost", Edge::LABEL_PROCESS_CREATE);
        validate(&mut graph);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn self_loop_on_real_node_is_removed_but_virtual_kept() {
        let mut graph = Graph::new();
        graph.upsert_node(proc("a"));
        graph.upsert_node(Node::new_process("v", true));
        // self loops bypass add_edge's own rejection via direct insertion
        // path exercised through the graph's public API (virtual allowed).
        graph.add_edge("v", "v", Edge::LABEL_PROCESS_CREATE);
        validate(&mut graph);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.outgoing_of("v").iter().any(|e| e.target == "v"));
    }

    #[test]
    fn two_cycle_broken_by_root_priority() {
        let mut graph = Graph::new();
        let mut a = proc("a");
        a.is_root = true;
        graph.upsert_node(a);
        graph.upsert_node(proc("b"));
        graph.add_edge("a", "b", Edge::LABEL_PROCESS_CREATE);
        graph.add_edge("b", "a", Edge::LABEL_PROCESS_CREATE);
        validate(&mut graph);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.outgoing_of("a").iter().any(|e| e.target == "b"));
    }

    #[test]
    fn two_cycle_tiebreak_drops_larger_source_id() {
        let mut graph = Graph::new();
        graph.upsert_node(proc("a"));
        graph.upsert_node(proc("z"));
        graph.add_edge("a", "z", Edge::LABEL_PROCESS_CREATE);
        graph.add_edge("z", "a", Edge::LABEL_PROCESS_CREATE);
        validate(&mut graph);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.outgoing_of("a").iter().any(|e| e.target == "z"));
    }
}
