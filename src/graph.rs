//! Directed graph primitive: adjacency lists over [`crate::model::Node`]s,
//! labeled edges, subgraph extraction, and depth-bounded traversal.
//!
//! Grounded on `examples/other_examples/…bones-core-src-dag-graph.rs.rs`'s
//! `EventDag` (hash-keyed nodes, bidirectional adjacency, lazy link
//! resolution on insert) generalized from an event-DAG to a process/entity
//! graph with labeled edges, a richer secondary index, and cycle-safe
//! depth-bounded walks (Design Notes "Cyclic risk").

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{Edge, Node, NodeIndex};

pub const MAX_TRAVERSE_DEPTH: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    outgoing: HashMap<String, Vec<Edge>>,
    incoming: HashMap<String, Vec<Edge>>,
    pub index: NodeIndex,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.outgoing.values().flatten()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(|v| v.len()).sum()
    }

    /// Inserts `node` if absent, or returns the existing node for the
    /// caller to mutate. `nodeId` is never empty here (§3 invariant);
    /// upstream callers are responsible for that check.
    pub fn upsert_node(&mut self, node: Node) -> &mut Node {
        self.nodes.entry(node.node_id.clone()).or_insert(node)
    }

    /// Re-syncs the secondary index for one node. Call after mutating a
    /// node in place (e.g. after flipping `is_root`).
    pub fn reindex_node(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get(node_id).cloned() {
            self.index.note_node(&node);
        }
    }

    pub fn reindex_all(&mut self) {
        let snapshot: Vec<Node> = self.nodes.values().cloned().collect();
        self.index = NodeIndex::default();
        for node in &snapshot {
            self.index.note_node(node);
        }
    }

    /// Adds `parent -> child` with `label`. Self-loops are rejected unless
    /// either endpoint is virtual or an Explore node (§3: "self-loops on
    /// virtual/explore nodes logged but permitted"). Duplicate
    /// `(source,target)` pairs are no-ops.
    pub fn add_edge(&mut self, source: &str, target: &str, label: &str) {
        if source == target {
            let permitted = self
                .nodes
                .get(source)
                .map(|n| n.virtual_ || n.node_type == crate::model::NodeType::Explore)
                .unwrap_or(false);
            if !permitted {
                return;
            }
            eprintln!(
                "【graph】self-loop permitted on virtual/explore node {}",
                source
            );
        }
        let out = self.outgoing.entry(source.to_string()).or_default();
        if out.iter().any(|e| e.target == target) {
            return;
        }
        out.push(Edge::new(source, target, label));
        self.incoming
            .entry(target.to_string())
            .or_default()
            .push(Edge::new(source, target, label));
    }

    pub fn outgoing_of(&self, node_id: &str) -> &[Edge] {
        self.outgoing.get(node_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn incoming_of(&self, node_id: &str) -> &[Edge] {
        self.incoming.get(node_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn in_degree(&self, node_id: &str) -> usize {
        self.incoming_of(node_id).len()
    }

    pub fn out_degree(&self, node_id: &str) -> usize {
        self.outgoing_of(node_id).len()
    }

    /// Removes a node and cascades removal of all incident edges.
    pub fn remove_node(&mut self, node_id: &str) {
        if self.nodes.remove(node_id).is_none() {
            return;
        }
        self.outgoing.remove(node_id);
        self.incoming.remove(node_id);
        for edges in self.outgoing.values_mut() {
            edges.retain(|e| e.target != node_id);
        }
        for edges in self.incoming.values_mut() {
            edges.retain(|e| e.source != node_id);
        }
        self.index.forget_node(node_id);
    }

    pub fn remove_edge(&mut self, source: &str, target: &str) {
        if let Some(edges) = self.outgoing.get_mut(source) {
            edges.retain(|e| e.target != target);
        }
        if let Some(edges) = self.incoming.get_mut(target) {
            edges.retain(|e| e.source != source);
        }
    }

    /// Extracts the induced subgraph over `ids`: every retained node plus
    /// exactly the edges whose both endpoints are in `ids`.
    pub fn induced_subgraph(&self, ids: &HashSet<String>) -> Graph {
        let mut sub = Graph::new();
        for id in ids {
            if let Some(node) = self.nodes.get(id) {
                sub.upsert_node(node.clone());
            }
        }
        for edge in self.edges() {
            if ids.contains(&edge.source) && ids.contains(&edge.target) {
                sub.add_edge(&edge.source, &edge.target, &edge.label);
            }
        }
        sub.reindex_all();
        sub
    }

    /// Depth-bounded walk up the parent chain from `start`, visited-set
    /// guarded. Returns every node reached, including `start`.
    pub fn walk_ancestors(&self, start: &str, max_depth: usize) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::new();
        frontier.push_back((start.to_string(), 0usize));
        seen.insert(start.to_string());
        while let Some((id, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self.incoming_of(&id) {
                if seen.insert(edge.source.clone()) {
                    frontier.push_back((edge.source.clone(), depth + 1));
                }
            }
        }
        seen
    }

    /// Depth-bounded walk down the child chain from `start`, visited-set
    /// guarded. Returns every node reached, including `start`.
    pub fn walk_descendants(&self, start: &str, max_depth: usize) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::new();
        frontier.push_back((start.to_string(), 0usize));
        seen.insert(start.to_string());
        while let Some((id, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in self.outgoing_of(&id) {
                if seen.insert(edge.target.clone()) {
                    frontier.push_back((edge.target.clone(), depth + 1));
                }
            }
        }
        seen
    }

    /// Full connected tree containing `start`: ancestors union descendants,
    /// each bounded by `max_depth` (§4.4).
    pub fn connected_tree(&self, start: &str, max_depth: usize) -> HashSet<String> {
        let mut tree = self.walk_ancestors(start, max_depth);
        tree.extend(self.walk_descendants(start, max_depth));
        tree
    }

    /// Single-chain walk from `root` following, at each step, only the
    /// lexicographically smallest child id (no branching). Used by the
    /// force pruner's deterministic DFS (§4.7 step 3c).
    pub fn single_chain_from(&self, root: &str) -> Vec<String> {
        let mut chain = vec![root.to_string()];
        let mut visited: HashSet<String> = chain.iter().cloned().collect();
        let mut current = root.to_string();
        loop {
            let mut candidates: Vec<&Edge> = self.outgoing_of(&current).iter().collect();
            candidates.sort_by(|a, b| a.target.cmp(&b.target));
            match candidates.into_iter().find(|e| !visited.contains(&e.target)) {
                Some(edge) => {
                    visited.insert(edge.target.clone());
                    chain.push(edge.target.clone());
                    current = edge.target.clone();
                }
                None => break,
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    fn proc(id: &str) -> Node {
        Node::new_process(id, false)
    }

    #[test]
    fn upsert_is_idempotent_by_id() {
        let mut g = Graph::new();
        g.upsert_node(proc("a"));
        g.upsert_node(proc("a"));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn add_edge_rejects_duplicates_and_self_loops_on_real_nodes() {
        let mut g = Graph::new();
        g.upsert_node(proc("a"));
        g.upsert_node(proc("b"));
        g.add_edge("a", "b", Edge::LABEL_PROCESS_CREATE);
        g.add_edge("a", "b", Edge::LABEL_PROCESS_CREATE);
        g.add_edge("a", "a", Edge::LABEL_PROCESS_CREATE);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn self_loop_permitted_on_virtual_node() {
        let mut g = Graph::new();
        g.upsert_node(Node::new_process("v", true));
        g.add_edge("v", "v", Edge::LABEL_PROCESS_CREATE);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn remove_node_cascades_edges() {
        let mut g = Graph::new();
        g.upsert_node(proc("a"));
        g.upsert_node(proc("b"));
        g.add_edge("a", "b", Edge::LABEL_PROCESS_CREATE);
        g.remove_node("b");
        assert_eq!(g.edge_count(), 0);
        assert!(g.outgoing_of("a").is_empty());
    }

    #[test]
    fn induced_subgraph_keeps_only_internal_edges() {
        let mut g = Graph::new();
        g.upsert_node(proc("a"));
        g.upsert_node(proc("b"));
        g.upsert_node(proc("c"));
        g.add_edge("a", "b", Edge::LABEL_PROCESS_CREATE);
        g.add_edge("b", "c", Edge::LABEL_PROCESS_CREATE);
        let ids: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let sub = g.induced_subgraph(&ids);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.edge_count(), 1);
    }

    #[test]
    fn single_chain_follows_lexicographically_smallest_child() {
        let mut g = Graph::new();
        for id in ["r", "b", "a", "z"] {
            g.upsert_node(proc(id));
        }
        g.add_edge("r", "b", Edge::LABEL_PROCESS_CREATE);
        g.add_edge("r", "a", Edge::LABEL_PROCESS_CREATE);
        g.add_edge("a", "z", Edge::LABEL_PROCESS_CREATE);
        let chain = g.single_chain_from("r");
        assert_eq!(chain, vec!["r".to_string(), "a".to_string(), "z".to_string()]);
    }
}
