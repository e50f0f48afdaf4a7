//! Explore-root synthesizer (§4.8): traces that retained broken nodes but
//! never got a real or virtual root (because pruning or force-pruning cut
//! the root away, or none existed) get a synthetic `EXPLORE_ROOT_<traceId>`
//! wired to every one of that trace's broken nodes, so the UI always has
//! somewhere to anchor the chain.

use crate::classifier::TraceRootMap;
use crate::graph::Graph;
use crate::model::{Edge, Node, NodeContent};

fn explore_root_id(trace_id: &str) -> String {
    format!("EXPLORE_ROOT_{}", trace_id)
}

/// Synthesizes an explore root for every trace that has broken nodes but
/// no entry in `trace_root_map`, wiring it to each of that trace's broken
/// nodes and recording it in the map. Mutates `graph` and `trace_root_map`
/// in place.
pub fn synthesize_explore_roots(graph: &mut Graph, trace_root_map: &mut TraceRootMap) {
    let broken_by_trace: std::collections::BTreeMap<String, Vec<String>> = {
        let mut map: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();
        for node_id in graph.index.broken.clone() {
            if let Some(node) = graph.get(&node_id) {
                if let Some(trace_id) = &node.trace_id {
                    map.entry(trace_id.clone()).or_default().push(node_id.clone());
                }
            }
        }
        map
    };

    for (trace_id, mut broken_ids) in broken_by_trace {
        if trace_root_map.contains_key(&trace_id) {
            continue;
        }
        broken_ids.sort();

        let root_id = explore_root_id(&trace_id);
        let mut explore_node = Node::new_entity(root_id.clone(), crate::model::NodeType::Explore, NodeContent::Explore);
        explore_node.trace_id = Some(trace_id.clone());
        explore_node.is_root = true;
        if let Some(host) = broken_ids
            .first()
            .and_then(|id| graph.get(id))
            .and_then(|n| n.host_address.clone())
        {
            explore_node.host_address = Some(host);
        }
        graph.upsert_node(explore_node);
        graph.reindex_node(&root_id);

        for broken_id in &broken_ids {
            graph.add_edge(&root_id, broken_id, Edge::LABEL_PROCESS_CREATE);
        }

        trace_root_map.insert(trace_id, root_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_raw_graph;
    use crate::classifier::classify;
    use crate::model::RawLog;

    fn log(guid: &str, parent: &str, trace: &str) -> RawLog {
        RawLog {
            event_id: format!("E_{}", guid),
            trace_id: trace.to_string(),
            host_address: "10.0.0.1".to_string(),
            process_guid: guid.to_string(),
            parent_process_guid: parent.to_string(),
            log_type: "process".to_string(),
            ..Default::default()
        }
    }

    // S2 — broken chain with no root gets an explore root.
    #[test]
    fn broken_trace_without_root_gets_explore_root() {
        let logs = vec![log("M", "P", "T1"), log("N", "M", "T1")];
        let mut graph = build_raw_graph(&[], &logs);
        let mut roots = classify(&mut graph);
        assert!(roots.get("T1").is_none());

        synthesize_explore_roots(&mut graph, &mut roots);

        let explore_id = "EXPLORE_ROOT_T1".to_string();
        assert_eq!(roots.get("T1"), Some(&explore_id));
        assert!(graph.contains(&explore_id));
        assert!(graph.outgoing_of(&explore_id).iter().any(|e| e.target == "M"));
        assert!(graph.get(&explore_id).unwrap().is_root);
    }

    #[test]
    fn trace_with_existing_root_is_left_untouched() {
        let logs = vec![log("R", "", "T1"), log("C", "R", "T1")];
        let mut graph = build_raw_graph(&[], &logs);
        let mut roots = classify(&mut graph);
        let before = roots.clone();
        synthesize_explore_roots(&mut graph, &mut roots);
        assert_eq!(roots, before);
        assert!(!graph.contains("EXPLORE_ROOT_T1"));
    }
}
