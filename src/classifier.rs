//! Root / broken identifier (§4.3): classifies every in-degree-zero node
//! as virtual-root, real-root, broken, or plain root, and builds the
//! `traceId -> root node` map the rest of the pipeline relies on.

use std::collections::BTreeMap;

use crate::graph::Graph;

pub type TraceRootMap = BTreeMap<String, String>;

/// Classifies all in-degree-zero nodes in `graph` and returns
/// `traceIdToRootNodeMap` (first root encountered per trace-id, in
/// trace-id sorted order for determinism).
pub fn classify(graph: &mut Graph) -> TraceRootMap {
    let candidate_ids: Vec<String> = graph
        .node_ids()
        .filter(|id| graph.in_degree(id) == 0)
        .cloned()
        .collect();

    let mut trace_root_map: TraceRootMap = BTreeMap::new();

    let mut candidate_ids = candidate_ids;
    candidate_ids.sort();

    for node_id in &candidate_ids {
        let (is_virtual_root, is_real_root, parent_guid_present, trace_id) = {
            let node = graph.get(node_id).expect("candidate exists");
            let parent_present = node
                .parent_process_guid
                .as_ref()
                .map(|p| !p.is_empty())
                .unwrap_or(false);
            (
                node_id.starts_with("VIRTUAL_ROOT_PARENT_"),
                node.trace_id.as_deref() == Some(node_id.as_str()),
                parent_present,
                node.trace_id.clone(),
            )
        };

        if is_virtual_root {
            set_root(graph, node_id);
            if let Some(trace_id) = &trace_id {
                trace_root_map.entry(trace_id.clone()).or_insert_with(|| node_id.clone());
            }
            continue;
        }

        if is_real_root {
            set_root(graph, node_id);
            if let Some(trace_id) = &trace_id {
                trace_root_map.entry(trace_id.clone()).or_insert_with(|| node_id.clone());
            }
            continue;
        }

        if parent_guid_present {
            set_broken(graph, node_id);
            continue;
        }

        set_root(graph, node_id);
        if let Some(trace_id) = &trace_id {
            trace_root_map.entry(trace_id.clone()).or_insert_with(|| node_id.clone());
        }
    }

    trace_root_map
}

fn set_root(graph: &mut Graph, node_id: &str) {
    if let Some(node) = graph.get_mut(node_id) {
        node.is_root = true;
    }
    graph.reindex_node(node_id);
}

fn set_broken(graph: &mut Graph, node_id: &str) {
    if let Some(node) = graph.get_mut(node_id) {
        node.is_broken = true;
    }
    graph.reindex_node(node_id);
}
