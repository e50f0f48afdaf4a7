//! Graph builder (§4.2): assembles the process-only DAG from alarms and
//! process logs, deferring entity materialization to [`crate::entities`].
//!
//! Grounded on `ai_analysis.rs::build_process_lineage`'s parent-map /
//! transitive-closure style, generalized from "find the relevant PID set"
//! into "build the full parent→child graph, synthesizing virtual parents
//! for anything referenced but never observed directly."

use crate::graph::Graph;
use crate::model::{virtual_root_parent_id, Edge, Node, RawAlarm, RawLog};

const ENTITY_LOG_TYPES: &[&str] = &["file", "domain", "network", "registry"];

fn owning_process_node<'g>(graph: &'g mut Graph, process_guid: &str) -> &'g mut Node {
    if !graph.contains(process_guid) {
        graph.upsert_node(Node::new_process(process_guid.to_string(), false));
    }
    graph.get_mut(process_guid).expect("just inserted")
}

fn note_parent(node: &mut Node, parent_process_guid: &str) {
    if parent_process_guid.is_empty() {
        return;
    }
    if node.parent_process_guid.is_none() {
        node.parent_process_guid = Some(parent_process_guid.to_string());
    }
}

/// Builds the raw process DAG from `alarms` and `logs` per §4.2.
pub fn build_raw_graph(alarms: &[RawAlarm], logs: &[RawLog]) -> Graph {
    let mut graph = Graph::new();

    for alarm in alarms {
        if alarm.process_guid.is_empty() {
            continue;
        }
        let parent_guid = alarm.parent_process_guid.clone();
        let node = owning_process_node(&mut graph, &alarm.process_guid);
        note_parent(node, &parent_guid);
        node.record_alarm(alarm.clone());
    }

    for log in logs {
        if log.process_guid.is_empty() {
            continue;
        }
        let parent_guid = log.parent_process_guid.clone();
        let is_process_log = log.log_type == "process";
        let node = owning_process_node(&mut graph, &log.process_guid);
        if is_process_log {
            note_parent(node, &parent_guid);
        }
        // Entity-typed logs stay attached to the owning process node's log
        // list; they are materialized into entity nodes later by C8.
        let was_synthetic = node.synthetic && node.logs.is_empty() && node.alarms.is_empty();
        node.record_log(log.clone(), false);
        if was_synthetic {
            node.synthetic = false;
        }
    }

    synthesize_virtual_parents(&mut graph);
    wire_parent_edges(&mut graph);
    graph.reindex_all();
    graph
}

/// Synthesizes a virtual parent **only** for the root self-reference edge
/// case (`processGuid == parentProcessGuid`). An ordinary missing parent
/// (child references a `parentProcessGuid` for which no record of any kind
/// exists) is deliberately left unresolved here: that child stays in-degree
/// zero with a non-empty `parentProcessGuid`, which is exactly the signal
/// the root/broken identifier (C5 rule 3) uses to mark it `isBroken` — and
/// downstream, the explore synthesizer gives its trace a synthetic root
/// (§4.8, S2). Synthesizing a stand-in node here for every missing parent
/// would make that branch unreachable.
fn synthesize_virtual_parents(graph: &mut Graph) {
    let pending: Vec<(String, String)> = graph
        .nodes()
        .filter_map(|n| {
            n.parent_process_guid
                .as_ref()
                .map(|p| (n.node_id.clone(), p.clone()))
        })
        .filter(|(child_id, parent)| !parent.is_empty() && parent == child_id)
        .collect();

    for (child_id, parent_guid) in pending {
        let virtual_id = virtual_root_parent_id(&parent_guid);
        if graph.contains(&virtual_id) {
            continue;
        }
        let mut virtual_node = Node::new_process(virtual_id.clone(), true);
        virtual_node.synthetic = true;
        // Carry the child's trace/host so the index can still find this
        // node by the same dimensions once classified (§9 "Sticky fields"
        // does not apply to synthesized nodes — they are not real records).
        if let Some(child) = graph.get(&child_id) {
            virtual_node.trace_id = child.trace_id.clone();
            virtual_node.host_address = child.host_address.clone();
        }
        graph.upsert_node(virtual_node);
    }
}

fn wire_parent_edges(graph: &mut Graph) {
    let edges: Vec<(String, String)> = graph
        .nodes()
        .filter_map(|n| {
            let parent = n.parent_process_guid.clone()?;
            if parent.is_empty() {
                return None;
            }
            // Root self-reference: the synthesized virtual parent, not the
            // child itself, resolves the edge (§4.2). An ordinary missing
            // parent resolves to itself and simply won't be present in the
            // graph, so the edge add below is a no-op and the child stays
            // broken for the classifier to find.
            let resolved = if parent == n.node_id {
                virtual_root_parent_id(&parent)
            } else {
                parent
            };
            Some((resolved, n.node_id.clone()))
        })
        .collect();

    for (parent, child) in edges {
        if parent == child {
            continue;
        }
        if graph.contains(&parent) && graph.contains(&child) {
            graph.add_edge(&parent, &child, Edge::LABEL_PROCESS_CREATE);
        }
    }
}

/// Returns true if `log_type` denotes an entity-producing record rather
/// than a process-lifecycle record (used by C8).
pub fn is_entity_log_type(log_type: &str) -> bool {
    ENTITY_LOG_TYPES.contains(&log_type)
}
