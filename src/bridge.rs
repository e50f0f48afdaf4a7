//! Network bridge & role corrector (§4.10): splices a separately-supplied
//! network-side "story" graph onto the endpoint process-chain graph under
//! each victim's host root, then corrects attacker/victim mislabeling
//! driven by a risk incident's `focusObject`/`targetIp`.

use std::collections::{HashSet, VecDeque};

use crate::classifier::TraceRootMap;
use crate::errors::{log_stage_error, StageError};
use crate::graph::Graph;
use crate::model::{Edge, Node, NodeContent, NodeType, StoryPayload, StoryRole};

/// One node of the supplied network-side story graph.
#[derive(Debug, Clone)]
pub struct StoryNodeInput {
    pub node_id: String,
    pub role: StoryRole,
    pub ip: String,
    pub story_node_type: String,
}

#[derive(Debug, Clone)]
pub struct StoryEdgeInput {
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct NetworkGraphInput {
    pub nodes: Vec<StoryNodeInput>,
    pub edges: Vec<StoryEdgeInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusObject {
    Attacker,
    Victim,
}

#[derive(Debug, Clone)]
pub struct Incident {
    pub focus_object: FocusObject,
    pub target_ip: String,
}

const ASSET_ADDRESS_TYPE: &str = "assetAddress";
const SRC_NODE_TYPE: &str = "srcNode";

fn flip(role: StoryRole) -> StoryRole {
    match role {
        StoryRole::Attacker => StoryRole::Victim,
        StoryRole::Victim => StoryRole::Attacker,
        other => other,
    }
}

fn role_matches(role: StoryRole, focus: FocusObject) -> bool {
    matches!(
        (role, focus),
        (StoryRole::Attacker, FocusObject::Attacker) | (StoryRole::Victim, FocusObject::Victim)
    )
}

fn role_literal(role: StoryRole) -> &'static str {
    match role {
        StoryRole::Attacker => "attacker",
        StoryRole::Victim => "victim",
        StoryRole::Server => "server",
        StoryRole::Relay => "relay",
    }
}

/// Inserts the story graph's nodes/edges into `graph` as `Story`-typed
/// nodes, unmodified.
fn splice_story_graph(graph: &mut Graph, network: &NetworkGraphInput) {
    for n in &network.nodes {
        let mut node = Node::new_entity(
            n.node_id.clone(),
            NodeType::Story,
            NodeContent::Story(StoryPayload {
                role: n.role,
                ip: n.ip.clone(),
                story_node_type: n.story_node_type.clone(),
            }),
        );
        node.is_alarm = false;
        graph.upsert_node(node);
        graph.reindex_node(&n.node_id);
    }
    for e in &network.edges {
        graph.add_edge(&e.source, &e.target, &e.label);
    }
}

/// Connects every victim story node whose ip resolves to a known endpoint
/// host to that host's trace root, per §4.10 step 1.
fn bridge_victims_to_roots(graph: &mut Graph, trace_root_map: &TraceRootMap) {
    let victims: Vec<(String, String)> = graph
        .nodes()
        .filter(|n| matches!(&n.content, NodeContent::Story(p) if p.role == StoryRole::Victim))
        .filter_map(|n| match &n.content {
            NodeContent::Story(p) => Some((n.node_id.clone(), p.ip.clone())),
            _ => None,
        })
        .collect();

    for (victim_id, ip) in victims {
        let host_node_ids = match graph.index.by_host.get(&ip) {
            Some(ids) => ids.clone(),
            None => {
                log_stage_error(
                    "bridge",
                    &StageError::BridgeTargetMissing(format!(
                        "victim {} ip {} matches no known endpoint host",
                        victim_id, ip
                    )),
                );
                continue;
            }
        };
        let trace_id = host_node_ids
            .iter()
            .filter_map(|id| graph.get(id).and_then(|n| n.trace_id.clone()))
            .next();
        let root_id = match trace_id.and_then(|t| trace_root_map.get(&t).cloned()) {
            Some(r) => r,
            None => {
                log_stage_error(
                    "bridge",
                    &StageError::BridgeTargetMissing(format!(
                        "victim {} ip {} resolved a host but no trace root was found",
                        victim_id, ip
                    )),
                );
                continue;
            }
        };
        graph.add_edge(&victim_id, &root_id, Edge::LABEL_NET_TO_ENDPOINT);
    }
}

/// Removes `old_id` and reinserts the same content under `new_id`,
/// rewriting every incident edge's endpoint. No-op if `old_id == new_id`
/// or `old_id` is absent.
fn rename_node(graph: &mut Graph, old_id: &str, new_id: &str) {
    if old_id == new_id || !graph.contains(old_id) {
        return;
    }
    let mut node = graph.get(old_id).expect("checked contains").clone();
    let outgoing: Vec<Edge> = graph.outgoing_of(old_id).to_vec();
    let incoming: Vec<Edge> = graph.incoming_of(old_id).to_vec();

    graph.remove_node(old_id);
    node.node_id = new_id.to_string();
    graph.upsert_node(node);
    graph.reindex_node(new_id);

    for e in outgoing {
        graph.add_edge(new_id, &e.target, &e.label);
    }
    for e in incoming {
        if e.source == old_id {
            continue;
        }
        graph.add_edge(&e.source, new_id, &e.label);
    }
}

fn set_role(graph: &mut Graph, node_id: &str, role: StoryRole) {
    if let Some(node) = graph.get_mut(node_id) {
        if let NodeContent::Story(payload) = &mut node.content {
            payload.role = role;
        }
    }
}

fn story_ip(graph: &Graph, node_id: &str) -> Option<String> {
    graph.get(node_id).and_then(|n| match &n.content {
        NodeContent::Story(p) => Some(p.ip.clone()),
        _ => None,
    })
}

fn story_role(graph: &Graph, node_id: &str) -> Option<StoryRole> {
    graph.get(node_id).and_then(|n| match &n.content {
        NodeContent::Story(p) => Some(p.role),
        _ => None,
    })
}

/// Propagates a role flip to every story node reachable from `start` via
/// an incident edge, currently attacker/victim, whose ip differs from
/// `target_ip` — stopping at nodes already matching `target_ip` since
/// those represent the corrected focus itself (§4.10 step 2).
fn propagate_flip(graph: &mut Graph, start: &str, target_ip: &str) {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    visited.insert(start.to_string());
    queue.push_back(start.to_string());

    while let Some(current) = queue.pop_front() {
        let neighbors: Vec<String> = graph
            .outgoing_of(&current)
            .iter()
            .map(|e| e.target.clone())
            .chain(graph.incoming_of(&current).iter().map(|e| e.source.clone()))
            .collect();

        for next in neighbors {
            if !visited.insert(next.clone()) {
                continue;
            }
            let role = story_role(graph, &next);
            let ip = story_ip(graph, &next);
            if let (Some(role), Some(ip)) = (role, ip) {
                if matches!(role, StoryRole::Attacker | StoryRole::Victim) && ip != target_ip {
                    set_role(graph, &next, flip(role));
                    queue.push_back(next);
                }
            }
        }
    }
}

/// Flips isolated `assetAddress`-typed story nodes (no incident edges)
/// that carry the opposite role to `focus_object` (§4.10 step 2, final
/// clause).
fn flip_isolated_asset_addresses(graph: &mut Graph, focus_object: FocusObject) {
    let candidates: Vec<String> = graph
        .nodes()
        .filter(|n| matches!(&n.content, NodeContent::Story(p) if p.story_node_type == ASSET_ADDRESS_TYPE))
        .map(|n| n.node_id.clone())
        .collect();

    for id in candidates {
        if !graph.outgoing_of(&id).is_empty() || !graph.incoming_of(&id).is_empty() {
            continue;
        }
        if let Some(role) = story_role(graph, &id) {
            if matches!(role, StoryRole::Attacker | StoryRole::Victim) && !role_matches(role, focus_object) {
                set_role(graph, &id, flip(role));
            }
        }
    }
}

/// Runs role correction for a single incident, per §4.10 step 2.
fn correct_roles(graph: &mut Graph, incident: &Incident) {
    let src_nodes: Vec<String> = graph
        .nodes()
        .filter(|n| matches!(&n.content, NodeContent::Story(p) if p.story_node_type == SRC_NODE_TYPE))
        .map(|n| n.node_id.clone())
        .collect();

    for node_id in src_nodes {
        let ip = match story_ip(graph, &node_id) {
            Some(ip) if ip == incident.target_ip => ip,
            _ => continue,
        };
        let role = match story_role(graph, &node_id) {
            Some(r) => r,
            None => continue,
        };
        if role_matches(role, incident.focus_object) {
            continue;
        }

        let new_role = flip(role);
        set_role(graph, &node_id, new_role);

        if node_id == role_literal(role) {
            rename_node(graph, &node_id, role_literal(new_role));
            propagate_flip(graph, role_literal(new_role), &ip);
        } else {
            propagate_flip(graph, &node_id, &ip);
        }
    }

    flip_isolated_asset_addresses(graph, incident.focus_object);
}

/// Splices `network` onto `graph`, bridges victims to their endpoint
/// roots, and runs role correction for `incident` if supplied (§4.10).
pub fn bridge_and_correct(
    graph: &mut Graph,
    trace_root_map: &TraceRootMap,
    network: &NetworkGraphInput,
    incident: Option<&Incident>,
) {
    splice_story_graph(graph, network);
    bridge_victims_to_roots(graph, trace_root_map);
    if let Some(incident) = incident {
        correct_roles(graph, incident);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_raw_graph;
    use crate::classifier::classify;
    use crate::model::RawLog;

    fn story(id: &str, role: StoryRole, ip: &str, kind: &str) -> StoryNodeInput {
        StoryNodeInput {
            node_id: id.to_string(),
            role,
            ip: ip.to_string(),
            story_node_type: kind.to_string(),
        }
    }

    // S7 — victim bridges to the matching host's root.
    #[test]
    fn victim_bridges_to_matching_host_root() {
        let logs = vec![RawLog {
            event_id: "E1".to_string(),
            trace_id: "T1".to_string(),
            host_address: "10.0.0.9".to_string(),
            process_guid: "R".to_string(),
            log_type: "process".to_string(),
            ..Default::default()
        }];
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);

        let network = NetworkGraphInput {
            nodes: vec![story("victim", StoryRole::Victim, "10.0.0.9", "srcNode")],
            edges: vec![],
        };
        bridge_and_correct(&mut graph, &roots, &network, None);

        assert!(graph
            .outgoing_of("victim")
            .iter()
            .any(|e| e.target == "R" && e.label == Edge::LABEL_NET_TO_ENDPOINT));
    }

    #[test]
    fn role_correction_flips_src_node_and_propagates() {
        let mut graph = Graph::new();
        let network = NetworkGraphInput {
            nodes: vec![
                story("attacker", StoryRole::Attacker, "1.1.1.1", "srcNode"),
                story("2.2.2.2", StoryRole::Victim, "2.2.2.2", "dstNode"),
            ],
            edges: vec![StoryEdgeInput {
                source: "attacker".to_string(),
                target: "2.2.2.2".to_string(),
                label: "connect".to_string(),
            }],
        };
        splice_story_graph(&mut graph, &network);

        let incident = Incident {
            focus_object: FocusObject::Victim,
            target_ip: "1.1.1.1".to_string(),
        };
        correct_roles(&mut graph, &incident);

        assert_eq!(story_role(&graph, "victim"), Some(StoryRole::Victim));
        assert_eq!(story_role(&graph, "2.2.2.2"), Some(StoryRole::Attacker));
    }

    #[test]
    fn isolated_asset_address_with_opposite_role_flips() {
        let mut graph = Graph::new();
        let network = NetworkGraphInput {
            nodes: vec![story("3.3.3.3", StoryRole::Attacker, "3.3.3.3", ASSET_ADDRESS_TYPE)],
            edges: vec![],
        };
        splice_story_graph(&mut graph, &network);
        let incident = Incident {
            focus_object: FocusObject::Victim,
            target_ip: "9.9.9.9".to_string(),
        };
        correct_roles(&mut graph, &incident);
        assert_eq!(story_role(&graph, "3.3.3.3"), Some(StoryRole::Victim));
    }
}
