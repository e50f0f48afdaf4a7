//! Entity extractor & filter (§4.6): materializes file/domain/network/
//! registry entity nodes from the logs (or, failing that, the alarms) of
//! each retained process node, then caps each entity type per owning
//! process with network-association priority.

use std::collections::{HashMap, HashSet};

use crate::graph::Graph;
use crate::model::{
    entity_node_id, DomainEntityPayload, Edge, FileEntityPayload, Node, NodeContent, NodeType,
    NetworkEntityPayload, RawAlarm, RawLog, RegistryEntityPayload,
};

const PRIORITY_EXTENSIONS: &[&str] = &[
    ".exe", ".dll", ".bat", ".ps1", ".vbs", ".msi", ".jsp", ".php", ".asp", ".sh", ".so",
];

fn file_op_allowed(op: &str) -> bool {
    matches!(op.to_lowercase().as_str(), "create" | "write" | "delete")
}

fn network_op_allowed(op: &str) -> bool {
    op.to_lowercase() == "connect"
}

fn domain_op_allowed(op: &str) -> bool {
    op.to_lowercase() == "connect"
}

fn registry_op_allowed(op: &str) -> bool {
    op.to_lowercase() == "setvalue"
}

fn is_priority_extension_create(filename: &str, op_type: &str) -> bool {
    if op_type.to_lowercase() != "create" {
        return false;
    }
    let lower = filename.to_lowercase();
    PRIORITY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// One fully-formed entity still awaiting insertion / merge, carrying the
/// dedup key and originating-event metadata.
struct EntityDraft {
    node_type: NodeType,
    type_tag: &'static str,
    dedup_key: String,
    content: NodeContent,
    created_by_event_id: String,
    is_network_associated: bool,
    source_log: Option<RawLog>,
    source_alarm: Option<RawAlarm>,
    time: i64,
}

fn draft_from_log(log: &RawLog, associated: &HashSet<String>) -> Option<EntityDraft> {
    let is_assoc = associated.contains(&log.event_id);
    match log.log_type.as_str() {
        "file" if file_op_allowed(&log.op_type) => {
            let md5 = log.file_md5.clone().unwrap_or_default();
            let filename = log.target_filename.clone().unwrap_or_default();
            Some(EntityDraft {
                node_type: NodeType::FileEntity,
                type_tag: "FILE",
                dedup_key: format!("{}|{}", md5, filename),
                content: NodeContent::File(FileEntityPayload {
                    file_md5: Some(md5),
                    filename: Some(filename),
                    op_type: log.op_type.clone(),
                }),
                created_by_event_id: log.event_id.clone(),
                is_network_associated: is_assoc,
                source_log: Some(log.clone()),
                source_alarm: None,
                time: log.start_time,
            })
        }
        "domain" if domain_op_allowed(&log.op_type) => {
            let domain = log.request_domain.clone().unwrap_or_default();
            Some(EntityDraft {
                node_type: NodeType::DomainEntity,
                type_tag: "DOMAIN",
                dedup_key: domain.clone(),
                content: NodeContent::Domain(DomainEntityPayload {
                    request_domain: domain,
                    op_type: log.op_type.clone(),
                }),
                created_by_event_id: log.event_id.clone(),
                is_network_associated: is_assoc,
                source_log: Some(log.clone()),
                source_alarm: None,
                time: log.start_time,
            })
        }
        "network" if network_op_allowed(&log.op_type) => {
            let dest = log.dest_address.clone().unwrap_or_default();
            Some(EntityDraft {
                node_type: NodeType::NetworkEntity,
                type_tag: "NETWORK",
                dedup_key: dest.clone(),
                content: NodeContent::Network(NetworkEntityPayload {
                    dest_address: dest,
                    op_type: log.op_type.clone(),
                }),
                created_by_event_id: log.event_id.clone(),
                is_network_associated: is_assoc,
                source_log: Some(log.clone()),
                source_alarm: None,
                time: log.start_time,
            })
        }
        "registry" if registry_op_allowed(&log.op_type) => {
            let target = log.target_object.clone().unwrap_or_default();
            Some(EntityDraft {
                node_type: NodeType::RegistryEntity,
                type_tag: "REGISTRY",
                dedup_key: target.clone(),
                content: NodeContent::Registry(RegistryEntityPayload {
                    target_object: target,
                    op_type: log.op_type.clone(),
                }),
                created_by_event_id: log.event_id.clone(),
                is_network_associated: is_assoc,
                source_log: Some(log.clone()),
                source_alarm: None,
                time: log.start_time,
            })
        }
        _ => None,
    }
}

fn draft_from_alarm(alarm: &RawAlarm, associated: &HashSet<String>) -> Option<EntityDraft> {
    let is_assoc = associated.contains(&alarm.event_id);

    if let (Some(md5), Some(filename)) = (&alarm.file_md5, &alarm.target_filename) {
        if !filename.is_empty() && filename != &alarm.image {
            return Some(EntityDraft {
                node_type: NodeType::FileEntity,
                type_tag: "FILE",
                dedup_key: format!("{}|{}", md5, filename),
                content: NodeContent::File(FileEntityPayload {
                    file_md5: Some(md5.clone()),
                    filename: Some(filename.clone()),
                    op_type: "create".to_string(),
                }),
                created_by_event_id: alarm.event_id.clone(),
                is_network_associated: is_assoc,
                source_log: None,
                source_alarm: Some(alarm.clone()),
                time: alarm.start_time,
            });
        }
    }

    if let Some(domain) = alarm.request_domain.clone().filter(|d| !d.is_empty()) {
        return Some(EntityDraft {
            node_type: NodeType::DomainEntity,
            type_tag: "DOMAIN",
            dedup_key: domain.clone(),
            content: NodeContent::Domain(DomainEntityPayload {
                request_domain: domain,
                op_type: "connect".to_string(),
            }),
            created_by_event_id: alarm.event_id.clone(),
            is_network_associated: is_assoc,
            source_log: None,
            source_alarm: Some(alarm.clone()),
            time: alarm.start_time,
        });
    }

    if let Some(dest) = alarm
        .dest_address
        .clone()
        .filter(|d| !d.is_empty() && d != &alarm.host_address)
    {
        return Some(EntityDraft {
            node_type: NodeType::NetworkEntity,
            type_tag: "NETWORK",
            dedup_key: dest.clone(),
            content: NodeContent::Network(NetworkEntityPayload {
                dest_address: dest,
                op_type: "connect".to_string(),
            }),
            created_by_event_id: alarm.event_id.clone(),
            is_network_associated: is_assoc,
            source_log: None,
            source_alarm: Some(alarm.clone()),
            time: alarm.start_time,
        });
    }

    if let Some(target) = alarm.target_object.clone().filter(|t| !t.is_empty()) {
        return Some(EntityDraft {
            node_type: NodeType::RegistryEntity,
            type_tag: "REGISTRY",
            dedup_key: target.clone(),
            content: NodeContent::Registry(RegistryEntityPayload {
                target_object: target,
                op_type: "setValue".to_string(),
            }),
            created_by_event_id: alarm.event_id.clone(),
            is_network_associated: is_assoc,
            source_log: None,
            source_alarm: Some(alarm.clone()),
            time: alarm.start_time,
        });
    }

    None
}

fn apply_draft(graph: &mut Graph, process_guid: &str, draft: EntityDraft, process_alarms: &[RawAlarm]) {
    let node_id = entity_node_id(process_guid, draft.type_tag, &draft.dedup_key);

    if let Some(existing) = graph.get_mut(&node_id) {
        if let Some(log) = draft.source_log {
            existing.record_log(log, false);
        }
        if let Some(alarm) = draft.source_alarm {
            existing.record_alarm(alarm);
        }
        if draft.is_network_associated && !existing.is_network_associated {
            existing.is_network_associated = true;
            existing.associated_event_id = Some(draft.created_by_event_id);
        }
        return;
    }

    let mut node = Node::new_entity(node_id.clone(), draft.node_type, draft.content);
    node.created_by_event_id = Some(draft.created_by_event_id.clone());
    node.is_network_associated = draft.is_network_associated;
    if draft.is_network_associated {
        node.associated_event_id = Some(draft.created_by_event_id.clone());
    }
    if let Some(log) = draft.source_log {
        node.record_log(log, false);
    }
    if let Some(alarm) = draft.source_alarm {
        node.record_alarm(alarm);
    }
    for alarm in process_alarms {
        node.alarms.push(alarm.clone());
    }
    // Inherit the owning process's trace/host so the entity node lands in
    // `NodeIndex::by_trace`/`by_host` once reindexed — without these the
    // force-pruner's per-trace candidate set never sees it (§4.7 step 3b).
    if let Some(owner) = graph.get(process_guid) {
        node.trace_id = owner.trace_id.clone();
        node.host_address = owner.host_address.clone();
    }

    graph.upsert_node(node);
    graph.add_edge(process_guid, &node_id, Edge::LABEL_CONNECT);
}

/// Materializes entity nodes from every retained process node's logs (or,
/// when a process has no logs, its alarms), per §4.6.
pub fn extract_entities(graph: &mut Graph, associated_event_ids: &HashSet<String>) {
    let process_ids: Vec<String> = graph
        .nodes()
        .filter(|n| n.node_type == NodeType::Process)
        .map(|n| n.node_id.clone())
        .collect();

    for process_guid in process_ids {
        let (logs, alarms) = {
            let node = match graph.get(&process_guid) {
                Some(n) => n,
                None => continue,
            };
            (node.logs.clone(), node.alarms.clone())
        };

        let mut drafts = Vec::new();
        if !logs.is_empty() {
            for log in &logs {
                if let Some(draft) = draft_from_log(log, associated_event_ids) {
                    drafts.push(draft);
                }
            }
        } else if !alarms.is_empty() {
            for alarm in &alarms {
                if let Some(draft) = draft_from_alarm(alarm, associated_event_ids) {
                    drafts.push(draft);
                }
            }
        }

        for draft in drafts {
            apply_draft(graph, &process_guid, draft, &alarms);
        }
    }
}

fn entity_time(node: &Node) -> i64 {
    node.logs
        .iter()
        .map(|l| l.start_time)
        .chain(node.alarms.iter().map(|a| a.start_time))
        .min()
        .unwrap_or(0)
}

fn owning_process_of(graph: &Graph, entity_id: &str) -> Option<String> {
    graph
        .incoming_of(entity_id)
        .iter()
        .find(|e| e.label == Edge::LABEL_CONNECT)
        .map(|e| e.source.clone())
}

fn file_payload_of<'a>(node: &'a Node) -> Option<&'a FileEntityPayload> {
    match &node.content {
        NodeContent::File(p) => Some(p),
        _ => None,
    }
}

/// Applies the per-type, per-process caps from §4.6, removing excess
/// entity nodes and their incident edges.
pub fn filter_entities(graph: &mut Graph) {
    let mut by_group: HashMap<(String, NodeType), Vec<String>> = HashMap::new();

    for node in graph.nodes() {
        if !matches!(
            node.node_type,
            NodeType::FileEntity | NodeType::DomainEntity | NodeType::NetworkEntity | NodeType::RegistryEntity
        ) {
            continue;
        }
        let owner = match owning_process_of(graph, &node.node_id) {
            Some(o) => o,
            None => continue,
        };
        by_group
            .entry((owner, node.node_type))
            .or_default()
            .push(node.node_id.clone());
    }

    let mut to_remove: HashSet<String> = HashSet::new();

    for ((_, node_type), ids) in by_group {
        match node_type {
            NodeType::FileEntity => to_remove.extend(select_file_drops(graph, &ids)),
            NodeType::DomainEntity => to_remove.extend(select_capped_drops(graph, &ids, 5)),
            NodeType::NetworkEntity => to_remove.extend(select_capped_drops(graph, &ids, 5)),
            NodeType::RegistryEntity => to_remove.extend(select_capped_drops(graph, &ids, 3)),
            _ => {}
        }
    }

    for id in to_remove {
        graph.remove_node(&id);
    }

    // `extract_entities` adds nodes via `upsert_node`, which does not index
    // them (`NodeIndex` is only kept current by `induced_subgraph`/
    // `reindex_node`/`reindex_all`), so `by_trace` et al. are missing every
    // entity node until this runs. Downstream stages (force-pruner) key off
    // the index, so entity nodes must be visible in it before they run.
    graph.reindex_all();
}

/// Orders `ids` network-associated-first, then by ascending time, and
/// returns the ids beyond `cap` to drop.
fn select_capped_drops(graph: &Graph, ids: &[String], cap: usize) -> Vec<String> {
    let mut ordered: Vec<String> = ids.to_vec();
    ordered.sort_by(|a, b| {
        let na = graph.get(a).unwrap();
        let nb = graph.get(b).unwrap();
        nb.is_network_associated
            .cmp(&na.is_network_associated)
            .then(entity_time(na).cmp(&entity_time(nb)))
            .then(a.cmp(b))
    });
    ordered.into_iter().skip(cap).collect()
}

fn select_file_drops(graph: &Graph, ids: &[String]) -> Vec<String> {
    let mut priority_keep: HashSet<String> = HashSet::new();
    let mut by_op: HashMap<String, Vec<String>> = HashMap::new();

    for id in ids {
        let node = graph.get(id).unwrap();
        let payload = match file_payload_of(node) {
            Some(p) => p,
            None => continue,
        };
        let filename = payload.filename.clone().unwrap_or_default();
        if is_priority_extension_create(&filename, &payload.op_type) {
            priority_keep.insert(id.clone());
            continue;
        }
        by_op.entry(payload.op_type.clone()).or_default().push(id.clone());
    }

    let mut drop = Vec::new();
    for (_, group) in by_op {
        drop.extend(select_capped_drops(graph, &group, 3));
    }
    drop
}
