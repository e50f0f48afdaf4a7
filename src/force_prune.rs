//! Force pruner (§4.7): when a subgraph survives the smart pruner still
//! above `FORCE_THRESHOLD`, collapses it to a hard `FORCE_TARGET` nodes
//! split across at most `MAX_TRACE_IDS` traces, favoring network-associated
//! nodes and a single deterministic root-down chain over breadth.

use std::collections::HashSet;

use crate::classifier::TraceRootMap;
use crate::graph::{Graph, MAX_TRAVERSE_DEPTH};
use crate::model::{Edge, NodeType};

pub const FORCE_THRESHOLD: usize = 100;
pub const FORCE_TARGET: usize = 30;
pub const MAX_TRACE_IDS: usize = 3;

pub fn should_force_prune(graph: &Graph) -> bool {
    graph.len() > FORCE_THRESHOLD
}

fn owning_process_of(graph: &Graph, entity_id: &str) -> Option<String> {
    graph
        .incoming_of(entity_id)
        .iter()
        .find(|e| e.label == Edge::LABEL_CONNECT)
        .map(|e| e.source.clone())
}

/// Walks `start`'s ancestor chain one lexicographically-smallest parent at
/// a time (mirroring `single_chain_from`'s downward analogue), then returns
/// only its root-ward prefix that fits in `remaining` slots. Unbounded
/// `walk_ancestors` would happily pull in up to `MAX_TRAVERSE_DEPTH`
/// ancestors regardless of the per-trace quota (§4.7 step 3a): keeping the
/// prefix nearest the root, rather than every ancestor found, is what keeps
/// the caller's running total at or under quota.
fn root_ward_ancestors(graph: &Graph, start: &str, remaining: usize) -> Vec<String> {
    if remaining == 0 {
        return Vec::new();
    }

    let mut chain = vec![start.to_string()];
    let mut visited: HashSet<String> = chain.iter().cloned().collect();
    let mut current = start.to_string();
    for _ in 0..MAX_TRAVERSE_DEPTH {
        let mut candidates: Vec<&Edge> = graph.incoming_of(&current).iter().collect();
        candidates.sort_by(|a, b| a.source.cmp(&b.source));
        match candidates.into_iter().find(|e| !visited.contains(&e.source)) {
            Some(edge) => {
                visited.insert(edge.source.clone());
                chain.push(edge.source.clone());
                current = edge.source.clone();
            }
            None => break,
        }
    }

    chain.reverse();
    chain.truncate(remaining);
    chain
}

/// Picks at most `quota` nodes for one trace, in priority order: the
/// smallest net-associated process node's root-ward ancestor prefix, each
/// net-associated entity node plus its owning process's root-ward ancestor
/// prefix, a single deterministic root-down chain, then residual fill by id.
fn select_for_trace(
    graph: &Graph,
    trace_node_ids: &[String],
    quota: usize,
    associated_event_ids: &HashSet<String>,
    root: Option<&String>,
) -> HashSet<String> {
    let mut chosen: HashSet<String> = HashSet::new();
    if quota == 0 {
        return chosen;
    }

    let mut net_assoc_process: Vec<&String> = trace_node_ids
        .iter()
        .filter(|id| {
            graph
                .get(id)
                .map(|n| n.node_type == NodeType::Process && n.has_network_associated_event(associated_event_ids))
                .unwrap_or(false)
        })
        .collect();
    net_assoc_process.sort();
    if let Some(smallest) = net_assoc_process.first() {
        let remaining = quota.saturating_sub(chosen.len());
        chosen.extend(root_ward_ancestors(graph, smallest, remaining));
    }

    let mut net_assoc_entities: Vec<&String> = trace_node_ids
        .iter()
        .filter(|id| {
            graph
                .get(id)
                .map(|n| n.node_type != NodeType::Process && n.has_network_associated_event(associated_event_ids))
                .unwrap_or(false)
        })
        .collect();
    net_assoc_entities.sort();
    for id in net_assoc_entities {
        if chosen.len() >= quota {
            break;
        }
        chosen.insert(id.clone());
        if let Some(owner) = owning_process_of(graph, id) {
            let remaining = quota.saturating_sub(chosen.len());
            chosen.extend(root_ward_ancestors(graph, &owner, remaining));
        }
    }

    if chosen.len() < quota {
        if let Some(root_id) = root {
            for id in graph.single_chain_from(root_id) {
                if chosen.len() >= quota {
                    break;
                }
                chosen.insert(id);
            }
        }
    }

    if chosen.len() < quota {
        let mut remaining: Vec<&String> = trace_node_ids.iter().collect();
        remaining.sort();
        for id in remaining {
            if chosen.len() >= quota {
                break;
            }
            chosen.insert(id.clone());
        }
    }

    chosen
}

/// Force-prunes `graph` to `FORCE_TARGET` nodes across at most
/// `MAX_TRACE_IDS` traces, per §4.7. No-op if `graph` is already at or
/// below `FORCE_THRESHOLD`.
pub fn force_prune(graph: &Graph, associated_event_ids: &HashSet<String>, trace_root_map: &TraceRootMap) -> Graph {
    if !should_force_prune(graph) {
        return graph.clone();
    }

    let mut trace_ids: Vec<String> = graph.index.by_trace.keys().cloned().collect();
    trace_ids.sort();
    trace_ids.truncate(MAX_TRACE_IDS);

    let trace_count = trace_ids.len().max(1);
    let base_quota = FORCE_TARGET / trace_count;
    let remainder = FORCE_TARGET % trace_count;

    let mut retained: HashSet<String> = HashSet::new();
    for (i, trace_id) in trace_ids.iter().enumerate() {
        let quota = base_quota + if i == 0 { remainder } else { 0 };
        let node_ids = graph.index.by_trace.get(trace_id).cloned().unwrap_or_default();
        let root = trace_root_map.get(trace_id);
        retained.extend(select_for_trace(graph, &node_ids, quota, associated_event_ids, root));
    }

    graph.induced_subgraph(&retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_raw_graph;
    use crate::classifier::classify;
    use crate::model::RawLog;

    fn chain_logs(n: usize, trace: &str) -> Vec<RawLog> {
        let mut logs = Vec::new();
        logs.push(RawLog {
            event_id: format!("E_{}_root", trace),
            trace_id: trace.to_string(),
            host_address: "h".to_string(),
            process_guid: format!("{}_R", trace),
            log_type: "process".to_string(),
            ..Default::default()
        });
        for i in 1..n {
            logs.push(RawLog {
                event_id: format!("E_{}_{}", trace, i),
                trace_id: trace.to_string(),
                host_address: "h".to_string(),
                process_guid: format!("{}_N{}", trace, i),
                parent_process_guid: if i == 1 {
                    format!("{}_R", trace)
                } else {
                    format!("{}_N{}", trace, i - 1)
                },
                log_type: "process".to_string(),
                ..Default::default()
            });
        }
        logs
    }

    #[test]
    fn no_op_below_threshold() {
        let logs = chain_logs(10, "T1");
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);
        let pruned = force_prune(&graph, &HashSet::new(), &roots);
        assert_eq!(pruned.len(), graph.len());
    }

    // S6 — force prune collapses an oversized single-trace graph to target.
    #[test]
    fn collapses_to_force_target_for_single_trace() {
        let logs = chain_logs(150, "T1");
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);
        assert!(should_force_prune(&graph));
        let pruned = force_prune(&graph, &HashSet::new(), &roots);
        assert!(pruned.len() <= FORCE_TARGET);
        assert!(pruned.contains("T1_R"));
    }

    // S6 variant — a net-associated node deep in a long single-trace chain
    // must not blow the quota: its full (unbounded) ancestor walk alone
    // would already exceed FORCE_TARGET before the later fill steps ever
    // run their own `chosen.len() >= quota` checks.
    #[test]
    fn net_associated_node_deep_in_chain_stays_within_quota() {
        let logs = chain_logs(150, "T1");
        let deep_event_id = "E_T1_100".to_string();
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);
        assert!(should_force_prune(&graph));

        let associated: HashSet<String> = [deep_event_id].into_iter().collect();
        let pruned = force_prune(&graph, &associated, &roots);
        assert!(pruned.len() <= FORCE_TARGET);
        assert!(pruned.contains("T1_R"));
    }

    #[test]
    fn splits_quota_across_multiple_traces() {
        let mut logs = chain_logs(60, "T1");
        logs.extend(chain_logs(60, "T2"));
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);
        let pruned = force_prune(&graph, &HashSet::new(), &roots);
        assert!(pruned.len() <= FORCE_TARGET);
        assert!(pruned.contains("T1_R"));
        assert!(pruned.contains("T2_R"));
    }
}
