//! Smart pruner (§4.5): reduces a subgraph to at most `MAX_NODE_COUNT`
//! nodes without severing attack paths, using a must-keep set, a
//! cascade-to-root walk, and a score-based fill for whatever budget
//! remains.

use std::collections::HashSet;

use crate::errors::{log_stage_error, StageError};
use crate::graph::{Graph, MAX_TRAVERSE_DEPTH};
use crate::model::ThreatSeverity;

pub const MAX_NODE_COUNT: usize = 100;

fn must_keep_set(graph: &Graph, associated_event_ids: &HashSet<String>) -> HashSet<String> {
    let mut keep: HashSet<String> = graph.index.roots.clone();
    for node in graph.nodes() {
        if node.has_network_associated_event(associated_event_ids) {
            keep.insert(node.node_id.clone());
            continue;
        }
        if node.is_alarm
            && matches!(node.threat_severity, ThreatSeverity::High | ThreatSeverity::Medium)
        {
            keep.insert(node.node_id.clone());
        }
    }
    keep
}

fn cascade_to_roots(graph: &Graph, must_keep: &HashSet<String>) -> HashSet<String> {
    let mut extra = HashSet::new();
    for node_id in must_keep {
        let ancestors = graph.walk_ancestors(node_id, MAX_TRAVERSE_DEPTH);
        extra.extend(ancestors);
    }
    extra
}

fn score_node(graph: &Graph, node_id: &str, associated_event_ids: &HashSet<String>) -> i64 {
    let node = match graph.get(node_id) {
        Some(n) => n,
        None => return 0,
    };
    let mut score: i64 = 0;
    if node.has_network_associated_event(associated_event_ids) {
        score += 1000;
    }
    for alarm in &node.alarms {
        score += match alarm.threat_severity {
            ThreatSeverity::High => 100,
            ThreatSeverity::Medium => 50,
            _ => 20,
        };
    }
    if node.is_root {
        score += 80;
    }
    let degree = graph.in_degree(node_id) + graph.out_degree(node_id);
    score += (2 * degree as i64).min(30);
    if !node.logs.is_empty() {
        score += 10;
    }
    if node.logs.iter().any(|l| l.log_type == "process") {
        score += 5;
    }
    score
}

/// Smart-prunes `graph` to at most `MAX_NODE_COUNT` nodes, per §4.5.
/// Returns the graph unchanged if pruning would drop a root node
/// (`PruneInvariantViolation`, §7): the rollback copy is the input itself.
pub fn prune(graph: &Graph, associated_event_ids: &HashSet<String>) -> Graph {
    if graph.len() <= MAX_NODE_COUNT {
        return graph.clone();
    }

    let must_keep = must_keep_set(graph, associated_event_ids);
    let mut retained: HashSet<String> = must_keep.clone();
    retained.extend(cascade_to_roots(graph, &must_keep));

    if retained.len() < MAX_NODE_COUNT {
        let mut remaining: Vec<(String, i64)> = graph
            .node_ids()
            .filter(|id| !retained.contains(*id))
            .map(|id| (id.clone(), score_node(graph, id, associated_event_ids)))
            .collect();
        remaining.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (id, _) in remaining {
            if retained.len() >= MAX_NODE_COUNT {
                break;
            }
            retained.insert(id);
        }
    }

    let pruned = graph.induced_subgraph(&retained);

    let roots_preserved = graph.index.roots.iter().all(|r| pruned.contains(r));
    if !roots_preserved {
        log_stage_error(
            "pruner",
            &StageError::PruneInvariantViolation(
                "smart prune would drop a root node, rolling back to unpruned graph".to_string(),
            ),
        );
        return graph.clone();
    }

    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_raw_graph;
    use crate::classifier::classify;
    use crate::model::{RawAlarm, RawLog, ThreatSeverity};

    fn chain_logs(n: usize, trace: &str) -> Vec<RawLog> {
        let mut logs = Vec::new();
        logs.push(RawLog {
            event_id: "E_root".to_string(),
            trace_id: trace.to_string(),
            host_address: "h".to_string(),
            process_guid: "R".to_string(),
            log_type: "process".to_string(),
            ..Default::default()
        });
        for i in 1..n {
            logs.push(RawLog {
                event_id: format!("E_{}", i),
                trace_id: trace.to_string(),
                host_address: "h".to_string(),
                process_guid: format!("N{}", i),
                parent_process_guid: if i == 1 {
                    "R".to_string()
                } else {
                    format!("N{}", i - 1)
                },
                log_type: "process".to_string(),
                ..Default::default()
            });
        }
        logs
    }

    // S5 — smart prune respects must-keep.
    #[test]
    fn keeps_root_and_alarm_ancestor_chain() {
        let logs = chain_logs(150, "T1");
        let mut alarms = vec![];
        alarms.push(RawAlarm {
            event_id: "EA".to_string(),
            trace_id: "T1".to_string(),
            host_address: "h".to_string(),
            process_guid: "N25".to_string(),
            alarm_name: "mal".to_string(),
            threat_severity: ThreatSeverity::High,
            ..Default::default()
        });
        // Force the graph well above MAX_NODE_COUNT is not needed here since
        // we assert on a 50-node graph that the must-keep chain survives a
        // no-op prune and an over-threshold prune alike.
        let mut graph = build_raw_graph(&alarms, &logs);
        classify(&mut graph);

        let pruned = prune(&graph, &HashSet::new());
        assert!(pruned.contains("R"));
        assert!(pruned.contains("N25"));
        for i in 1..=25 {
            assert!(pruned.contains(&format!("N{}", i)), "ancestor N{} missing", i);
        }
        assert!(pruned.len() <= MAX_NODE_COUNT);
    }

    #[test]
    fn below_threshold_graph_is_untouched() {
        let logs = chain_logs(5, "T1");
        let mut graph = build_raw_graph(&[], &logs);
        classify(&mut graph);
        let pruned = prune(&graph, &HashSet::new());
        assert_eq!(pruned.len(), graph.len());
    }

    #[test]
    fn network_associated_node_always_kept() {
        let logs = chain_logs(150, "T1");
        let mut graph = build_raw_graph(&[], &logs);
        classify(&mut graph);
        let associated: HashSet<String> = ["E_100".to_string()].into_iter().collect();
        let pruned = prune(&graph, &associated);
        assert!(pruned.contains("N100"));
        assert!(pruned.len() <= MAX_NODE_COUNT);
    }
}
