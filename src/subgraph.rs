//! Subgraph selector (§4.4): from each alarm start-point, walks the full
//! connected tree and emits the union as the relevant subgraph, guarding
//! the "every trace must keep at least one start" invariant.

use std::collections::{BTreeMap, HashSet};

use crate::graph::{Graph, MAX_TRAVERSE_DEPTH};
use crate::model::RawAlarm;

#[derive(Debug, Clone)]
pub struct StartPoint {
    pub node_id: String,
    pub trace_id: String,
    pub event_id: String,
}

fn candidate_starts(alarms: &[RawAlarm]) -> Vec<StartPoint> {
    alarms
        .iter()
        .filter(|a| !a.process_guid.is_empty())
        .map(|a| StartPoint {
            node_id: a.process_guid.clone(),
            trace_id: a.trace_id.clone(),
            event_id: a.event_id.clone(),
        })
        .collect()
}

/// Filters candidate starts by `associated_event_ids` (if non-empty),
/// then backfills any trace left with zero starts using any alarm of
/// that trace, so no trace silently loses its subgraph (§4.4, documented
/// source defect + prescribed fix).
fn resolve_starts(alarms: &[RawAlarm], associated_event_ids: &HashSet<String>) -> Vec<StartPoint> {
    let all_starts = candidate_starts(alarms);

    if associated_event_ids.is_empty() {
        return all_starts;
    }

    let filtered: Vec<StartPoint> = all_starts
        .iter()
        .filter(|s| associated_event_ids.contains(&s.event_id))
        .cloned()
        .collect();

    let mut traces_with_starts: HashSet<&str> =
        filtered.iter().map(|s| s.trace_id.as_str()).collect();

    let mut by_trace: BTreeMap<&str, Vec<&StartPoint>> = BTreeMap::new();
    for s in &all_starts {
        by_trace.entry(s.trace_id.as_str()).or_default().push(s);
    }

    let mut result = filtered;
    for (trace_id, starts) in by_trace {
        if traces_with_starts.contains(trace_id) {
            continue;
        }
        if let Some(first) = starts.first() {
            eprintln!(
                "【subgraph】backfilling start for trace {} (association filter removed all alarms)",
                trace_id
            );
            result.push((*first).clone());
            traces_with_starts.insert(trace_id);
        }
    }

    result
}

/// Selects the subgraph relevant to `alarms`, per §4.4.
pub fn select_subgraphs(graph: &Graph, alarms: &[RawAlarm], associated_event_ids: &HashSet<String>) -> Graph {
    let starts = resolve_starts(alarms, associated_event_ids);

    let mut keep: HashSet<String> = HashSet::new();
    for start in &starts {
        if !graph.contains(&start.node_id) {
            continue;
        }
        keep.extend(graph.connected_tree(&start.node_id, MAX_TRAVERSE_DEPTH));
    }

    graph.induced_subgraph(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_raw_graph;
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

    fn alarm(event_id: &str, trace: &str, guid: &str) -> RawAlarm {
        RawAlarm {
            event_id: event_id.to_string(),
            trace_id: trace.to_string(),
            process_guid: guid.to_string(),
            alarm_name: "mal".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn no_association_filter_keeps_every_alarm_tree() {
        let logs = vec![log("T1", "", "T1"), log("C1", "T1", "T1")];
        let graph = build_raw_graph(&[], &logs);
        let alarms = vec![alarm("E1", "T1", "T1")];
        let sub = select_subgraphs(&graph, &alarms, &HashSet::new());
        assert_eq!(sub.len(), 2);
    }

    #[test]
    fn association_filter_that_removes_all_starts_backfills() {
        let logs = vec![log("T1", "", "T1"), log("C1", "T1", "T1")];
        let graph = build_raw_graph(&[], &logs);
        let alarms = vec![alarm("E1", "T1", "T1")];
        let associated: HashSet<String> = ["OTHER_EVENT".to_string()].into_iter().collect();
        let sub = select_subgraphs(&graph, &alarms, &associated);
        // Backfill guarantees T1's tree is still present.
        assert_eq!(sub.len(), 2);
    }

    #[test]
    fn association_filter_keeps_only_matching_trace_when_others_match() {
        let logs = vec![
            log("T1", "", "T1"),
            log("C1", "T1", "T1"),
            log("T2", "", "T2"),
        ];
        let graph = build_raw_graph(&[], &logs);
        let alarms = vec![alarm("E1", "T1", "T1"), alarm("E2", "T2", "T2")];
        let associated: HashSet<String> = ["E1".to_string()].into_iter().collect();
        let sub = select_subgraphs(&graph, &alarms, &associated);
        assert!(sub.contains("T1"));
        assert!(!sub.contains("T2"));
    }
}
