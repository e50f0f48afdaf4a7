//! Upward extension (§4.9): for each eligible root, queries the store for
//! up to `max_extension_depth` ancestor layers and prepends them as
//! extension process nodes, transferring root status to the topmost one
//! found.

use std::error::Error;

use crate::classifier::TraceRootMap;
use crate::errors::log_stage_error;
use crate::graph::Graph;
use crate::model::{Edge, Node, NodeType};
use crate::store::{classify_store_error, SearchStore};

pub const DEFAULT_MAX_EXTENSION_DEPTH: u32 = 2;

fn eligible_for_extension(graph: &Graph, root_id: &str) -> bool {
    match graph.get(root_id) {
        Some(node) => node.node_type != NodeType::Explore && !node.is_broken,
        None => false,
    }
}

/// Extends a single root upward. No-op if the root is ineligible or the
/// store returns no ancestors.
async fn extend_root(
    graph: &mut Graph,
    root_id: &str,
    host: &str,
    store: &dyn SearchStore,
    max_depth: u32,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if !eligible_for_extension(graph, root_id) {
        return Ok(());
    }

    let ancestors = store
        .query_logs_by_process_guids(host, &[root_id.to_string()], max_depth)
        .await?;
    if ancestors.is_empty() {
        return Ok(());
    }

    let mut previous_child = root_id.to_string();
    let mut topmost = root_id.to_string();

    for (i, log) in ancestors.iter().take(max_depth as usize).enumerate() {
        let ancestor_id = log.process_guid.clone();
        if ancestor_id.is_empty() || ancestor_id == previous_child {
            break;
        }
        let depth = (i + 1) as u32;

        if !graph.contains(&ancestor_id) {
            let mut node = Node::new_process(ancestor_id.clone(), false);
            node.is_extension_node = true;
            node.extension_depth = Some(depth);
            node.record_log(log.clone(), false);
            graph.upsert_node(node);
        }
        graph.add_edge(&ancestor_id, &previous_child, Edge::LABEL_PROCESS_CREATE);
        graph.reindex_node(&ancestor_id);

        topmost = ancestor_id.clone();
        previous_child = ancestor_id;
    }

    if topmost != root_id {
        if let Some(prior) = graph.get_mut(root_id) {
            prior.is_root = false;
        }
        graph.reindex_node(root_id);
        if let Some(top) = graph.get_mut(&topmost) {
            top.is_root = true;
        }
        graph.reindex_node(&topmost);
    }

    Ok(())
}

/// Extends every eligible root named in `trace_root_map`, per §4.9. Store
/// failures on one root are logged and skipped rather than aborting the
/// whole pass (§7: a failing stage degrades to its best-effort output).
pub async fn extend_roots(
    graph: &mut Graph,
    trace_root_map: &TraceRootMap,
    host: &str,
    store: &dyn SearchStore,
    max_depth: u32,
) {
    let root_ids: Vec<String> = trace_root_map.values().cloned().collect();
    for root_id in root_ids {
        if let Err(err) = extend_root(graph, &root_id, host, store, max_depth).await {
            log_stage_error(
                "extension",
                &classify_store_error(&format!("ancestor query for root {}", root_id), err.as_ref()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    use crate::builder::build_raw_graph;
    use crate::classifier::classify;
    use crate::model::{RawAlarm, RawLog};

    struct StubStore {
        ancestors: Vec<RawLog>,
    }

    #[async_trait]
    impl SearchStore for StubStore {
        async fn query_alarms_by_host(&self, _host: &str) -> Result<Vec<RawAlarm>, Box<dyn Error + Send + Sync>> {
            Ok(Vec::new())
        }
        async fn query_logs_by_trace_id_and_host(
            &self,
            _trace_id: &str,
            _host: &str,
            _alarm_time: i64,
        ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>> {
            Ok(Vec::new())
        }
        async fn query_logs_by_process_guids(
            &self,
            _host: &str,
            _parent_guids: &[String],
            _max_depth: u32,
        ) -> Result<Vec<RawLog>, Box<dyn Error + Send + Sync>> {
            Ok(self.ancestors.clone())
        }
    }

    fn log(guid: &str, trace: &str) -> RawLog {
        RawLog {
            event_id: format!("E_{}", guid),
            trace_id: trace.to_string(),
            host_address: "h".to_string(),
            process_guid: guid.to_string(),
            log_type: "process".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn prepends_ancestor_layers_and_transfers_root() {
        let logs = vec![log("R", "T1")];
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);
        let store = StubStore {
            ancestors: vec![log("A1", "T1"), log("A2", "T1")],
        };
        extend_roots(&mut graph, &roots, "h", &store, 2).await;

        assert!(graph.contains("A1"));
        assert!(graph.contains("A2"));
        assert!(graph.get("A2").unwrap().is_root);
        assert!(!graph.get("R").unwrap().is_root);
        assert!(graph.outgoing_of("A2").iter().any(|e| e.target == "A1"));
        assert!(graph.outgoing_of("A1").iter().any(|e| e.target == "R"));
    }

    #[tokio::test]
    async fn broken_root_is_never_extended() {
        let logs = vec![RawLog {
            event_id: "E_M".to_string(),
            trace_id: "T1".to_string(),
            host_address: "h".to_string(),
            process_guid: "M".to_string(),
            parent_process_guid: "P".to_string(),
            log_type: "process".to_string(),
            ..Default::default()
        }];
        let mut graph = build_raw_graph(&[], &logs);
        classify(&mut graph);
        assert!(graph.get("M").unwrap().is_broken);

        let store = StubStore {
            ancestors: vec![log("A1", "T1")],
        };
        let mut trace_root_map: BTreeMap<String, String> = BTreeMap::new();
        trace_root_map.insert("T1".to_string(), "M".to_string());
        extend_roots(&mut graph, &trace_root_map, "h", &store, 2).await;
        assert!(!graph.contains("A1"));
    }

    #[tokio::test]
    async fn empty_ancestor_response_is_a_no_op() {
        let logs = vec![log("R", "T1")];
        let mut graph = build_raw_graph(&[], &logs);
        let roots = classify(&mut graph);
        let store = StubStore { ancestors: vec![] };
        extend_roots(&mut graph, &roots, "h", &store, 2).await;
        assert_eq!(graph.len(), 1);
        assert!(graph.get("R").unwrap().is_root);
    }
}
