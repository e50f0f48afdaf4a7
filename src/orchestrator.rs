//! Orchestrator (§4.12): drives the per-host pipeline end-to-end and
//! exposes the two operations the HTTP surface serves, `batch_generate`
//! and `merge_chain`. "No exceptions cross the boundary" — every stage
//! failure is logged and degrades to a best-effort (possibly empty)
//! graph rather than aborting the request.
//!
//! Grounded on `ai/manager.rs::AIManager::map_reduce_ask`'s fan-out/
//! collect-with-bounded-concurrency shape, reworked from "ask N providers,
//! reduce answers" into "process N hosts, union graphs."

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use crate::bridge::{self, Incident, NetworkGraphInput};
use crate::builder;
use crate::classifier::{self, TraceRootMap};
use crate::entities;
use crate::errors::{log_stage_error, StageError};
use crate::explore;
use crate::extension;
use crate::force_prune;
use crate::graph::Graph;
use crate::model::{
    ChainNodeInfo, Edge, GraphResult, IpMappingRelation, NodeContent, NodeType, RawAlarm, ResultNode, ThreatSeverity,
};
use crate::pruner;
use crate::store::{classify_store_error, SearchStore};
use crate::subgraph;
use crate::validator;

const DEFAULT_CONCURRENCY: usize = 8;

pub struct Orchestrator {
    store: Arc<dyn SearchStore>,
    max_extension_depth: u32,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn SearchStore>, max_extension_depth: u32) -> Orchestrator {
        Orchestrator {
            store,
            max_extension_depth,
        }
    }

    /// Runs the full per-host pipeline through validation, returning a
    /// best-effort `(Graph, TraceRootMap)` — never an error, per §7.
    async fn process_host(&self, host: &str, ip_mapping: &IpMappingRelation, deadline: Instant) -> (Graph, TraceRootMap) {
        let associated_event_ids = ip_mapping.associated_event_ids();

        if Instant::now() >= deadline {
            log_stage_error("orchestrator", &StageError::Internal(format!("deadline exceeded before host {}", host)));
            return (Graph::new(), TraceRootMap::new());
        }

        let alarms = match self.store.query_alarms_by_host(host).await {
            Ok(a) => a,
            Err(e) => {
                log_stage_error("orchestrator", &classify_store_error("query_alarms_by_host", e.as_ref()));
                return (Graph::new(), TraceRootMap::new());
            }
        };
        if alarms.is_empty() {
            log_stage_error("orchestrator", &StageError::NoAlarmsForHost(host.to_string()));
            return (Graph::new(), TraceRootMap::new());
        }

        let mut candidates: BTreeMap<String, Vec<RawAlarm>> = BTreeMap::new();
        for alarm in alarms.into_iter().filter(|a| a.host_address == host) {
            candidates.entry(alarm.trace_id.clone()).or_default().push(alarm);
        }

        let winning_trace = match crate::elector::elect(&candidates) {
            Some(t) => t,
            None => {
                log_stage_error("orchestrator", &StageError::ElectionFailed(host.to_string()));
                return (Graph::new(), TraceRootMap::new());
            }
        };
        let winning_alarms = candidates.remove(&winning_trace).unwrap_or_default();
        let alarm_time = winning_alarms.iter().map(|a| a.start_time).min().unwrap_or(0);

        if Instant::now() >= deadline {
            log_stage_error("orchestrator", &StageError::Internal(format!("deadline exceeded before log query for {}", host)));
            return (Graph::new(), TraceRootMap::new());
        }

        let logs = match self
            .store
            .query_logs_by_trace_id_and_host(&winning_trace, host, alarm_time)
            .await
        {
            Ok(l) => l,
            Err(e) => {
                log_stage_error(
                    "orchestrator",
                    &classify_store_error("query_logs_by_trace_id_and_host", e.as_ref()),
                );
                Vec::new()
            }
        };

        let mut graph = builder::build_raw_graph(&winning_alarms, &logs);
        let mut trace_root_map = classifier::classify(&mut graph);

        let sub = subgraph::select_subgraphs(&graph, &winning_alarms, &associated_event_ids);
        let mut pruned = pruner::prune(&sub, &associated_event_ids);

        entities::extract_entities(&mut pruned, &associated_event_ids);
        entities::filter_entities(&mut pruned);

        if force_prune::should_force_prune(&pruned) {
            pruned = force_prune::force_prune(&pruned, &associated_event_ids, &trace_root_map);
        }

        explore::synthesize_explore_roots(&mut pruned, &mut trace_root_map);

        if Instant::now() < deadline {
            extension::extend_roots(&mut pruned, &trace_root_map, host, self.store.as_ref(), self.max_extension_depth).await;
        }

        validator::validate(&mut pruned);

        (pruned, trace_root_map)
    }

    /// The **batch-generate** operation (§4.12, §6): one `GraphResult`
    /// per host, unioned across a bounded worker pool. Returns `None` only
    /// on `InputInvalid`; a host whose pipeline degraded to empty still
    /// contributes an empty `GraphResult`, never omission.
    pub async fn batch_generate(&self, ip_mapping: &IpMappingRelation, hosts: &[String]) -> Option<Vec<GraphResult>> {
        if hosts.is_empty() || ip_mapping.ip_and_association.is_empty() {
            log_stage_error("orchestrator", &StageError::InputInvalid("empty host set or ip mapping".to_string()));
            return None;
        }

        let deadline = Instant::now() + std::time::Duration::from_secs(30);
        let results: Vec<GraphResult> = stream::iter(hosts.to_vec())
            .map(|host| async move {
                let (graph, _roots) = self.process_host(&host, ip_mapping, deadline).await;
                graph_to_result(&graph)
            })
            .buffer_unordered(DEFAULT_CONCURRENCY)
            .collect()
            .await;

        Some(results)
    }

    /// The **merge-chain** operation (§4.12, §6): unions every host's
    /// endpoint graph, splices the supplied network story graph onto it,
    /// and runs role correction, emitting a single merged `GraphResult`.
    pub async fn merge_chain(
        &self,
        network: &NetworkGraphInput,
        ip_mapping: &IpMappingRelation,
        incident: Option<&Incident>,
        hosts: &[String],
    ) -> Option<GraphResult> {
        if hosts.is_empty() || ip_mapping.ip_and_association.is_empty() {
            log_stage_error("orchestrator", &StageError::InputInvalid("empty host set or ip mapping".to_string()));
            return None;
        }

        let deadline = Instant::now() + std::time::Duration::from_secs(30);
        let per_host: Vec<(Graph, TraceRootMap)> = stream::iter(hosts.to_vec())
            .map(|host| async move { self.process_host(&host, ip_mapping, deadline).await })
            .buffer_unordered(DEFAULT_CONCURRENCY)
            .collect()
            .await;

        let mut merged = Graph::new();
        let mut trace_root_map: TraceRootMap = TraceRootMap::new();
        for (graph, roots) in &per_host {
            merge_into(&mut merged, graph);
            trace_root_map.extend(roots.clone());
        }

        bridge::bridge_and_correct(&mut merged, &trace_root_map, network, incident);
        validator::validate(&mut merged);

        Some(graph_to_result(&merged))
    }
}

/// Single-writer union of `source`'s nodes and edges into `dest` (§5:
/// cross-host aggregation is a single-writer merge at the end).
fn merge_into(dest: &mut Graph, source: &Graph) {
    for node in source.nodes() {
        dest.upsert_node(node.clone());
    }
    for edge in source.edges() {
        dest.add_edge(&edge.source, &edge.target, &edge.label);
    }
    dest.reindex_all();
}

fn log_type_of(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Process => "process",
        NodeType::FileEntity => "file",
        NodeType::DomainEntity => "domain",
        NodeType::NetworkEntity => "network",
        NodeType::RegistryEntity => "registry",
        NodeType::Story => "story",
        NodeType::Explore => "explore",
    }
}

fn op_type_of(content: &NodeContent) -> String {
    match content {
        NodeContent::File(p) => p.op_type.clone(),
        NodeContent::Domain(p) => p.op_type.clone(),
        NodeContent::Network(p) => p.op_type.clone(),
        NodeContent::Registry(p) => p.op_type.clone(),
        _ => String::new(),
    }
}

/// Converts a finalized graph into the wire-shape `GraphResult` (§6).
pub fn graph_to_result(graph: &Graph) -> GraphResult {
    let mut trace_ids: Vec<String> = graph.nodes().filter_map(|n| n.trace_id.clone()).collect();
    trace_ids.sort();
    trace_ids.dedup();

    let mut host_addresses: Vec<String> = graph.nodes().filter_map(|n| n.host_address.clone()).collect();
    host_addresses.sort();
    host_addresses.dedup();

    let threat_severity = graph
        .nodes()
        .map(|n| n.threat_severity)
        .max()
        .unwrap_or(ThreatSeverity::Unknown);

    let found_root_node = !graph.index.roots.is_empty();

    let mut nodes: Vec<ResultNode> = graph
        .nodes()
        .map(|n| {
            // §6: at most one of `processEntity`/`entity` is ever present.
            // `entity` carries the flat payload struct, not the enclosing
            // `NodeContent` variant, so file/domain/network/registry nodes
            // don't show up on the wire wrapped in their Rust variant tag.
            let (process_entity, story_node, entity) = match &n.content {
                NodeContent::Process(p) => (Some(p.clone()), None, None),
                NodeContent::Story(s) => (None, Some(s.clone()), None),
                NodeContent::Explore => (None, None, None),
                NodeContent::File(p) => (None, None, serde_json::to_value(p).ok()),
                NodeContent::Domain(p) => (None, None, serde_json::to_value(p).ok()),
                NodeContent::Network(p) => (None, None, serde_json::to_value(p).ok()),
                NodeContent::Registry(p) => (None, None, serde_json::to_value(p).ok()),
            };
            ResultNode {
                node_id: n.node_id.clone(),
                log_type: log_type_of(n.node_type).to_string(),
                op_type: op_type_of(&n.content),
                node_threat_severity: n.threat_severity,
                is_chain_node: n.node_type != NodeType::Story,
                host_address: n.host_address.clone().unwrap_or_default(),
                node_color: None,
                chain_node: if n.node_type == NodeType::Story {
                    None
                } else {
                    Some(ChainNodeInfo {
                        is_root: n.is_root,
                        is_broken: n.is_broken,
                        is_alarm: n.is_alarm,
                        is_extension_node: n.is_extension_node,
                        extension_depth: n.extension_depth,
                        is_network_associated: n.is_network_associated,
                        associated_event_id: n.associated_event_id.clone(),
                        process_entity,
                        entity,
                    })
                },
                story_node,
                children_count: graph.out_degree(&n.node_id),
            }
        })
        .collect();
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let mut edges: Vec<Edge> = graph.edges().cloned().collect();
    edges.sort_by(|a, b| (a.source.clone(), a.target.clone()).cmp(&(b.source.clone(), b.target.clone())));

    GraphResult {
        trace_ids,
        host_addresses,
        threat_severity,
        found_root_node,
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NullSearchStore;
    use std::collections::HashMap;

    fn empty_ip_mapping() -> IpMappingRelation {
        IpMappingRelation {
            ip_and_association: HashMap::new(),
            alarm_ips: HashMap::new(),
            logs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn batch_generate_rejects_empty_input() {
        let orch = Orchestrator::new(Arc::new(NullSearchStore), 2);
        let result = orch.batch_generate(&empty_ip_mapping(), &[]).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn batch_generate_degrades_to_empty_result_when_store_has_no_alarms() {
        let mut ip_mapping = empty_ip_mapping();
        ip_mapping.ip_and_association.insert("10.0.0.1".to_string(), true);
        let orch = Orchestrator::new(Arc::new(NullSearchStore), 2);
        let results = orch
            .batch_generate(&ip_mapping, &["10.0.0.1".to_string()])
            .await
            .expect("non-empty input yields Some");
        assert_eq!(results.len(), 1);
        assert!(!results[0].found_root_node);
        assert!(results[0].nodes.is_empty());
    }
}
