//! Core data model: nodes, edges, raw telemetry records, and the
//! multi-dimensional index a [`crate::graph::Graph`] keeps over its nodes.
//!
//! Grounded on the field-by-field struct style of `ai_analysis.rs`
//! (`ProcessSummary`, `FileOp`, `NetworkOp`, `RegistryOp`) but reworked from
//! "flat summary for an LLM prompt" into "graph vertex with sticky identity
//! fields", per the chain-graph spec.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-node log cap (§3 MAX_LOGS_PER_NODE). Excess incoming logs are
/// dropped; `Node::dropped_log_count` tracks how many.
pub const MAX_LOGS_PER_NODE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatSeverity {
    Unknown,
    Low,
    Medium,
    High,
}

impl ThreatSeverity {
    /// Accepts "HIGH"/"高", case-insensitive, and any of their English or
    /// Chinese aliases used in raw telemetry (Design Notes "Enum vs string
    /// severities" — normalize once at ingest).
    pub fn parse(raw: &str) -> ThreatSeverity {
        let s = raw.trim().to_lowercase();
        match s.as_str() {
            "high" | "高" | "严重" | "critical" => ThreatSeverity::High,
            "medium" | "中" | "中等" | "moderate" => ThreatSeverity::Medium,
            "low" | "低" => ThreatSeverity::Low,
            _ => ThreatSeverity::Unknown,
        }
    }
}

impl Default for ThreatSeverity {
    fn default() -> Self {
        ThreatSeverity::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Process,
    FileEntity,
    DomainEntity,
    NetworkEntity,
    RegistryEntity,
    Story,
    Explore,
}

/// Entity-kind-specific payload. At most one of these is carried per node,
/// and only `Process` nodes carry `ProcessPayload`. The wire format's
/// "processEntity XOR entity" rule (§6) is enforced where `NodeContent` gets
/// converted into a `ResultNode` (`orchestrator::graph_to_result`), which
/// unpacks the active variant's flat payload rather than serializing this
/// enum directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeContent {
    Process(ProcessPayload),
    File(FileEntityPayload),
    Domain(DomainEntityPayload),
    Network(NetworkEntityPayload),
    Registry(RegistryEntityPayload),
    Story(StoryPayload),
    Explore,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessPayload {
    pub process_name: Option<String>,
    pub command_line: Option<String>,
    pub image: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntityPayload {
    pub file_md5: Option<String>,
    pub filename: Option<String>,
    pub op_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainEntityPayload {
    pub request_domain: String,
    pub op_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEntityPayload {
    pub dest_address: String,
    pub op_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryEntityPayload {
    pub target_object: String,
    pub op_type: String,
}

/// Network-side story node role, carried through from the network-bridge
/// input graph (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryRole {
    Attacker,
    Victim,
    Server,
    Relay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryPayload {
    pub role: StoryRole,
    pub ip: String,
    /// `"srcNode"` marks a node eligible for role correction (§4.10).
    pub story_node_type: String,
}

/// A vertex in the process-chain graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub node_type: NodeType,
    pub trace_id: Option<String>,
    pub host_address: Option<String>,
    pub parent_process_guid: Option<String>,
    #[serde(rename = "virtual")]
    pub virtual_: bool,
    pub is_root: bool,
    pub is_broken: bool,
    pub is_alarm: bool,
    pub created_by_event_id: Option<String>,
    pub alarms: Vec<RawAlarm>,
    pub logs: Vec<RawLog>,
    pub threat_severity: ThreatSeverity,
    /// True for the virtual-root-parent's synthetic "create" record and for
    /// any other synthesized record; the latest-record selector prefers
    /// non-synthetic data (Design Notes "Virtual-log marker").
    pub synthetic: bool,
    pub is_extension_node: bool,
    pub extension_depth: Option<u32>,
    pub is_network_associated: bool,
    pub associated_event_id: Option<String>,
    pub content: NodeContent,
    #[serde(skip)]
    pub dropped_log_count: u32,
}

impl Node {
    pub fn new_process(node_id: impl Into<String>, virtual_: bool) -> Node {
        Node {
            node_id: node_id.into(),
            node_type: NodeType::Process,
            trace_id: None,
            host_address: None,
            parent_process_guid: None,
            virtual_,
            is_root: false,
            is_broken: false,
            is_alarm: false,
            created_by_event_id: None,
            alarms: Vec::new(),
            logs: Vec::new(),
            threat_severity: ThreatSeverity::Unknown,
            synthetic: virtual_,
            is_extension_node: false,
            extension_depth: None,
            is_network_associated: false,
            associated_event_id: None,
            content: NodeContent::Process(ProcessPayload::default()),
            dropped_log_count: 0,
        }
    }

    pub fn new_entity(node_id: impl Into<String>, node_type: NodeType, content: NodeContent) -> Node {
        Node {
            node_id: node_id.into(),
            node_type,
            trace_id: None,
            host_address: None,
            parent_process_guid: None,
            virtual_: false,
            is_root: false,
            is_broken: false,
            is_alarm: false,
            created_by_event_id: None,
            alarms: Vec::new(),
            logs: Vec::new(),
            threat_severity: ThreatSeverity::Unknown,
            synthetic: false,
            is_extension_node: false,
            extension_depth: None,
            is_network_associated: false,
            associated_event_id: None,
            content,
            dropped_log_count: 0,
        }
    }

    /// Sticky assignment of `trace_id`/`host_address`: only ever set from
    /// the first *non-virtual* record that supplies them (Design Notes
    /// "Sticky fields").
    fn maybe_stick_identity(&mut self, trace_id: &str, host_address: &str, is_virtual_source: bool) {
        if is_virtual_source {
            return;
        }
        if self.trace_id.is_none() && !trace_id.is_empty() {
            self.trace_id = Some(trace_id.to_string());
        }
        if self.host_address.is_none() && !host_address.is_empty() {
            self.host_address = Some(host_address.to_string());
        }
    }

    pub fn record_alarm(&mut self, alarm: RawAlarm) {
        self.maybe_stick_identity(&alarm.trace_id, &alarm.host_address, false);
        self.is_alarm = true;
        if alarm.threat_severity > self.threat_severity {
            self.threat_severity = alarm.threat_severity;
        }
        self.alarms.push(alarm);
    }

    pub fn record_log(&mut self, log: RawLog, is_virtual_source: bool) {
        self.maybe_stick_identity(&log.trace_id, &log.host_address, is_virtual_source);
        if self.logs.len() >= MAX_LOGS_PER_NODE {
            self.dropped_log_count += 1;
            return;
        }
        self.logs.push(log);
    }

    /// Number of alarms/logs whose `event_id` matches the association set,
    /// used by the smart pruner's must-keep rule and the entity filter's
    /// network-association priority.
    pub fn has_network_associated_event(&self, associated: &HashSet<String>) -> bool {
        if associated.is_empty() {
            return false;
        }
        self.alarms.iter().any(|a| associated.contains(&a.event_id))
            || self.logs.iter().any(|l| associated.contains(&l.event_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub label: String,
}

impl Edge {
    pub const LABEL_PROCESS_CREATE: &'static str = "process create";
    pub const LABEL_FILE_CREATE: &'static str = "file create";
    pub const LABEL_FILE_MODIFY: &'static str = "file modify";
    pub const LABEL_FILE_DELETE: &'static str = "file delete";
    pub const LABEL_NETWORK_CONNECT: &'static str = "network connect";
    pub const LABEL_DOMAIN_QUERY: &'static str = "domain query";
    pub const LABEL_REGISTRY_OP: &'static str = "registry op";
    pub const LABEL_NET_TO_ENDPOINT: &'static str = "net-to-endpoint bridge";
    pub const LABEL_CONNECT: &'static str = "connect";

    pub fn new(source: impl Into<String>, target: impl Into<String>, label: impl Into<String>) -> Edge {
        Edge {
            source: source.into(),
            target: target.into(),
            label: label.into(),
        }
    }
}

/// Multi-dimensional secondary index kept alongside a `Graph`'s node map.
/// Owned exclusively by the enclosing graph (Design Notes "Back-references"
/// / "Shared resource" in §5: no locking needed since each host's graph is
/// independent).
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    pub by_trace: HashMap<String, Vec<String>>,
    pub by_host: HashMap<String, Vec<String>>,
    pub roots: HashSet<String>,
    pub broken: HashSet<String>,
    pub alarm_nodes: HashSet<String>,
}

impl NodeIndex {
    pub fn note_node(&mut self, node: &Node) {
        if let Some(trace_id) = &node.trace_id {
            let list = self.by_trace.entry(trace_id.clone()).or_default();
            if !list.contains(&node.node_id) {
                list.push(node.node_id.clone());
            }
        }
        if let Some(host) = &node.host_address {
            let list = self.by_host.entry(host.clone()).or_default();
            if !list.contains(&node.node_id) {
                list.push(node.node_id.clone());
            }
        }
        if node.is_root {
            self.roots.insert(node.node_id.clone());
        } else {
            self.roots.remove(&node.node_id);
        }
        if node.is_broken {
            self.broken.insert(node.node_id.clone());
        } else {
            self.broken.remove(&node.node_id);
        }
        if node.is_alarm {
            self.alarm_nodes.insert(node.node_id.clone());
        } else {
            self.alarm_nodes.remove(&node.node_id);
        }
    }

    pub fn forget_node(&mut self, node_id: &str) {
        for list in self.by_trace.values_mut() {
            list.retain(|id| id != node_id);
        }
        for list in self.by_host.values_mut() {
            list.retain(|id| id != node_id);
        }
        self.roots.remove(node_id);
        self.broken.remove(node_id);
        self.alarm_nodes.remove(node_id);
    }
}

/// A raw security-alarm record as delivered by the external search store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlarm {
    pub event_id: String,
    pub trace_id: String,
    pub host_address: String,
    pub process_guid: String,
    #[serde(default)]
    pub parent_process_guid: String,
    pub alarm_name: String,
    #[serde(default, deserialize_with = "deserialize_severity")]
    pub threat_severity: ThreatSeverity,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub collector_receipt_time: i64,
    #[serde(default)]
    pub log_type: String,
    #[serde(default)]
    pub op_type: String,
    #[serde(default)]
    pub parent_process_name: String,
    #[serde(default)]
    pub parent_user: String,
    #[serde(default)]
    pub parent_image: String,
    #[serde(default)]
    pub parent_command_line: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub file_md5: Option<String>,
    #[serde(default)]
    pub target_filename: Option<String>,
    #[serde(default)]
    pub request_domain: Option<String>,
    #[serde(default)]
    pub dest_address: Option<String>,
    #[serde(default)]
    pub target_object: Option<String>,
}

/// A raw endpoint-log record as delivered by the external search store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub event_id: String,
    pub trace_id: String,
    pub host_address: String,
    pub process_guid: String,
    #[serde(default)]
    pub parent_process_guid: String,
    pub log_type: String,
    #[serde(default)]
    pub op_type: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub parent_process_name: String,
    #[serde(default)]
    pub parent_user: String,
    #[serde(default)]
    pub parent_image: String,
    #[serde(default)]
    pub parent_command_line: String,
    #[serde(default)]
    pub file_md5: Option<String>,
    #[serde(default)]
    pub target_filename: Option<String>,
    #[serde(default)]
    pub request_domain: Option<String>,
    #[serde(default)]
    pub dest_address: Option<String>,
    #[serde(default)]
    pub target_object: Option<String>,
}

fn deserialize_severity<'de, D>(deserializer: D) -> Result<ThreatSeverity, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(ThreatSeverity::parse(&raw))
}

/// Per-request IP association context (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMappingRelation {
    pub ip_and_association: HashMap<String, bool>,
    pub alarm_ips: HashMap<String, String>,
    pub logs: HashMap<String, String>,
}

impl IpMappingRelation {
    /// Union of alarm/log event ids considered "network-associated" for
    /// this request — consulted by the pruner's must-keep rule and the
    /// entity filter's priority ordering.
    pub fn associated_event_ids(&self) -> HashSet<String> {
        self.alarm_ips
            .values()
            .chain(self.logs.values())
            .cloned()
            .collect()
    }

    pub fn has_association(&self, ip: &str) -> bool {
        self.ip_and_association.get(ip).copied().unwrap_or(false)
    }
}

/// Emitted result (§3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResult {
    pub trace_ids: Vec<String>,
    pub host_addresses: Vec<String>,
    pub threat_severity: ThreatSeverity,
    pub found_root_node: bool,
    pub nodes: Vec<ResultNode>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultNode {
    pub node_id: String,
    pub log_type: String,
    pub op_type: String,
    pub node_threat_severity: ThreatSeverity,
    pub is_chain_node: bool,
    pub host_address: String,
    pub node_color: Option<String>,
    pub chain_node: Option<ChainNodeInfo>,
    pub story_node: Option<StoryPayload>,
    pub children_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainNodeInfo {
    pub is_root: bool,
    pub is_broken: bool,
    pub is_alarm: bool,
    pub is_extension_node: bool,
    pub extension_depth: Option<u32>,
    pub is_network_associated: bool,
    pub associated_event_id: Option<String>,
    pub process_entity: Option<ProcessPayload>,
    pub entity: Option<serde_json::Value>,
}

/// Computes the entity `nodeId` hash fragment from its dedup key, per §3:
/// `processGuid + "_" + TYPE + "_" + hash(key)`.
pub fn entity_node_id(process_guid: &str, type_tag: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let short_hash = hex_prefix(&digest, 16);
    format!("{}_{}_{}", process_guid, type_tag, short_hash)
}

/// Computes `VIRTUAL_ROOT_PARENT_<hash>` for the root-self-reference edge
/// case (§4.2: `processGuid == parentProcessGuid`), hashing
/// `parentProcessGuid + "_ROOT_PARENT"` so the synthesized parent never
/// collides with the child it stands in for (Design Notes
/// "Naming-collision edge cases").
pub fn virtual_root_parent_id(parent_process_guid: &str) -> String {
    let key = format!("{}_ROOT_PARENT", parent_process_guid);
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!("VIRTUAL_ROOT_PARENT_{}", hex_prefix(&digest, 16))
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for b in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{:02x}", b));
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parses_case_insensitive_and_chinese() {
        assert_eq!(ThreatSeverity::parse("HIGH"), ThreatSeverity::High);
        assert_eq!(ThreatSeverity::parse("high"), ThreatSeverity::High);
        assert_eq!(ThreatSeverity::parse("高"), ThreatSeverity::High);
        assert_eq!(ThreatSeverity::parse("nonsense"), ThreatSeverity::Unknown);
    }

    #[test]
    fn severity_ordering_places_high_above_medium_above_low() {
        assert!(ThreatSeverity::High > ThreatSeverity::Medium);
        assert!(ThreatSeverity::Medium > ThreatSeverity::Low);
        assert!(ThreatSeverity::Low > ThreatSeverity::Unknown);
    }

    #[test]
    fn sticky_identity_ignores_virtual_sources() {
        let mut node = Node::new_process("p1", false);
        let mut log = RawLog::default();
        log.trace_id = "T1".to_string();
        log.host_address = "10.0.0.5".to_string();
        node.record_log(log, true);
        assert!(node.trace_id.is_none());
        assert!(node.host_address.is_none());
    }

    #[test]
    fn sticky_identity_set_once_from_first_real_record() {
        let mut node = Node::new_process("p1", false);
        let mut log1 = RawLog::default();
        log1.trace_id = "T1".to_string();
        log1.host_address = "10.0.0.5".to_string();
        node.record_log(log1, false);

        let mut log2 = RawLog::default();
        log2.trace_id = "T2".to_string();
        log2.host_address = "10.0.0.9".to_string();
        node.record_log(log2, false);

        assert_eq!(node.trace_id.as_deref(), Some("T1"));
        assert_eq!(node.host_address.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn log_cap_drops_excess_and_counts_them() {
        let mut node = Node::new_process("p1", false);
        for i in 0..(MAX_LOGS_PER_NODE + 5) {
            let mut log = RawLog::default();
            log.event_id = format!("E{}", i);
            node.record_log(log, false);
        }
        assert_eq!(node.logs.len(), MAX_LOGS_PER_NODE);
        assert_eq!(node.dropped_log_count, 5);
    }

    #[test]
    fn entity_node_id_is_deterministic_per_key() {
        let a = entity_node_id("P1", "FILE", "md5|name");
        let b = entity_node_id("P1", "FILE", "md5|name");
        let c = entity_node_id("P1", "FILE", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
