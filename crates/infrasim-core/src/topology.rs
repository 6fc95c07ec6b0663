//! Topology registry types.
//!
//! A topology is the graph the canvas draws: typed nodes carrying
//! kind-specific configuration, plus directed connections between them.
//! The core never persists a topology; it is handed one on every change.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Component kinds that have a simulation engine behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Redis-like cache.
    KeyValue,
    /// SQS-like message queue.
    MessageQueue,
    /// ClickHouse-like analytical database.
    Columnar,
    /// Istio-like service mesh control plane.
    ServiceMesh,
    /// Harbor-like container image registry.
    ImageRegistry,
}

impl ComponentKind {
    /// Resolve a node's declared type to an engine kind.
    ///
    /// Returns `None` for node types that are valid on the canvas but have
    /// no engine (load balancers, generic services, ...).
    pub fn from_node_kind(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "redis" | "cache" | "kv" | "key_value" | "key-value" => Some(Self::KeyValue),
            "sqs" | "queue" | "message_queue" | "message-queue" => Some(Self::MessageQueue),
            "clickhouse" | "columnar" => Some(Self::Columnar),
            "istio" | "service-mesh" | "service_mesh" | "servicemesh" | "mesh" => {
                Some(Self::ServiceMesh)
            }
            "harbor" | "registry" | "image_registry" | "image-registry" => {
                Some(Self::ImageRegistry)
            }
            _ => None,
        }
    }

    /// Canonical product label used in logs and metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            Self::KeyValue => "redis",
            Self::MessageQueue => "sqs",
            Self::Columnar => "clickhouse",
            Self::ServiceMesh => "service-mesh",
            Self::ImageRegistry => "harbor",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One node on the canvas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyNode {
    /// Stable component id.
    pub id: String,
    /// Declared node type ("redis", "sqs", "load-balancer", ...).
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Kind-specific configuration, decoded by the engine that owns the node.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl TopologyNode {
    /// Engine kind for this node, if it has one.
    pub fn component_kind(&self) -> Option<ComponentKind> {
        ComponentKind::from_node_kind(&self.kind)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// The full topology graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Topology {
    #[serde(default)]
    pub nodes: Vec<TopologyNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Topology {
    pub fn new(nodes: Vec<TopologyNode>, connections: Vec<Connection>) -> Self {
        Self { nodes, connections }
    }

    /// Load a topology from a `.json` or `.toml` file.
    pub fn from_path(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let topology = match ext.as_str() {
            "json" => Self::from_json(&content)?,
            "toml" => Self::from_toml(&content)?,
            other => return Err(CoreError::UnsupportedFormat(other.to_string())),
        };
        topology.validate()?;
        debug!(
            path = %path.display(),
            nodes = topology.nodes.len(),
            connections = topology.connections.len(),
            "topology file loaded"
        );
        Ok(topology)
    }

    pub fn from_json(content: &str) -> CoreResult<Self> {
        serde_json::from_str(content).map_err(|e| CoreError::Parse(e.to_string()))
    }

    pub fn from_toml(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|e| CoreError::Parse(e.to_string()))
    }

    /// Check structural integrity: unique node ids, edges between known nodes.
    pub fn validate(&self) -> CoreResult<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(CoreError::InvalidTopology("node with empty id".to_string()));
            }
            if !ids.insert(node.id.as_str()) {
                return Err(CoreError::InvalidTopology(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }
        for conn in &self.connections {
            for end in [&conn.source, &conn.target] {
                if !ids.contains(end.as_str()) {
                    return Err(CoreError::InvalidTopology(format!(
                        "connection references unknown node: {end}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of nodes connected to `id` in either direction.
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .connections
            .iter()
            .filter_map(|c| {
                if c.source == id {
                    Some(c.target.as_str())
                } else if c.target == id {
                    Some(c.source.as_str())
                } else {
                    None
                }
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
