//! The emulation engine: one routing engine per eligible topology node.
//!
//! The engine is passed to callers explicitly; there is no global
//! registry. All engines share one [`SimClock`], so advancing it here moves
//! time for every component at once.

use std::collections::BTreeMap;
use std::time::Duration;

use infrasim_columnar::ColumnarEngine;
use infrasim_core::{
    CommandResult, ComponentKind, Connection, CoreResult, EngineContext, Reconfigure,
    RoutingEngine, SimClock, Topology, TopologyNode,
};
use infrasim_kv::KvEngine;
use infrasim_mesh::MeshEngine;
use infrasim_metrics::{render_prometheus, ComponentSnapshot};
use infrasim_queue::QueueEngine;
use infrasim_registry::RegistryEngine;
use tracing::{debug, info, warn};

use crate::diff::{FailedNode, TopologyDiff};
use crate::error::{EmulatorError, EmulatorResult};

/// Build the engine for a node of the given kind.
pub fn build_engine(
    kind: ComponentKind,
    ctx: EngineContext,
    config: &serde_json::Value,
) -> CoreResult<Box<dyn RoutingEngine>> {
    Ok(match kind {
        ComponentKind::KeyValue => Box::new(KvEngine::from_node(ctx, config)?),
        ComponentKind::MessageQueue => Box::new(QueueEngine::from_node(ctx, config)?),
        ComponentKind::Columnar => Box::new(ColumnarEngine::from_node(ctx, config)?),
        ComponentKind::ServiceMesh => Box::new(MeshEngine::from_node(ctx, config)?),
        ComponentKind::ImageRegistry => Box::new(RegistryEngine::from_node(ctx, config)?),
    })
}

struct Slot {
    kind: ComponentKind,
    /// Config the engine was last built or reconfigured from.
    config: serde_json::Value,
    engine: Box<dyn RoutingEngine>,
}

enum Action {
    Create,
    Rebuild,
    Reconfigure,
    Keep,
}

#[derive(Default)]
pub struct EmulationEngine {
    clock: SimClock,
    topology: Topology,
    slots: BTreeMap<String, Slot>,
}

impl EmulationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: SimClock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn component_ids(&self) -> Vec<&str> {
        self.slots.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // ── Topology binding ─────────────────────────────────────────────

    /// Bring the engine set in line with `topology`.
    ///
    /// A structurally invalid topology is rejected before anything changes.
    /// Per-node failures are reported in the diff and leave that node's
    /// previous engine (if any) running.
    pub fn upsert_topology(&mut self, topology: Topology) -> EmulatorResult<TopologyDiff> {
        topology.validate()?;
        let mut diff = TopologyDiff::default();

        let wanted: BTreeMap<&str, ComponentKind> = topology
            .nodes
            .iter()
            .filter_map(|n| n.component_kind().map(|k| (n.id.as_str(), k)))
            .collect();
        let stale: Vec<String> = self
            .slots
            .keys()
            .filter(|id| !wanted.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.slots.remove(&id);
            debug!(component = %id, "engine disposed");
            diff.removed.push(id);
        }

        for node in &topology.nodes {
            let Some(kind) = node.component_kind() else {
                debug!(component = %node.id, kind = %node.kind, "node has no engine");
                continue;
            };
            let action = match self.slots.get(&node.id) {
                None => Action::Create,
                Some(slot) if slot.kind != kind => Action::Rebuild,
                Some(slot) if slot.config == node.config => Action::Keep,
                Some(_) => Action::Reconfigure,
            };
            match action {
                Action::Keep => {}
                Action::Create => match self.install(kind, node) {
                    Ok(()) => diff.created.push(node.id.clone()),
                    Err(failed) => diff.failed.push(failed),
                },
                Action::Rebuild => match self.install(kind, node) {
                    Ok(()) => diff.rebuilt.push(node.id.clone()),
                    Err(failed) => diff.failed.push(failed),
                },
                Action::Reconfigure => match self.reconfigure(node) {
                    Ok(Reconfigure::Applied) => diff.reconfigured.push(node.id.clone()),
                    Ok(Reconfigure::RequiresRebuild) => match self.install(kind, node) {
                        Ok(()) => diff.rebuilt.push(node.id.clone()),
                        Err(failed) => diff.failed.push(failed),
                    },
                    Err(failed) => diff.failed.push(failed),
                },
            }
        }

        self.topology = topology;
        info!(
            engines = self.slots.len(),
            created = diff.created.len(),
            reconfigured = diff.reconfigured.len(),
            rebuilt = diff.rebuilt.len(),
            removed = diff.removed.len(),
            failed = diff.failed.len(),
            "topology applied"
        );
        Ok(diff)
    }

    /// Build a fresh engine for `node`, replacing any existing one only on
    /// success.
    fn install(&mut self, kind: ComponentKind, node: &TopologyNode) -> Result<(), FailedNode> {
        let ctx = EngineContext::new(node.id.clone(), self.clock.clone());
        match build_engine(kind, ctx, &node.config) {
            Ok(engine) => {
                debug!(component = %node.id, %kind, "engine built");
                self.slots.insert(
                    node.id.clone(),
                    Slot {
                        kind,
                        config: node.config.clone(),
                        engine,
                    },
                );
                Ok(())
            }
            Err(e) => {
                warn!(component = %node.id, %kind, error = %e, "engine rejected node configuration");
                Err(FailedNode {
                    id: node.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn reconfigure(&mut self, node: &TopologyNode) -> Result<Reconfigure, FailedNode> {
        let Some(slot) = self.slots.get_mut(&node.id) else {
            return Ok(Reconfigure::RequiresRebuild);
        };
        match slot.engine.reconfigure(&node.config) {
            Ok(outcome) => {
                if outcome == Reconfigure::Applied {
                    slot.config = node.config.clone();
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!(component = %node.id, error = %e, "reconfiguration rejected");
                Err(FailedNode {
                    id: node.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    // ── Engine access ────────────────────────────────────────────────

    pub fn engine(&self, id: &str) -> Option<&dyn RoutingEngine> {
        self.slots.get(id).map(|s| s.engine.as_ref())
    }

    pub fn engine_mut(&mut self, id: &str) -> Option<&mut (dyn RoutingEngine + 'static)> {
        self.slots.get_mut(id).map(|s| s.engine.as_mut())
    }

    /// The engine for `id` if it is of `kind`. Absent is a normal answer
    /// for nodes that have not been bound yet.
    pub fn engine_of_kind(&self, id: &str, kind: ComponentKind) -> Option<&dyn RoutingEngine> {
        self.slots
            .get(id)
            .filter(|s| s.kind == kind)
            .map(|s| s.engine.as_ref())
    }

    /// Like [`engine_of_kind`](Self::engine_of_kind) but explains a miss.
    pub fn require_mut(
        &mut self,
        id: &str,
        kind: ComponentKind,
    ) -> EmulatorResult<&mut (dyn RoutingEngine + 'static)> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| EmulatorError::UnknownComponent(id.to_string()))?;
        if slot.kind != kind {
            return Err(EmulatorError::KindMismatch {
                id: id.to_string(),
                expected: kind,
                actual: slot.kind,
            });
        }
        Ok(slot.engine.as_mut())
    }

    /// Typed access to a concrete engine, e.g. `get_engine::<QueueEngine>`.
    pub fn get_engine<T: RoutingEngine>(&self, id: &str) -> Option<&T> {
        self.slots.get(id)?.engine.as_any().downcast_ref::<T>()
    }

    pub fn get_engine_mut<T: RoutingEngine>(&mut self, id: &str) -> Option<&mut T> {
        self.slots.get_mut(id)?.engine.as_any_mut().downcast_mut::<T>()
    }

    /// Run a command on one component. An unknown id is a failed result.
    pub fn execute(&mut self, id: &str, command: &str, args: &[String]) -> CommandResult {
        match self.slots.get_mut(id) {
            Some(slot) => slot.engine.execute(command, args),
            None => CommandResult::err(EmulatorError::UnknownComponent(id.to_string())),
        }
    }

    // ── Time ─────────────────────────────────────────────────────────

    /// Advance simulated time and let every engine resolve what became due.
    pub fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
        self.tick_all();
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn tick_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.engine.tick();
        }
    }

    // ── Metrics ──────────────────────────────────────────────────────

    /// A snapshot per engine, in component id order.
    pub fn aggregate_metrics(&self) -> Vec<ComponentSnapshot> {
        self.slots
            .iter()
            .map(|(id, slot)| ComponentSnapshot {
                component_id: id.clone(),
                kind: slot.kind.label().to_string(),
                snapshot: slot.engine.metrics(),
            })
            .collect()
    }

    pub fn render_prometheus(&self) -> String {
        render_prometheus(&self.aggregate_metrics())
    }

    pub fn reset_all_stats(&mut self) {
        for slot in self.slots.values_mut() {
            slot.engine.reset_stats();
        }
        info!(engines = self.slots.len(), "statistics reset");
    }

    // ── Connections ──────────────────────────────────────────────────

    /// Edges touching `id`, in either direction.
    pub fn connections_of(&self, id: &str) -> Vec<&Connection> {
        self.topology
            .connections
            .iter()
            .filter(|c| c.source == id || c.target == id)
            .collect()
    }

    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        self.topology.neighbors(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, kind: &str, config: serde_json::Value) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            kind: kind.to_string(),
            label: None,
            config,
        }
    }

    fn topology(nodes: Vec<TopologyNode>) -> Topology {
        Topology::new(nodes, Vec::new())
    }

    // ── Binding ──────────────────────────────────────────────────────

    #[test]
    fn creates_one_engine_per_eligible_node() {
        let mut emu = EmulationEngine::new();
        let diff = emu
            .upsert_topology(topology(vec![
                node("cache", "redis", json!(null)),
                node("jobs", "sqs", json!(null)),
                node("lb", "load-balancer", json!(null)),
            ]))
            .unwrap();
        assert_eq!(diff.created, vec!["cache".to_string(), "jobs".to_string()]);
        assert_eq!(emu.len(), 2);
        assert!(emu.engine("lb").is_none());
        assert!(emu.get_engine::<KvEngine>("cache").is_some());
        assert!(emu.get_engine::<QueueEngine>("cache").is_none());
    }

    #[test]
    fn unchanged_topology_is_a_no_op() {
        let mut emu = EmulationEngine::new();
        let t = topology(vec![node("cache", "redis", json!({"max_memory": "1mb"}))]);
        emu.upsert_topology(t.clone()).unwrap();
        assert!(emu.upsert_topology(t).unwrap().is_empty());
    }

    #[test]
    fn bad_config_is_reported_not_fatal() {
        let mut emu = EmulationEngine::new();
        let diff = emu
            .upsert_topology(topology(vec![
                node("cache", "redis", json!({"max_memory": "lots"})),
                node("olap", "clickhouse", json!(null)),
            ]))
            .unwrap();
        assert_eq!(diff.created, vec!["olap".to_string()]);
        assert_eq!(diff.failed.len(), 1);
        assert_eq!(diff.failed[0].id, "cache");
    }

    #[test]
    fn invalid_topology_changes_nothing() {
        let mut emu = EmulationEngine::new();
        emu.upsert_topology(topology(vec![node("cache", "redis", json!(null))]))
            .unwrap();
        let bad = Topology::new(
            vec![node("cache", "redis", json!(null))],
            vec![Connection {
                id: None,
                source: "cache".into(),
                target: "ghost".into(),
                label: None,
            }],
        );
        assert!(emu.upsert_topology(bad).is_err());
        assert_eq!(emu.len(), 1);
    }

    #[test]
    fn kind_change_rebuilds() {
        let mut emu = EmulationEngine::new();
        emu.upsert_topology(topology(vec![node("x", "redis", json!(null))]))
            .unwrap();
        let diff = emu
            .upsert_topology(topology(vec![node("x", "harbor", json!(null))]))
            .unwrap();
        assert_eq!(diff.rebuilt, vec!["x".to_string()]);
        assert_eq!(emu.engine("x").unwrap().kind(), ComponentKind::ImageRegistry);
    }

    // ── Access ───────────────────────────────────────────────────────

    #[test]
    fn lookups_by_kind() {
        let mut emu = EmulationEngine::new();
        emu.upsert_topology(topology(vec![node("cache", "redis", json!(null))]))
            .unwrap();
        assert!(emu.engine_of_kind("cache", ComponentKind::KeyValue).is_some());
        assert!(emu.engine_of_kind("cache", ComponentKind::Columnar).is_none());
        assert!(matches!(
            emu.require_mut("cache", ComponentKind::Columnar),
            Err(EmulatorError::KindMismatch { .. })
        ));
        assert!(matches!(
            emu.require_mut("nope", ComponentKind::KeyValue),
            Err(EmulatorError::UnknownComponent(_))
        ));
    }

    #[test]
    fn execute_unknown_component_fails_softly() {
        let mut emu = EmulationEngine::new();
        let result = emu.execute("ghost", "PING", &[]);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown component: ghost"));
    }

    #[test]
    fn connections_lookup() {
        let mut emu = EmulationEngine::new();
        emu.upsert_topology(Topology::new(
            vec![
                node("api", "service", json!(null)),
                node("cache", "redis", json!(null)),
                node("jobs", "sqs", json!(null)),
            ],
            vec![
                Connection {
                    id: Some("e1".into()),
                    source: "api".into(),
                    target: "cache".into(),
                    label: None,
                },
                Connection {
                    id: Some("e2".into()),
                    source: "api".into(),
                    target: "jobs".into(),
                    label: None,
                },
            ],
        ))
        .unwrap();
        assert_eq!(emu.connections_of("api").len(), 2);
        assert_eq!(emu.neighbors("cache"), vec!["api"]);
    }
}
