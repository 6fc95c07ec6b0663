//! Topology lifecycle: create, reconfigure in place, rebuild, remove.

use std::io::Write;

use infrasim_core::{ComponentKind, Connection, Topology, TopologyNode};
use infrasim_emulator::{EmulationEngine, EmulatorError};
use infrasim_columnar::ColumnarEngine;
use infrasim_kv::KvEngine;
use infrasim_queue::QueueEngine;
use serde_json::{json, Value};

fn node(id: &str, kind: &str, config: Value) -> TopologyNode {
    TopologyNode {
        id: id.to_string(),
        kind: kind.to_string(),
        label: None,
        config,
    }
}

fn edge(source: &str, target: &str) -> Connection {
    Connection {
        id: None,
        source: source.to_string(),
        target: target.to_string(),
        label: None,
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn stack(cache_config: Value, queue_config: Value) -> Topology {
    Topology::new(
        vec![
            node("api", "service", json!(null)),
            node("cache", "redis", cache_config),
            node("jobs", "sqs", queue_config),
        ],
        vec![edge("api", "cache"), edge("api", "jobs")],
    )
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[test]
fn reconfigure_keeps_state() {
    let mut emu = EmulationEngine::new();
    let diff = emu
        .upsert_topology(stack(json!({"max_memory": "1mb"}), json!({"queues": [{"name": "tasks"}]})))
        .unwrap();
    assert_eq!(diff.created, vec!["cache".to_string(), "jobs".to_string()]);
    assert_eq!(emu.len(), 2);

    emu.execute("cache", "SET", &args(&["session", "abc"]));
    emu.execute("jobs", "SEND", &args(&["tasks", "t1"]));

    let diff = emu
        .upsert_topology(stack(
            json!({"max_memory": "2mb", "max_memory_policy": "allkeys-lru"}),
            json!({"queues": [{"name": "tasks", "visibility_timeout_sec": 5}]}),
        ))
        .unwrap();
    assert_eq!(diff.reconfigured, vec!["cache".to_string(), "jobs".to_string()]);
    assert!(diff.rebuilt.is_empty());

    let kv = emu.get_engine::<KvEngine>("cache").unwrap();
    assert_eq!(kv.get_metrics().max_memory, 2 * 1024 * 1024);
    assert_eq!(emu.execute("cache", "GET", &args(&["session"])).as_str(), Some("abc"));

    let queue = emu.get_engine_mut::<QueueEngine>("jobs").unwrap();
    assert_eq!(queue.get_queue_metrics("tasks").unwrap().approximate_messages, 1);
    assert_eq!(queue.queue("tasks").unwrap().spec().visibility_timeout_sec, 5);
}

#[test]
fn rejected_reconfigure_keeps_previous_engine_state() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(
        json!({"max_memory": "1mb"}),
        json!({"queues": [{"name": "a"}, {"name": "b"}]}),
    ))
    .unwrap();
    emu.execute("cache", "SET", &args(&["session", "abc"]));
    emu.execute("jobs", "SEND", &args(&["b", "keep"]));

    let diff = emu
        .upsert_topology(stack(
            json!({"max_memory_policy": "sometimes"}),
            json!({"queues": [{"name": "a", "visibility_timeout_sec": 99}, {"name": "bad name!"}]}),
        ))
        .unwrap();
    let failed: Vec<&str> = diff.failed.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(failed, vec!["cache", "jobs"]);
    assert!(diff.reconfigured.is_empty());

    let kv = emu.get_engine::<KvEngine>("cache").unwrap();
    assert_eq!(kv.get_metrics().max_memory, 1024 * 1024);
    assert_eq!(emu.execute("cache", "GET", &args(&["session"])).as_str(), Some("abc"));

    let queue = emu.get_engine_mut::<QueueEngine>("jobs").unwrap();
    assert_eq!(queue.list_queues(None), vec!["a", "b"]);
    assert_eq!(queue.queue("a").unwrap().spec().visibility_timeout_sec, 30);
    assert_eq!(queue.get_queue_metrics("b").unwrap().approximate_messages, 1);
}

#[test]
fn identity_change_rebuilds_the_engine() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(json!(null), json!({"queues": [{"name": "tasks"}]})))
        .unwrap();
    emu.execute("jobs", "SEND", &args(&["tasks", "t1"]));

    let diff = emu
        .upsert_topology(stack(
            json!(null),
            json!({"region": "eu-west-1", "queues": [{"name": "tasks"}]}),
        ))
        .unwrap();
    assert_eq!(diff.rebuilt, vec!["jobs".to_string()]);

    let queue = emu.get_engine_mut::<QueueEngine>("jobs").unwrap();
    assert!(queue.get_queue_url("tasks").unwrap().contains("eu-west-1"));
    assert_eq!(queue.get_queue_metrics("tasks").unwrap().approximate_messages, 0);
}

#[test]
fn database_change_rebuilds_columnar() {
    let mut emu = EmulationEngine::new();
    let olap = |db: &str| Topology::new(vec![node("olap", "clickhouse", json!({"database": db}))], vec![]);
    emu.upsert_topology(olap("analytics")).unwrap();
    emu.execute(
        "olap",
        "QUERY",
        &args(&["CREATE TABLE events (id UInt64) ENGINE = MergeTree ORDER BY id"]),
    );
    assert_eq!(emu.get_engine::<ColumnarEngine>("olap").unwrap().tables().len(), 1);

    let diff = emu.upsert_topology(olap("warehouse")).unwrap();
    assert_eq!(diff.rebuilt, vec!["olap".to_string()]);
    assert!(emu.get_engine::<ColumnarEngine>("olap").unwrap().tables().is_empty());
}

#[test]
fn removed_and_ineligible_nodes_are_disposed() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(json!(null), json!(null))).unwrap();

    let diff = emu
        .upsert_topology(Topology::new(
            vec![
                node("api", "service", json!(null)),
                node("cache", "load-balancer", json!(null)),
            ],
            vec![edge("api", "cache")],
        ))
        .unwrap();
    assert_eq!(diff.removed, vec!["cache".to_string(), "jobs".to_string()]);
    assert!(emu.is_empty());

    let missing = emu.execute("jobs", "SEND", &args(&["tasks", "x"]));
    assert_eq!(missing.error.as_deref(), Some("unknown component: jobs"));
}

#[test]
fn typed_lookup_explains_misses() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(json!(null), json!(null))).unwrap();

    assert!(emu.require_mut("cache", ComponentKind::KeyValue).is_ok());
    assert!(matches!(
        emu.require_mut("cache", ComponentKind::MessageQueue),
        Err(EmulatorError::KindMismatch { .. })
    ));
    assert!(matches!(
        emu.require_mut("api", ComponentKind::KeyValue),
        Err(EmulatorError::UnknownComponent(_))
    ));
    assert!(emu.engine_of_kind("jobs", ComponentKind::MessageQueue).is_some());
    assert!(emu.engine_of_kind("jobs", ComponentKind::Columnar).is_none());
}

#[test]
fn connections_follow_the_topology() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(json!(null), json!(null))).unwrap();
    assert_eq!(emu.neighbors("api"), vec!["cache", "jobs"]);
    assert_eq!(emu.connections_of("cache").len(), 1);
    assert!(emu.topology().node("api").is_some());
}

// ── Loading ──────────────────────────────────────────────────────────

#[test]
fn loads_json_and_toml_files() {
    let dir = tempfile::tempdir().unwrap();

    let json_path = dir.path().join("topology.json");
    let mut file = std::fs::File::create(&json_path).unwrap();
    write!(
        file,
        "{}",
        json!({
            "nodes": [
                {"id": "cache", "kind": "redis", "config": {"max_memory": "4mb"}},
                {"id": "web", "kind": "frontend"}
            ],
            "connections": [{"source": "web", "target": "cache"}]
        })
    )
    .unwrap();

    let toml_path = dir.path().join("topology.toml");
    std::fs::write(
        &toml_path,
        r#"
[[nodes]]
id = "jobs"
kind = "sqs"

[nodes.config]
region = "us-west-2"

[[nodes.config.queues]]
name = "orders.fifo"
kind = "fifo"
"#,
    )
    .unwrap();

    let mut emu = EmulationEngine::new();
    let diff = emu
        .upsert_topology(Topology::from_path(&json_path).unwrap())
        .unwrap();
    assert_eq!(diff.created, vec!["cache".to_string()]);
    assert_eq!(
        emu.get_engine::<KvEngine>("cache").unwrap().get_metrics().max_memory,
        4 * 1024 * 1024
    );

    let diff = emu
        .upsert_topology(Topology::from_path(&toml_path).unwrap())
        .unwrap();
    assert_eq!(diff.created, vec!["jobs".to_string()]);
    assert_eq!(diff.removed, vec!["cache".to_string()]);
    let queue = emu.get_engine::<QueueEngine>("jobs").unwrap();
    assert_eq!(queue.list_queues(None), vec!["orders.fifo".to_string()]);

    let yaml = dir.path().join("topology.yaml");
    std::fs::write(&yaml, "nodes: []").unwrap();
    assert!(Topology::from_path(&yaml).is_err());
}

// ── Metrics ──────────────────────────────────────────────────────────

#[test]
fn prometheus_output_labels_every_component() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(json!(null), json!({"queues": [{"name": "tasks"}]})))
        .unwrap();
    emu.execute("cache", "SET", &args(&["k", "v"]));
    emu.execute("cache", "GET", &args(&["k"]));
    emu.advance_ms(1000);

    let snapshots = emu.aggregate_metrics();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].component_id, "cache");
    assert_eq!(snapshots[0].kind, "redis");
    assert_eq!(snapshots[0].snapshot.total_ops, 2);
    assert_eq!(snapshots[1].kind, "sqs");

    let text = emu.render_prometheus();
    assert!(text.contains("component=\"cache\",kind=\"redis\""));
    assert!(text.contains("component=\"jobs\",kind=\"sqs\""));
    assert!(text.contains("# TYPE infrasim_ops_per_second gauge"));
}

#[test]
fn shared_clock_drives_every_engine() {
    let mut emu = EmulationEngine::new();
    emu.upsert_topology(stack(json!(null), json!(null))).unwrap();
    emu.execute("cache", "SET", &args(&["k", "v", "EX", "2"]));
    assert_eq!(emu.clock().now_ms(), 0);

    emu.advance_ms(2500);
    assert_eq!(emu.clock().now_ms(), 2500);
    assert_eq!(emu.execute("cache", "DBSIZE", &[]).as_i64(), Some(0));
    assert!(emu.execute("cache", "GET", &args(&["k"])).value.is_none_or(|v| v.is_null()));
}
