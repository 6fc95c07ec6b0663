//! Prometheus text exposition format.
//!
//! Renders component snapshots into the Prometheus text exposition format
//! so a simulated topology can be scraped like a real one.

use crate::accumulator::ComponentSnapshot;

/// Render a list of component snapshots into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `component` and `kind` labels.
pub fn render_prometheus(snapshots: &[ComponentSnapshot]) -> String {
    let mut out = String::new();

    gauge(
        &mut out,
        "infrasim_ops_per_second",
        "Operations per simulated second.",
        snapshots,
        |s| format!("{:.2}", s.snapshot.throughput),
    );
    gauge(
        &mut out,
        "infrasim_latency_p50_ms",
        "P50 latency in milliseconds.",
        snapshots,
        |s| format!("{:.3}", s.snapshot.latency_p50_ms),
    );
    gauge(
        &mut out,
        "infrasim_latency_p99_ms",
        "P99 latency in milliseconds.",
        snapshots,
        |s| format!("{:.3}", s.snapshot.latency_p99_ms),
    );
    gauge(
        &mut out,
        "infrasim_error_rate",
        "Error rate (0.0-1.0).",
        snapshots,
        |s| format!("{:.4}", s.snapshot.error_rate),
    );
    gauge(
        &mut out,
        "infrasim_hit_rate",
        "Lookup hit rate (0.0-1.0).",
        snapshots,
        |s| format!("{:.4}", s.snapshot.hit_rate),
    );

    out.push_str("# HELP infrasim_ops_total Operations executed since the last reset.\n");
    out.push_str("# TYPE infrasim_ops_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "infrasim_ops_total{{{}}} {}\n",
            labels(s),
            s.snapshot.total_ops
        ));
    }

    out.push_str("# HELP infrasim_network_bytes_total Simulated network bytes.\n");
    out.push_str("# TYPE infrasim_network_bytes_total counter\n");
    for s in snapshots {
        out.push_str(&format!(
            "infrasim_network_bytes_total{{{},direction=\"in\"}} {}\n",
            labels(s),
            s.snapshot.network_bytes_in
        ));
        out.push_str(&format!(
            "infrasim_network_bytes_total{{{},direction=\"out\"}} {}\n",
            labels(s),
            s.snapshot.network_bytes_out
        ));
    }

    out
}

fn gauge(
    out: &mut String,
    name: &str,
    help: &str,
    snapshots: &[ComponentSnapshot],
    value: impl Fn(&ComponentSnapshot) -> String,
) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    for s in snapshots {
        out.push_str(&format!("{name}{{{}}} {}\n", labels(s), value(s)));
    }
}

fn labels(s: &ComponentSnapshot) -> String {
    format!("component=\"{}\",kind=\"{}\"", s.component_id, s.kind)
}
