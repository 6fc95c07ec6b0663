//! Edge validation for mesh graphs.
//!
//! The engine only accepts a [`ValidatedMeshGraph`], which can only be
//! produced here, so an invalid graph never reaches engine state. Nothing
//! is normalized: a graph either passes as written or is rejected with
//! every issue found.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use serde::Serialize;

use crate::error::{MeshError, MeshResult};
use crate::graph::{host_to_key, HttpRoute, MeshGraph};

/// One problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Resource kind, e.g. `VirtualService`.
    pub kind: &'static str,
    /// `namespace/name` of the offending resource.
    pub resource: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.resource, self.message)
    }
}

/// A mesh graph that passed [`MeshGraph::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidatedMeshGraph(MeshGraph);

impl ValidatedMeshGraph {
    pub fn into_inner(self) -> MeshGraph {
        self.0
    }
}

impl Deref for ValidatedMeshGraph {
    type Target = MeshGraph;

    fn deref(&self) -> &MeshGraph {
        &self.0
    }
}

impl TryFrom<MeshGraph> for ValidatedMeshGraph {
    type Error = MeshError;

    fn try_from(graph: MeshGraph) -> MeshResult<Self> {
        graph.validate()
    }
}

struct Issues(Vec<ValidationIssue>);

impl Issues {
    fn push(&mut self, kind: &'static str, namespace: &str, name: &str, message: impl Into<String>) {
        self.0.push(ValidationIssue {
            kind,
            resource: format!("{namespace}/{name}"),
            message: message.into(),
        });
    }

    /// Flag empty names and repeated `namespace/name` pairs.
    fn check_names<'a>(&mut self, kind: &'static str, ids: impl Iterator<Item = (&'a str, &'a str)>) {
        let mut seen = BTreeSet::new();
        for (namespace, name) in ids {
            if name.is_empty() {
                self.push(kind, namespace, name, "name must not be empty");
            } else if !seen.insert((namespace, name)) {
                self.push(kind, namespace, name, "duplicate name in namespace");
            }
        }
    }
}

impl MeshGraph {
    /// Check every resource; return the graph as validated or every issue
    /// found.
    pub fn validate(self) -> MeshResult<ValidatedMeshGraph> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(ValidatedMeshGraph(self))
        } else {
            Err(MeshError::Invalid(issues))
        }
    }

    /// All validation issues, empty when the graph is valid.
    pub fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Issues(Vec::new());

        issues.check_names(
            "Service",
            self.services.iter().map(|s| (s.namespace.as_str(), s.name.as_str())),
        );
        for s in &self.services {
            if s.healthy_pod_count > s.pod_count {
                issues.push("Service", &s.namespace, &s.name, "healthy pods exceed pod count");
            }
            if !(0.0..=1.0).contains(&s.error_rate) {
                issues.push("Service", &s.namespace, &s.name, "error_rate must be between 0 and 1");
            }
            if s.base_latency_ms < 0.0 {
                issues.push("Service", &s.namespace, &s.name, "latency must not be negative");
            }
        }

        issues.check_names(
            "VirtualService",
            self.virtual_services
                .iter()
                .map(|v| (v.namespace.as_str(), v.name.as_str())),
        );
        for vs in &self.virtual_services {
            if vs.hosts.is_empty() || vs.hosts.iter().any(|h| h.trim().is_empty()) {
                issues.push("VirtualService", &vs.namespace, &vs.name, "hosts must be non-empty");
            }
            for (i, route) in vs.http.iter().enumerate() {
                for message in self.route_issues(route, &vs.namespace) {
                    issues.push(
                        "VirtualService",
                        &vs.namespace,
                        &vs.name,
                        format!("http[{i}]: {message}"),
                    );
                }
            }
        }

        issues.check_names(
            "DestinationRule",
            self.destination_rules
                .iter()
                .map(|d| (d.namespace.as_str(), d.name.as_str())),
        );
        for dr in &self.destination_rules {
            if dr.host.trim().is_empty() {
                issues.push("DestinationRule", &dr.namespace, &dr.name, "host must be non-empty");
            }
            let mut subsets = BTreeSet::new();
            for subset in &dr.subsets {
                if subset.name.is_empty() || !subsets.insert(subset.name.as_str()) {
                    issues.push(
                        "DestinationRule",
                        &dr.namespace,
                        &dr.name,
                        format!("subset names must be unique and non-empty ('{}')", subset.name),
                    );
                }
            }
            if let Some(od) = &dr.traffic_policy.outlier_detection {
                if od.consecutive_errors == 0 {
                    issues.push(
                        "DestinationRule",
                        &dr.namespace,
                        &dr.name,
                        "outlier detection needs consecutive_errors >= 1",
                    );
                }
            }
        }

        issues.check_names(
            "Gateway",
            self.gateways.iter().map(|g| (g.namespace.as_str(), g.name.as_str())),
        );
        for gw in &self.gateways {
            if gw.servers.iter().any(|s| s.hosts.is_empty()) {
                issues.push("Gateway", &gw.namespace, &gw.name, "every server needs at least one host");
            }
        }

        issues.check_names(
            "PeerAuthentication",
            self.peer_authentications
                .iter()
                .map(|p| (p.namespace.as_str(), p.name.as_str())),
        );
        issues.check_names(
            "AuthorizationPolicy",
            self.authorization_policies
                .iter()
                .map(|p| (p.namespace.as_str(), p.name.as_str())),
        );

        issues.check_names(
            "ServiceEntry",
            self.service_entries
                .iter()
                .map(|s| (s.namespace.as_str(), s.name.as_str())),
        );
        for se in &self.service_entries {
            if se.hosts.is_empty() || se.hosts.iter().any(|h| h.trim().is_empty()) {
                issues.push("ServiceEntry", &se.namespace, &se.name, "hosts must be non-empty");
            }
        }

        issues.check_names(
            "Sidecar",
            self.sidecars.iter().map(|s| (s.namespace.as_str(), s.name.as_str())),
        );

        issues.0
    }

    fn route_issues(&self, route: &HttpRoute, namespace: &str) -> Vec<String> {
        let mut out = Vec::new();
        if route.route.is_empty() {
            out.push("route needs at least one destination".to_string());
            return out;
        }
        for dest in &route.route {
            if dest.destination.host.trim().is_empty() {
                out.push("destination host must be non-empty".to_string());
            }
            if dest.weight > 100 {
                out.push(format!(
                    "weight {} for '{}' is outside 0..=100",
                    dest.weight,
                    dest.destination.label()
                ));
            }
            if let Some(subset) = &dest.destination.subset {
                let key = host_to_key(&dest.destination.host, namespace);
                let defined = self
                    .destination_rule_for(&key)
                    .is_some_and(|dr| dr.subsets.iter().any(|s| &s.name == subset));
                if !defined {
                    out.push(format!(
                        "subset '{subset}' of '{}' is not defined by any destination rule",
                        dest.destination.host
                    ));
                }
            }
        }
        if route.route.len() > 1 {
            let total: u64 = route.route.iter().map(|d| u64::from(d.weight)).sum();
            if total != 100 {
                out.push(format!("route weights sum to {total}, expected 100"));
            }
        }
        if let Some(fault) = &route.fault {
            if !(0.0..=100.0).contains(&fault.abort_percent)
                || !(0.0..=100.0).contains(&fault.delay_percent)
            {
                out.push("fault percentages must be between 0 and 100".to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        Destination, DestinationRule, OutlierDetection, RouteDestination, Service, Subset,
        TrafficPolicy, VirtualService,
    };

    fn weighted(weights: &[u32]) -> MeshGraph {
        let route = weights
            .iter()
            .enumerate()
            .map(|(i, w)| RouteDestination {
                destination: Destination {
                    host: format!("svc-{i}"),
                    ..Destination::default()
                },
                weight: *w,
            })
            .collect();
        MeshGraph {
            virtual_services: vec![VirtualService {
                name: "vs".into(),
                hosts: vec!["svc".into()],
                http: vec![HttpRoute {
                    route,
                    ..HttpRoute::default()
                }],
                ..VirtualService::default()
            }],
            ..MeshGraph::default()
        }
    }

    // ── Weights ──────────────────────────────────────────────────────

    #[test]
    fn weights_summing_to_100_pass() {
        assert!(weighted(&[90, 10]).validate().is_ok());
        assert!(weighted(&[50, 25, 25]).validate().is_ok());
    }

    #[test]
    fn weights_summing_to_90_are_rejected() {
        let err = weighted(&[80, 10]).validate().unwrap_err();
        match &err {
            MeshError::Invalid(issues) => {
                assert_eq!(issues.len(), 1);
                assert!(issues[0].message.contains("sum to 90"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("default/vs"));
    }

    #[test]
    fn oversized_weights_are_reported_not_summed_past_u32() {
        let err = weighted(&[u32::MAX, 1]).validate().unwrap_err();
        let MeshError::Invalid(issues) = &err else {
            panic!("unexpected {err:?}");
        };
        assert!(issues.iter().any(|i| i.message.contains("outside 0..=100")));
        assert!(issues.iter().any(|i| i.message.contains("sum to 4294967296")));
    }

    #[test]
    fn single_destination_needs_no_weight() {
        assert!(weighted(&[0]).validate().is_ok());
        assert!(weighted(&[100]).validate().is_ok());
        assert!(weighted(&[150]).validate().is_err());
    }

    // ── Resources ────────────────────────────────────────────────────

    #[test]
    fn duplicate_names_rejected_per_namespace() {
        let graph = MeshGraph {
            services: vec![
                Service::new("a", "default"),
                Service::new("a", "default"),
                Service::new("a", "prod"),
            ],
            ..MeshGraph::default()
        };
        let issues = graph.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].resource, "default/a");
    }

    #[test]
    fn empty_hosts_rejected() {
        let graph = MeshGraph {
            virtual_services: vec![VirtualService {
                name: "vs".into(),
                ..VirtualService::default()
            }],
            ..MeshGraph::default()
        };
        assert!(graph.validate().is_err());
    }

    #[test]
    fn subsets_must_be_declared() {
        let mut graph = weighted(&[100]);
        graph.virtual_services[0].http[0].route[0].destination.subset = Some("v2".into());
        assert!(graph.clone().validate().is_err());

        graph.destination_rules.push(DestinationRule {
            name: "dr".into(),
            host: "svc-0".into(),
            subsets: vec![Subset {
                name: "v2".into(),
                ..Subset::default()
            }],
            traffic_policy: TrafficPolicy {
                outlier_detection: Some(OutlierDetection::default()),
                ..TrafficPolicy::default()
            },
            ..DestinationRule::default()
        });
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn unhealthy_counts_rejected() {
        let graph = MeshGraph {
            services: vec![Service::new("a", "default").with_pods(1, 2)],
            ..MeshGraph::default()
        };
        assert!(graph.validate().is_err());
    }
}
