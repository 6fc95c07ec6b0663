//! The declarative mesh graph.
//!
//! These types mirror the Istio resources the mesh panel edits, reduced to
//! the fields that influence routing. The graph is plain data: it is only
//! accepted by the engine after [`MeshGraph::validate`](crate::validate)
//! has turned it into a [`ValidatedMeshGraph`](crate::ValidatedMeshGraph).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// A service backed by a set of pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub pod_count: u32,
    pub healthy_pod_count: u32,
    /// Mean response time of one healthy pod.
    pub base_latency_ms: f64,
    /// Probability (0.0–1.0) that a request fails with a 503.
    pub error_rate: f64,
    pub labels: BTreeMap<String, String>,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            pod_count: 1,
            healthy_pod_count: 1,
            base_latency_ms: 5.0,
            error_rate: 0.0,
            labels: BTreeMap::new(),
        }
    }
}

impl Service {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_pods(mut self, pods: u32, healthy: u32) -> Self {
        self.pod_count = pods;
        self.healthy_pod_count = healthy;
        self
    }

    pub fn with_latency(mut self, ms: f64) -> Self {
        self.base_latency_ms = ms;
        self
    }

    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = rate;
        self
    }

    /// `name.namespace`, the key stats are kept under.
    pub fn key(&self) -> String {
        service_key(&self.name, &self.namespace)
    }
}

pub fn service_key(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}")
}

/// Resolve a host (`reviews`, `reviews.prod`, `reviews.prod.svc.cluster.local`)
/// to a service key, defaulting the namespace.
pub fn host_to_key(host: &str, default_ns: &str) -> String {
    let mut labels = host.split('.');
    let name = labels.next().unwrap_or_default();
    let namespace = labels.next().unwrap_or(default_ns);
    service_key(name, namespace)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpMatch {
    pub uri_prefix: Option<String>,
    pub uri_exact: Option<String>,
    /// Exact header values that must all be present.
    pub headers: BTreeMap<String, String>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Destination {
    pub host: String,
    pub subset: Option<String>,
    pub port: Option<u16>,
}

impl Destination {
    /// Label used in traffic breakdowns, `host` or `host:subset`.
    pub fn label(&self) -> String {
        match &self.subset {
            Some(subset) => format!("{}:{}", self.host, subset),
            None => self.host.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteDestination {
    pub destination: Destination,
    /// Relative weight; ignored for a single destination.
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Retries {
    pub attempts: u32,
    pub per_try_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjection {
    pub delay_ms: u64,
    /// Share of requests (0–100) that get `delay_ms` added.
    pub delay_percent: f64,
    pub abort_status: u16,
    /// Share of requests (0–100) aborted with `abort_status`.
    pub abort_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRoute {
    pub name: Option<String>,
    /// Any match selects the route; no matches selects everything.
    #[serde(rename = "match")]
    pub matches: Vec<HttpMatch>,
    pub route: Vec<RouteDestination>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<Retries>,
    pub fault: Option<FaultInjection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualService {
    pub name: String,
    pub namespace: String,
    pub hosts: Vec<String>,
    pub gateways: Vec<String>,
    pub http: Vec<HttpRoute>,
}

impl Default for VirtualService {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            hosts: Vec::new(),
            gateways: Vec::new(),
            http: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancer {
    #[default]
    RoundRobin,
    LeastRequest,
    Random,
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPool {
    pub max_connections: u32,
    pub max_pending_requests: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierDetection {
    /// Consecutive 5xx responses that eject the host.
    pub consecutive_errors: u32,
    pub base_ejection_time_ms: u64,
}

impl Default for OutlierDetection {
    fn default() -> Self {
        Self {
            consecutive_errors: 5,
            base_ejection_time_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficPolicy {
    pub load_balancer: LoadBalancer,
    pub connection_pool: Option<ConnectionPool>,
    pub outlier_detection: Option<OutlierDetection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Subset {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationRule {
    pub name: String,
    pub namespace: String,
    pub host: String,
    pub traffic_policy: TrafficPolicy,
    pub subsets: Vec<Subset>,
}

impl Default for DestinationRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            host: String::new(),
            traffic_policy: TrafficPolicy::default(),
            subsets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayServer {
    pub port: u16,
    pub protocol: String,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gateway {
    pub name: String,
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub servers: Vec<GatewayServer>,
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            selector: BTreeMap::new(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MtlsMode {
    Strict,
    #[default]
    Permissive,
    Disable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerAuthentication {
    pub name: String,
    pub namespace: String,
    pub mtls_mode: MtlsMode,
}

impl Default for PeerAuthentication {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            mtls_mode: MtlsMode::Permissive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthAction {
    #[default]
    Allow,
    Deny,
}

/// One authorization rule. Empty lists match anything; entries are glob
/// patterns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRule {
    /// Calling service names.
    pub sources: Vec<String>,
    pub paths: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationPolicy {
    pub name: String,
    pub namespace: String,
    /// Target service name; `None` applies to the whole namespace.
    pub selector: Option<String>,
    pub action: AuthAction,
    pub rules: Vec<AuthRule>,
}

impl Default for AuthorizationPolicy {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            selector: None,
            action: AuthAction::Allow,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceLocation {
    #[default]
    MeshExternal,
    MeshInternal,
}

/// A host outside the service registry the mesh may route to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    pub name: String,
    pub namespace: String,
    pub hosts: Vec<String>,
    pub location: ServiceLocation,
    pub ports: Vec<u16>,
    pub latency_ms: f64,
}

impl Default for ServiceEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            hosts: Vec::new(),
            location: ServiceLocation::MeshExternal,
            ports: Vec::new(),
            latency_ms: 50.0,
        }
    }
}

/// Restricts which hosts workloads in a namespace may reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sidecar {
    pub name: String,
    pub namespace: String,
    /// `namespace/host` patterns; `./*` means the sidecar's own namespace.
    pub egress_hosts: Vec<String>,
}

impl Default for Sidecar {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            egress_hosts: Vec::new(),
        }
    }
}

/// Everything the mesh control plane knows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshGraph {
    pub services: Vec<Service>,
    pub virtual_services: Vec<VirtualService>,
    pub destination_rules: Vec<DestinationRule>,
    pub gateways: Vec<Gateway>,
    pub peer_authentications: Vec<PeerAuthentication>,
    pub authorization_policies: Vec<AuthorizationPolicy>,
    pub service_entries: Vec<ServiceEntry>,
    pub sidecars: Vec<Sidecar>,
}

impl MeshGraph {
    pub fn service(&self, key: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.key() == key)
    }

    /// The virtual service that claims `host`, if any. Short names match
    /// within the virtual service's namespace.
    pub fn virtual_service_for(&self, host: &str) -> Option<&VirtualService> {
        self.virtual_services.iter().find(|vs| {
            vs.hosts.iter().any(|h| {
                h == "*" || h == host || host_to_key(h, &vs.namespace) == host_to_key(host, &vs.namespace)
            })
        })
    }

    pub fn destination_rule_for(&self, service_key: &str) -> Option<&DestinationRule> {
        self.destination_rules
            .iter()
            .find(|dr| host_to_key(&dr.host, &dr.namespace) == service_key)
    }

    pub fn service_entry_for(&self, host: &str) -> Option<&ServiceEntry> {
        self.service_entries
            .iter()
            .find(|se| se.hosts.iter().any(|h| h == host))
    }

    pub fn mtls_mode(&self, namespace: &str) -> MtlsMode {
        self.peer_authentications
            .iter()
            .find(|pa| pa.namespace == namespace)
            .map(|pa| pa.mtls_mode)
            .unwrap_or_default()
    }
}
