//! The mesh engine: routes simulated requests through a validated graph and
//! tabulates per-service traffic.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use infrasim_core::{
    decode_config, CommandResult, ComponentKind, CoreError, CoreResult, EngineContext, GlobPattern,
    Reconfigure, RoutingEngine, SimClock,
};
use infrasim_metrics::{MetricsAccumulator, MetricsSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::balancer::{OutlierTracker, SmoothWeighted};
use crate::error::{MeshError, MeshResult};
use crate::graph::{
    host_to_key, AuthAction, AuthRule, Destination, HttpMatch, HttpRoute, MeshGraph, MtlsMode,
    Service, DEFAULT_NAMESPACE,
};
use crate::stats::{MeshStats, ServiceCounters, ServiceStats};
use crate::validate::ValidatedMeshGraph;

/// Latency of a request rejected before reaching a pod.
const REJECT_LATENCY_MS: f64 = 1.0;

/// Configuration for a mesh node: the initial graph plus the seed driving
/// simulated failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    #[serde(flatten)]
    pub graph: MeshGraph,
    pub seed: u64,
}

/// A request entering the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshRequest {
    /// Calling service; `None` for traffic from outside the mesh.
    pub source: Option<String>,
    pub host: String,
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for MeshRequest {
    fn default() -> Self {
        Self {
            source: None,
            host: String::new(),
            path: "/".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl MeshRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn from_service(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub status: u16,
    pub latency_ms: f64,
    /// Virtual service that routed the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_service: Option<String>,
    /// Chosen destination, `host` or `host:subset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Service the request was accounted to, `name.namespace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RequestOutcome {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    fn rejected(status: u16, reason: &str) -> Self {
        Self {
            status,
            latency_ms: REJECT_LATENCY_MS,
            virtual_service: None,
            destination: None,
            service: None,
            attempts: 0,
            reason: Some(reason.to_string()),
        }
    }
}

/// Aggregate of a batch of simulated requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficSummary {
    pub requests: u64,
    pub errors: u64,
    pub average_latency_ms: f64,
    pub by_destination: BTreeMap<String, u64>,
    pub by_status: BTreeMap<u16, u64>,
}

pub struct MeshEngine {
    component_id: String,
    clock: SimClock,
    seed: u64,
    graph: ValidatedMeshGraph,
    counters: BTreeMap<String, ServiceCounters>,
    balancers: HashMap<(String, usize), SmoothWeighted>,
    outliers: OutlierTracker,
    rng: StdRng,
    metrics: MetricsAccumulator,
}

impl MeshEngine {
    pub fn new(ctx: EngineContext, graph: ValidatedMeshGraph, seed: u64) -> Self {
        let now = ctx.clock.now_ms();
        debug!(
            component = %ctx.component_id,
            services = graph.services.len(),
            virtual_services = graph.virtual_services.len(),
            "mesh engine created"
        );
        Self {
            component_id: ctx.component_id,
            clock: ctx.clock,
            seed,
            graph,
            counters: BTreeMap::new(),
            balancers: HashMap::new(),
            outliers: OutlierTracker::default(),
            rng: StdRng::seed_from_u64(seed),
            metrics: MetricsAccumulator::new(now),
        }
    }

    pub fn from_node(ctx: EngineContext, config: &serde_json::Value) -> CoreResult<Self> {
        let config: MeshConfig = decode_config(&ctx.component_id, config)?;
        let graph = config
            .graph
            .validate()
            .map_err(|e| CoreError::invalid_config(&ctx.component_id, e))?;
        Ok(Self::new(ctx, graph, config.seed))
    }

    /// Replace the whole graph at once. Counters of services that still
    /// exist are kept; routing state starts over.
    pub fn update_config(&mut self, graph: ValidatedMeshGraph) {
        self.counters
            .retain(|key, _| graph.services.iter().any(|s| &s.key() == key));
        self.balancers.clear();
        self.outliers.clear();
        info!(
            component = %self.component_id,
            services = graph.services.len(),
            virtual_services = graph.virtual_services.len(),
            destination_rules = graph.destination_rules.len(),
            "mesh configuration applied"
        );
        self.graph = graph;
    }

    pub fn graph(&self) -> &MeshGraph {
        &self.graph
    }

    pub fn get_stats(&self) -> MeshStats {
        let now = self.clock.now_ms();
        let empty = ServiceCounters::default();
        let mut stats = MeshStats::default();
        let mut total_latency = 0.0;
        for service in &self.graph.services {
            let key = service.key();
            let c = self.counters.get(&key).unwrap_or(&empty);
            stats.total_requests += c.request_count;
            stats.total_errors += c.error_count;
            total_latency += c.total_latency_ms;
            stats.services.push(ServiceStats {
                name: service.name.clone(),
                namespace: service.namespace.clone(),
                pod_count: service.pod_count,
                healthy_pod_count: service.healthy_pod_count,
                request_count: c.request_count,
                error_count: c.error_count,
                average_latency_ms: c.average_latency_ms(),
                error_rate: if c.request_count == 0 {
                    0.0
                } else {
                    c.error_count as f64 / c.request_count as f64
                },
                ejected: self.outliers.is_ejected(&key, now),
            });
        }
        if stats.total_requests > 0 {
            stats.average_latency = total_latency / stats.total_requests as f64;
        }
        stats
    }

    /// Account a request computed by the caller against `service`
    /// (`name` or `name.namespace`).
    pub fn record_request(&mut self, service: &str, latency_ms: f64, is_error: bool) -> MeshResult<()> {
        let key = host_to_key(service, DEFAULT_NAMESPACE);
        if self.graph.service(&key).is_none() {
            return Err(MeshError::UnknownService(service.to_string()));
        }
        if !(latency_ms.is_finite() && latency_ms >= 0.0) {
            return Err(MeshError::InvalidArgument(format!("latency {latency_ms}")));
        }
        self.counters.entry(key).or_default().record(latency_ms, is_error);
        self.metrics.record("request", (latency_ms * 1000.0) as u64, !is_error);
        Ok(())
    }

    /// Route one request. Fails only when nothing in the mesh answers for
    /// the host; every other failure is an outcome with an error status.
    pub fn simulate_request(&mut self, request: &MeshRequest) -> MeshResult<RequestOutcome> {
        let outcome = self.route(request)?;
        self.metrics
            .record("request", (outcome.latency_ms * 1000.0) as u64, !outcome.is_error());
        if outcome.is_error() {
            debug!(
                component = %self.component_id,
                host = %request.host,
                status = outcome.status,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "request failed"
            );
        }
        Ok(outcome)
    }

    /// Send `count` copies of `request` and summarize them.
    pub fn simulate_traffic(&mut self, request: &MeshRequest, count: u32) -> MeshResult<TrafficSummary> {
        let mut summary = TrafficSummary::default();
        let mut total_latency = 0.0;
        for _ in 0..count {
            let outcome = self.simulate_request(request)?;
            summary.requests += 1;
            if outcome.is_error() {
                summary.errors += 1;
            }
            total_latency += outcome.latency_ms;
            *summary.by_status.entry(outcome.status).or_default() += 1;
            if let Some(dest) = outcome.destination {
                *summary.by_destination.entry(dest).or_default() += 1;
            }
        }
        if summary.requests > 0 {
            summary.average_latency_ms = total_latency / summary.requests as f64;
        }
        Ok(summary)
    }

    fn route(&mut self, request: &MeshRequest) -> MeshResult<RequestOutcome> {
        let now = self.clock.now_ms();
        let Some(vs) = self.graph.virtual_service_for(&request.host) else {
            let key = host_to_key(&request.host, DEFAULT_NAMESPACE);
            if self.graph.service(&key).is_some() {
                let dest = Destination {
                    host: request.host.clone(),
                    ..Destination::default()
                };
                return Ok(self.dispatch(request, &dest, None, DEFAULT_NAMESPACE.to_string()));
            }
            if let Some(entry) = self.graph.service_entry_for(&request.host) {
                return Ok(RequestOutcome {
                    status: 200,
                    latency_ms: entry.latency_ms,
                    virtual_service: None,
                    destination: Some(request.host.clone()),
                    service: None,
                    attempts: 1,
                    reason: None,
                });
            }
            return Err(MeshError::NoRoute(request.host.clone()));
        };

        let vs_name = format!("{}/{}", vs.namespace, vs.name);
        let namespace = vs.namespace.clone();
        let Some((index, route)) = vs
            .http
            .iter()
            .enumerate()
            .find(|(_, r)| route_matches(r, request))
        else {
            let mut outcome = RequestOutcome::rejected(404, "no matching route");
            outcome.virtual_service = Some(vs_name);
            return Ok(outcome);
        };
        let route = route.clone();

        let single = route.route.len() == 1;
        let weights: Vec<u32> = route
            .route
            .iter()
            .map(|d| if single { 1 } else { d.weight })
            .collect();
        let keys: Vec<String> = route
            .route
            .iter()
            .map(|d| host_to_key(&d.destination.host, &namespace))
            .collect();
        let outliers = &self.outliers;
        let picked = self
            .balancers
            .entry((vs_name.clone(), index))
            .or_default()
            .pick(&weights, |i| !outliers.is_ejected(&keys[i], now));

        let mut outcome = match picked {
            Some(i) => self.dispatch(request, &route.route[i].destination, Some(&route), namespace),
            None => RequestOutcome::rejected(503, "no healthy upstream"),
        };
        outcome.virtual_service = Some(vs_name);
        Ok(outcome)
    }

    /// Deliver a request to a chosen destination and account the result.
    fn dispatch(
        &mut self,
        request: &MeshRequest,
        dest: &Destination,
        route: Option<&HttpRoute>,
        namespace: String,
    ) -> RequestOutcome {
        let now = self.clock.now_ms();
        let key = host_to_key(&dest.host, &namespace);
        let Some(service) = self.graph.service(&key).cloned() else {
            if let Some(entry) = self.graph.service_entry_for(&dest.host) {
                return RequestOutcome {
                    status: 200,
                    latency_ms: entry.latency_ms,
                    virtual_service: None,
                    destination: Some(dest.label()),
                    service: None,
                    attempts: 1,
                    reason: None,
                };
            }
            let mut outcome = RequestOutcome::rejected(503, "destination service not found");
            outcome.destination = Some(dest.label());
            return outcome;
        };

        let mut outcome = self.serve(request, &service, route);
        outcome.destination = Some(dest.label());
        outcome.service = Some(key.clone());

        self.counters
            .entry(key.clone())
            .or_default()
            .record(outcome.latency_ms, outcome.is_error());

        if let Some(od) = self
            .graph
            .destination_rule_for(&key)
            .and_then(|dr| dr.traffic_policy.outlier_detection.clone())
        {
            let ejected = self.outliers.observe(
                &key,
                outcome.status >= 500,
                od.consecutive_errors,
                od.base_ejection_time_ms,
                now,
            );
            if ejected {
                info!(component = %self.component_id, service = %key, "service ejected by outlier detection");
            }
        }
        outcome
    }

    /// Policy checks, fault injection, retries and timeouts for one request
    /// that reached `service`.
    fn serve(&mut self, request: &MeshRequest, service: &Service, route: Option<&HttpRoute>) -> RequestOutcome {
        let mut outcome = RequestOutcome {
            status: 200,
            latency_ms: 0.0,
            virtual_service: None,
            destination: None,
            service: None,
            attempts: 0,
            reason: None,
        };

        if let Some(reason) = self.egress_blocked(request, service) {
            outcome.status = 502;
            outcome.latency_ms = REJECT_LATENCY_MS;
            outcome.reason = Some(reason);
            return outcome;
        }
        if self.graph.mtls_mode(&service.namespace) == MtlsMode::Strict && request.source.is_none() {
            outcome.status = 503;
            outcome.latency_ms = REJECT_LATENCY_MS;
            outcome.reason = Some("mTLS required".into());
            return outcome;
        }
        if !self.authorized(request, service) {
            outcome.status = 403;
            outcome.latency_ms = REJECT_LATENCY_MS;
            outcome.reason = Some("RBAC: access denied".into());
            return outcome;
        }

        if let Some(fault) = route.and_then(|r| r.fault.as_ref()) {
            if fault.delay_percent > 0.0 && self.rng.random_range(0.0..100.0) < fault.delay_percent {
                outcome.latency_ms += fault.delay_ms as f64;
            }
            if fault.abort_percent > 0.0 && self.rng.random_range(0.0..100.0) < fault.abort_percent {
                outcome.status = fault.abort_status;
                outcome.latency_ms += REJECT_LATENCY_MS;
                outcome.reason = Some("fault injected".into());
                return outcome;
            }
        }

        let retries = route.and_then(|r| r.retries.clone()).unwrap_or_default();
        for _ in 0..=retries.attempts {
            outcome.attempts += 1;
            let (status, mut latency) = self.pod_response(service);
            let mut status = status;
            if let Some(per_try) = retries.per_try_timeout_ms {
                if latency > per_try as f64 {
                    latency = per_try as f64;
                    status = 504;
                }
            }
            outcome.latency_ms += latency;
            outcome.status = status;
            if status < 500 {
                break;
            }
        }
        outcome.reason = match outcome.status {
            503 => Some("upstream unavailable".into()),
            504 => Some("upstream request timeout".into()),
            _ => None,
        };

        if let Some(timeout) = route.and_then(|r| r.timeout_ms) {
            if outcome.latency_ms > timeout as f64 {
                outcome.latency_ms = timeout as f64;
                outcome.status = 504;
                outcome.reason = Some("upstream request timeout".into());
            }
        }
        outcome
    }

    /// One pod's answer. Fewer healthy pods means more load per pod.
    fn pod_response(&mut self, service: &Service) -> (u16, f64) {
        if service.healthy_pod_count == 0 {
            return (503, REJECT_LATENCY_MS);
        }
        let load = f64::from(service.pod_count.max(1)) / f64::from(service.healthy_pod_count);
        let jitter = self.rng.random_range(0.8..1.2);
        let latency = service.base_latency_ms * load * jitter;
        if service.error_rate > 0.0 && self.rng.random::<f64>() < service.error_rate {
            (503, latency)
        } else {
            (200, latency)
        }
    }

    /// DENY policies are checked first; then, if any ALLOW policy applies
    /// to the workload, one of its rules must match.
    fn authorized(&self, request: &MeshRequest, service: &Service) -> bool {
        let applicable: Vec<_> = self
            .graph
            .authorization_policies
            .iter()
            .filter(|p| {
                p.namespace == service.namespace
                    && p.selector.as_deref().is_none_or(|s| s == service.name)
            })
            .collect();
        let denied = applicable
            .iter()
            .filter(|p| p.action == AuthAction::Deny)
            .any(|p| p.rules.iter().any(|r| rule_matches(r, request)));
        if denied {
            return false;
        }
        let mut allows = applicable.iter().filter(|p| p.action == AuthAction::Allow).peekable();
        if allows.peek().is_none() {
            return true;
        }
        allows.any(|p| p.rules.iter().any(|r| rule_matches(r, request)))
    }

    /// A sidecar in the caller's namespace limits reachable hosts.
    fn egress_blocked(&self, request: &MeshRequest, service: &Service) -> Option<String> {
        let source = request.source.as_deref()?;
        let source_ns = source.split('.').nth(1).unwrap_or(DEFAULT_NAMESPACE);
        let sidecar = self.graph.sidecars.iter().find(|s| s.namespace == source_ns)?;
        if sidecar.egress_hosts.is_empty() {
            return None;
        }
        let allowed = sidecar.egress_hosts.iter().any(|pattern| {
            let (ns, host) = pattern.split_once('/').unwrap_or(("*", pattern.as_str()));
            let ns_ok = match ns {
                "*" => true,
                "." => service.namespace == source_ns,
                other => other == service.namespace,
            };
            ns_ok && GlobPattern::new(host).matches(&service.name)
        });
        (!allowed).then(|| format!("egress to {} blocked by sidecar {}", service.key(), sidecar.name))
    }
}

fn route_matches(route: &HttpRoute, request: &MeshRequest) -> bool {
    route.matches.is_empty() || route.matches.iter().any(|m| http_match(m, request))
}

fn http_match(m: &HttpMatch, request: &MeshRequest) -> bool {
    if let Some(prefix) = &m.uri_prefix {
        if !request.path.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some(exact) = &m.uri_exact {
        if &request.path != exact {
            return false;
        }
    }
    if let Some(method) = &m.method {
        if !request.method.eq_ignore_ascii_case(method) {
            return false;
        }
    }
    m.headers
        .iter()
        .all(|(k, v)| request.headers.get(k).is_some_and(|actual| actual == v))
}

fn rule_matches(rule: &AuthRule, request: &MeshRequest) -> bool {
    let any_glob = |patterns: &[String], value: Option<&str>| {
        patterns.is_empty()
            || value.is_some_and(|v| patterns.iter().any(|p| GlobPattern::new(p).matches(v)))
    };
    let source_name = request.source.as_deref().map(|s| s.split('.').next().unwrap_or(s));
    any_glob(&rule.sources, source_name)
        && any_glob(&rule.paths, Some(&request.path))
        && (rule.methods.is_empty()
            || rule
                .methods
                .iter()
                .any(|m| m == "*" || m.eq_ignore_ascii_case(&request.method)))
}

impl RoutingEngine for MeshEngine {
    fn kind(&self) -> ComponentKind {
        ComponentKind::ServiceMesh
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }

    /// `REQUEST host [path] [method] [source]`, `TRAFFIC host count [path]`,
    /// `RECORD service latency_ms [error]`, `STATS`, `RESET`.
    fn execute(&mut self, command: &str, args: &[String]) -> CommandResult {
        let command = command.to_ascii_uppercase();
        let arity = |min: usize, max: usize| {
            if args.len() < min || args.len() > max {
                Err(MeshError::WrongArity(command.to_ascii_lowercase()))
            } else {
                Ok(())
            }
        };
        let request_from = |args: &[String]| {
            let mut request = MeshRequest::new(args[0].clone());
            if let Some(path) = args.get(1) {
                request = request.path(path.clone());
            }
            request
        };
        match command.as_str() {
            "REQUEST" => CommandResult::from_serialize(arity(1, 4).and_then(|_| {
                let mut request = request_from(args);
                if let Some(method) = args.get(2) {
                    request = request.method(method.clone());
                }
                if let Some(source) = args.get(3) {
                    request = request.from_service(source.clone());
                }
                self.simulate_request(&request)
            })),
            "TRAFFIC" => CommandResult::from_serialize(arity(2, 3).and_then(|_| {
                let count: u32 = args[1]
                    .parse()
                    .map_err(|_| MeshError::InvalidArgument(format!("count '{}'", args[1])))?;
                let mut rest = vec![args[0].clone()];
                rest.extend(args.get(2).cloned());
                self.simulate_traffic(&request_from(&rest), count)
            })),
            "RECORD" => CommandResult::from_result(arity(2, 3).and_then(|_| {
                let latency: f64 = args[1]
                    .parse()
                    .map_err(|_| MeshError::InvalidArgument(format!("latency '{}'", args[1])))?;
                let is_error = args
                    .get(2)
                    .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "1" | "true" | "error"));
                self.record_request(&args[0], latency, is_error).map(|_| "OK")
            })),
            "STATS" => CommandResult::from_serialize(Ok::<_, MeshError>(self.get_stats())),
            "RESET" => {
                self.reset_stats();
                CommandResult::ok("OK")
            }
            _ => CommandResult::err(MeshError::UnknownCommand(command.to_ascii_lowercase())),
        }
    }

    /// Ejections expire by comparison with the clock; nothing is due.
    fn tick(&mut self) {}

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now_ms())
    }

    fn reset_stats(&mut self) {
        self.metrics.reset(self.clock.now_ms());
        self.counters.clear();
    }

    fn reconfigure(&mut self, config: &serde_json::Value) -> CoreResult<Reconfigure> {
        let new: MeshConfig = decode_config(&self.component_id, config)?;
        let graph = new
            .graph
            .validate()
            .map_err(|e| CoreError::invalid_config(&self.component_id, e))?;
        if new.seed != self.seed {
            self.seed = new.seed;
            self.rng = StdRng::seed_from_u64(new.seed);
        }
        self.update_config(graph);
        Ok(Reconfigure::Applied)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
