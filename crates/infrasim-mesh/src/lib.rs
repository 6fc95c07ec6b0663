//! infrasim-mesh: an Istio-like service-mesh engine.
//!
//! The engine owns a [`MeshGraph`] of services and routing resources
//! (virtual services, destination rules, gateways, peer authentication,
//! authorization policies, service entries, sidecars). A graph must pass
//! [`MeshGraph::validate`] before the engine will take it, so route weights
//! that do not sum to 100 or subsets nobody defines are rejected at the
//! edge and the previous configuration stays in force.
//!
//! Simulated requests walk the graph: route matching, smooth weighted
//! round-robin across destinations, outlier ejection, mTLS and
//! authorization checks, fault injection, retries and timeouts. Every
//! request lands in per-service counters exposed through
//! [`MeshEngine::get_stats`].

pub mod balancer;
pub mod engine;
pub mod error;
pub mod graph;
pub mod stats;
pub mod validate;

pub use balancer::{OutlierState, OutlierTracker, SmoothWeighted};
pub use engine::{MeshConfig, MeshEngine, MeshRequest, RequestOutcome, TrafficSummary};
pub use error::{MeshError, MeshResult};
pub use graph::{
    AuthAction, AuthRule, AuthorizationPolicy, ConnectionPool, Destination, DestinationRule,
    FaultInjection, Gateway, GatewayServer, HttpMatch, HttpRoute, LoadBalancer, MeshGraph,
    MtlsMode, OutlierDetection, PeerAuthentication, Retries, RouteDestination, Service,
    ServiceEntry, ServiceLocation, Sidecar, Subset, TrafficPolicy, VirtualService,
    DEFAULT_NAMESPACE,
};
pub use stats::{MeshStats, ServiceCounters, ServiceStats};
pub use validate::{ValidatedMeshGraph, ValidationIssue};
