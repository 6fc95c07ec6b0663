//! infrasim-core — shared building blocks for the simulation engines.
//!
//! - [`clock`]: the simulated clock every engine reads time from
//! - [`topology`]: nodes, connections, and component kinds
//! - [`engine`]: the [`RoutingEngine`] trait each component kind implements
//! - [`result`]: the uniform [`CommandResult`] returned across the engine boundary
//! - [`glob`]: Redis-style glob patterns
//! - [`units`]: human-friendly size and duration parsing for node config

pub mod clock;
pub mod engine;
pub mod error;
pub mod glob;
pub mod result;
pub mod topology;
pub mod units;

pub use clock::SimClock;
pub use engine::{decode_config, EngineContext, Reconfigure, RoutingEngine};
pub use error::{CoreError, CoreResult};
pub use glob::GlobPattern;
pub use result::CommandResult;
pub use topology::{ComponentKind, Connection, Topology, TopologyNode};
