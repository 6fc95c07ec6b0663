//! infrasim-emulator: the emulation engine.
//!
//! Binds a [`Topology`](infrasim_core::Topology) to one simulation engine
//! per eligible node and is the single entry point for commands, time and
//! metrics:
//!
//! ```text
//! upsert_topology(topology) ─► TopologyDiff {created, reconfigured, rebuilt, removed, failed}
//! execute(id, command, args) ─► CommandResult
//! advance(duration)          ─► every engine ticks against the shared clock
//! aggregate_metrics()        ─► Vec<ComponentSnapshot> / render_prometheus()
//! ```

pub mod diff;
pub mod emulator;
pub mod error;

pub use diff::{FailedNode, TopologyDiff};
pub use emulator::{build_engine, EmulationEngine};
pub use error::{EmulatorError, EmulatorResult};
