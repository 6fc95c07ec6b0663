//! The uniform contract every per-component engine implements.
//!
//! The orchestrator stores engines as `Box<dyn RoutingEngine>` keyed by
//! component id and selects the implementation from the node's declared
//! kind. Callers that need the kind-specific API downcast through
//! [`RoutingEngine::as_any_mut`].

use std::any::Any;

use infrasim_metrics::MetricsSnapshot;

use crate::clock::SimClock;
use crate::error::CoreResult;
use crate::result::CommandResult;
use crate::topology::ComponentKind;

/// Everything an engine receives from the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Component id of the topology node this engine simulates.
    pub component_id: String,
    /// Shared simulated clock.
    pub clock: SimClock,
}

impl EngineContext {
    pub fn new(component_id: impl Into<String>, clock: SimClock) -> Self {
        Self {
            component_id: component_id.into(),
            clock,
        }
    }
}

/// Outcome of applying a changed node configuration to a live engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigure {
    /// Applied in place; accumulated state was kept.
    Applied,
    /// The change alters the engine's identity; the orchestrator must
    /// build a fresh engine from the new config.
    RequiresRebuild,
}

/// A simulation engine for one topology node.
///
/// Engines are synchronous and single-threaded: every method runs to
/// completion, and time-based effects are resolved against the shared
/// [`SimClock`] whenever a method is called.
pub trait RoutingEngine: Send + Any {
    /// Which kind of component this engine simulates.
    fn kind(&self) -> ComponentKind;

    /// Component id of the owning topology node.
    fn component_id(&self) -> &str;

    /// Execute a named command with string arguments.
    fn execute(&mut self, command: &str, args: &[String]) -> CommandResult;

    /// Resolve every deadline that is due at the current simulated time.
    fn tick(&mut self);

    /// Point-in-time metrics. Pure: calling it never changes any state.
    fn metrics(&self) -> MetricsSnapshot;

    /// Zero the metric accumulators without touching entity state.
    fn reset_stats(&mut self);

    /// Apply a changed node configuration.
    fn reconfigure(&mut self, config: &serde_json::Value) -> CoreResult<Reconfigure>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Decode a node's JSON config into a typed, defaulted config struct.
///
/// `null` (no config on the node) decodes as `T::default()`.
pub fn decode_config<T>(component_id: &str, config: &serde_json::Value) -> CoreResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| crate::error::CoreError::invalid_config(component_id, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, serde::Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        size: u32,
        name: String,
    }

    #[test]
    fn decode_null_gives_default() {
        let cfg: Sample = decode_config("c1", &serde_json::Value::Null).unwrap();
        assert_eq!(cfg, Sample::default());
    }

    #[test]
    fn decode_partial_config() {
        let cfg: Sample = decode_config("c1", &serde_json::json!({"size": 4})).unwrap();
        assert_eq!(cfg.size, 4);
        assert!(cfg.name.is_empty());
    }

    #[test]
    fn decode_error_names_component() {
        let err = decode_config::<Sample>("c1", &serde_json::json!({"size": "big"})).unwrap_err();
        assert!(err.to_string().contains("c1"));
    }
}
