//! Execution context: the variable map accumulated by a running execution.
//!
//! Nodes and templates read from the context; trigger payloads, adapter
//! outputs and inbound responses merge into it. Merges are append-only in
//! the sense that steps only ever add or overwrite keys, never remove them,
//! so a replayed step converges to the same context.
//!
//! A few keys are reserved for the engine itself: loop iteration counters,
//! the simulator log, and the terminal error fields.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Context key holding per-loop-node iteration counters.
pub const LOOPS_KEY: &str = "_loops";
/// Context key holding the simulator's "would execute" log.
pub const SIMULATION_KEY: &str = "_simulation";
/// Context key holding the terminal error reason.
pub const ERROR_KEY: &str = "error";
/// Context key holding the node id the terminal error occurred at.
pub const ERROR_NODE_KEY: &str = "error_node_id";

/// The accumulated variable map of an execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(Map<String, JsonValue>);

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Creates a context from a JSON value.
    ///
    /// Non-object values produce an empty context.
    #[must_use]
    pub fn from_value(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => Self(map),
            _ => Self::new(),
        }
    }

    /// Returns the value for a variable, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Returns the value for a variable as a string slice, if it is one.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    /// Sets a single variable.
    pub fn set(&mut self, key: impl Into<String>, value: JsonValue) {
        self.0.insert(key.into(), value);
    }

    /// Merges a JSON object into the context, overwriting existing keys.
    ///
    /// Non-object values are ignored.
    pub fn merge(&mut self, value: JsonValue) {
        if let JsonValue::Object(map) = value {
            for (key, value) in map {
                self.0.insert(key, value);
            }
        }
    }

    /// Returns the number of variables, including reserved keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the context holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the context as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.0.clone())
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_object(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    /// Returns the iteration count recorded for a loop node.
    #[must_use]
    pub fn loop_count(&self, node_id: NodeId) -> u32 {
        self.0
            .get(LOOPS_KEY)
            .and_then(|loops| loops.get(node_id.as_ulid().to_string()))
            .and_then(JsonValue::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Increments the iteration count for a loop node, returning the new count.
    pub fn record_iteration(&mut self, node_id: NodeId) -> u32 {
        let next = self.loop_count(node_id) + 1;
        let loops = self
            .0
            .entry(LOOPS_KEY.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(map) = loops {
            map.insert(node_id.as_ulid().to_string(), JsonValue::from(next));
        }
        next
    }

    /// Records the terminal error reason and failing node.
    pub fn record_error(&mut self, reason: impl Into<String>, node_id: NodeId) {
        self.0
            .insert(ERROR_KEY.to_string(), JsonValue::String(reason.into()));
        self.0.insert(
            ERROR_NODE_KEY.to_string(),
            JsonValue::String(node_id.to_string()),
        );
    }

    /// Appends an entry to the simulator log.
    pub fn record_simulation(&mut self, entry: impl Into<String>) {
        let log = self
            .0
            .entry(SIMULATION_KEY.to_string())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        if let JsonValue::Array(entries) = log {
            entries.push(JsonValue::String(entry.into()));
        }
    }

    /// Returns the simulator log entries.
    #[must_use]
    pub fn simulation_log(&self) -> Vec<&str> {
        self.0
            .get(SIMULATION_KEY)
            .and_then(JsonValue::as_array)
            .map(|entries| entries.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default()
    }
}

impl From<Map<String, JsonValue>> for ExecutionContext {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_and_adds() {
        let mut context = ExecutionContext::new();
        context.set("nome", json!("João"));
        context.set("valor", json!(150.0));

        context.merge(json!({"valor": 200.0, "score": 85}));

        assert_eq!(context.get("nome"), Some(&json!("João")));
        assert_eq!(context.get("valor"), Some(&json!(200.0)));
        assert_eq!(context.get("score"), Some(&json!(85)));
    }

    #[test]
    fn merge_ignores_non_objects() {
        let mut context = ExecutionContext::new();
        context.set("nome", json!("Maria"));
        context.merge(json!("not an object"));
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn from_value_non_object_is_empty() {
        let context = ExecutionContext::from_value(json!([1, 2, 3]));
        assert!(context.is_empty());
    }

    #[test]
    fn loop_counters_are_per_node() {
        let mut context = ExecutionContext::new();
        let a = NodeId::new();
        let b = NodeId::new();

        assert_eq!(context.loop_count(a), 0);
        assert_eq!(context.record_iteration(a), 1);
        assert_eq!(context.record_iteration(a), 2);
        assert_eq!(context.record_iteration(b), 1);

        assert_eq!(context.loop_count(a), 2);
        assert_eq!(context.loop_count(b), 1);
    }

    #[test]
    fn loop_counters_survive_serde() {
        let mut context = ExecutionContext::new();
        let node = NodeId::new();
        context.record_iteration(node);
        context.record_iteration(node);

        let json = serde_json::to_string(&context).expect("serialize");
        let parsed: ExecutionContext = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.loop_count(node), 2);
    }

    #[test]
    fn record_error_sets_reason_and_node() {
        let mut context = ExecutionContext::new();
        let node = NodeId::new();
        context.record_error("adapter exhausted retries", node);

        assert_eq!(
            context.get_str(ERROR_KEY),
            Some("adapter exhausted retries")
        );
        assert_eq!(context.get_str(ERROR_NODE_KEY), Some(node.to_string()).as_deref());
    }

    #[test]
    fn simulation_log_accumulates() {
        let mut context = ExecutionContext::new();
        context.record_simulation("would execute send whatsapp");
        context.record_simulation("would execute update status");

        assert_eq!(
            context.simulation_log(),
            vec![
                "would execute send whatsapp",
                "would execute update status"
            ]
        );
    }
}
