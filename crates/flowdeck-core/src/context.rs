use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{MemoryRecord, WorkflowElement};

/// Results accumulated during one run.
///
/// `results` keeps the last result per element id; `memory` is the
/// append-only sequence of every recorded step, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContext {
    results: HashMap<String, Value>,
    memory: Vec<MemoryRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the last result recorded for an element.
    pub fn get(&self, element_id: &str) -> Option<&Value> {
        self.results.get(element_id)
    }

    /// Get a field of the last result for an element, if the result is an object.
    pub fn field(&self, element_id: &str, key: &str) -> Option<&Value> {
        self.results.get(element_id).and_then(|v| v.get(key))
    }

    /// Get the last result as a string, if it is a string.
    pub fn get_str(&self, element_id: &str) -> Option<&str> {
        self.results.get(element_id).and_then(|v| v.as_str())
    }

    /// Record a step result for an element, overwriting any previous result
    /// for the same id and appending to memory.
    pub fn record(&mut self, element: &WorkflowElement, result: Value, timestamp: i64) {
        self.results.insert(element.id.clone(), result.clone());
        self.memory.push(MemoryRecord {
            agent: element.label.clone(),
            kind: element.kind,
            result,
            timestamp,
        });
    }

    pub fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }

    pub fn memory(&self) -> &[MemoryRecord] {
        &self.memory
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.memory.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.memory.clear();
    }
}
