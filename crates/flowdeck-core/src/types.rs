use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which flavour of workbench is being driven.
///
/// The generic variant works with action/condition/loop/api elements and has
/// no edges. The agent variant works with llm/tool/memory nodes, supports
/// edges and pause/resume, and attaches execution traces to step logs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Generic,
    Agent,
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown variant: {}", other)),
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Kind of work an element performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Action,
    Condition,
    Loop,
    Api,
    Llm,
    Tool,
    Memory,
    /// Any type this build does not know about. Executes as a no-op.
    #[serde(other)]
    Unknown,
}

impl ElementType {
    pub const GENERIC: [ElementType; 4] = [Self::Action, Self::Condition, Self::Loop, Self::Api];
    pub const AGENT: [ElementType; 3] = [Self::Llm, Self::Tool, Self::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Api => "api",
            Self::Llm => "llm",
            Self::Tool => "tool",
            Self::Memory => "memory",
            Self::Unknown => "unknown",
        }
    }

    /// Palette label used when spawning a new element of this type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Action => "Action",
            Self::Condition => "Condition",
            Self::Loop => "Loop",
            Self::Api => "API",
            Self::Llm => "LLM Agent",
            Self::Tool => "Tool Agent",
            Self::Memory => "Memory",
            Self::Unknown => "Unknown",
        }
    }

    pub fn variant(&self) -> Option<Variant> {
        match self {
            Self::Action | Self::Condition | Self::Loop | Self::Api => Some(Variant::Generic),
            Self::Llm | Self::Tool | Self::Memory => Some(Variant::Agent),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "action" => Ok(Self::Action),
            "condition" => Ok(Self::Condition),
            "loop" => Ok(Self::Loop),
            "api" => Ok(Self::Api),
            "llm" => Ok(Self::Llm),
            "tool" => Ok(Self::Tool),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown element type: {}", other)),
        }
    }
}

/// Canvas coordinates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One unit of work in a workflow.
///
/// This is also the canonical wire record: a workflow on disk is a JSON array
/// of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl WorkflowElement {
    /// Create an element with an id derived from its type and the current
    /// time (`<type>-<millis>`). Two elements of the same type created in the
    /// same millisecond collide.
    pub fn new(kind: ElementType, label: impl Into<String>) -> Self {
        Self::with_id(format!("{}-{}", kind.as_str(), now_millis()), kind, label)
    }

    /// Create an element with an explicit id.
    pub fn with_id(id: impl Into<String>, kind: ElementType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            x: 0.0,
            y: 0.0,
            config: Map::new(),
        }
    }

    /// Set the canvas position.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Set one config key.
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn position(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }

    /// Get a config value as a string, if it is a string.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Shallow-merge a patch. Identity and type are not patchable.
    pub fn apply(&mut self, patch: ElementPatch) {
        if let Some(label) = patch.label {
            self.label = label;
        }
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(config) = patch.config {
            self.config = config;
        }
    }
}

/// Partial update for an element. Unset fields are left untouched; a set
/// `config` replaces the whole config object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
}

impl ElementPatch {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn position(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn config(mut self, config: Map<String, Value>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.x.is_none() && self.y.is_none() && self.config.is_none()
    }
}

/// A directed link between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Rendering hint only.
    #[serde(default)]
    pub animated: bool,
    /// Rendering hint only.
    #[serde(default = "default_edge_kind", rename = "type")]
    pub kind: String,
}

fn default_edge_kind() -> String {
    "smoothstep".to_string()
}

impl Edge {
    /// Create an animated, curved link with id `<source>-<target>`.
    pub fn link(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}-{}", source, target),
            source,
            target,
            animated: true,
            kind: default_edge_kind(),
        }
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source == id || self.target == id
    }
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Warning,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// Outcome recorded in an execution trace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Running,
    Error,
}

/// Execution trace attached to agent step logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepTrace {
    pub agent_name: String,
    pub agent_type: ElementType,
    pub input: String,
    pub output: String,
    pub status: TraceStatus,
}

/// One immutable entry in the log trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: u64,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<StepTrace>,
}

/// One record in the run memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: ElementType,
    pub result: Value,
    pub timestamp: i64,
}

/// Simulated output of a single step, shaped by element type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepResult {
    Action {
        status: String,
        output: String,
        timestamp: String,
    },
    Condition {
        passed: bool,
        condition: String,
        message: String,
    },
    Loop {
        iterations: u64,
        completed: bool,
        message: String,
    },
    Api {
        endpoint: String,
        status: u16,
        data: Value,
        #[serde(rename = "responseTime")]
        response_time_ms: u64,
    },
    /// Free-text output of an agent node.
    Agent(String),
    /// The element no longer existed when its turn came.
    Skipped { status: String, reason: String },
    /// The executor returned an error.
    Failed { status: String, error: String },
    /// Fallback for element types without a simulation.
    Unknown { status: String },
}

impl StepResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            status: "skipped".to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            status: "error".to_string(),
            error: error.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::Unknown {
            status: "unknown".to_string(),
        }
    }

    /// JSON form stored in the execution context.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Agent(text) => Value::String(text.clone()),
            other => serde_json::to_value(other).unwrap_or(Value::Null),
        }
    }

    /// Human-readable one-liner used for traces and terminal output.
    pub fn summary(&self) -> String {
        match self {
            Self::Agent(text) => text.clone(),
            other => other.to_value().to_string(),
        }
    }
}

/// Change notification broadcast to observers of a workbench.
///
/// Events only say *what* changed; observers re-read the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    ElementAdded { id: String },
    ElementRemoved { id: String },
    ElementUpdated { id: String },
    ElementMoved { id: String, x: f64, y: f64 },
    Connected { edge_id: String },
    SelectionChanged { id: Option<String> },
    WorkflowLoaded { count: usize },
    WorkflowCleared,
    RunStarted { run_id: RunId, total_steps: usize },
    StepStarted { run_id: RunId, element_id: String, step: usize },
    StepCompleted { run_id: RunId, element_id: String, step: usize },
    /// An in-flight step finished after its run was stopped or replaced.
    StepDiscarded { run_id: RunId, element_id: String },
    RunPaused { run_id: RunId },
    RunResumed { run_id: RunId },
    RunStopped { run_id: RunId, completed: bool },
    ExecutionReset,
    LogAppended { entry_id: u64 },
    LogsCleared,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_id_uses_type_prefix() {
        let el = WorkflowElement::new(ElementType::Api, "Fetch");
        assert!(el.id.starts_with("api-"));
        assert_eq!(el.kind, ElementType::Api);
        assert!(el.config.is_empty());
    }

    #[test]
    fn test_element_wire_shape() {
        let el = WorkflowElement::with_id("loop-1", ElementType::Loop, "Repeat")
            .at(10.0, 20.5)
            .with_config("iterations", json!(4));
        let value = serde_json::to_value(&el).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "loop-1",
                "type": "loop",
                "label": "Repeat",
                "x": 10.0,
                "y": 20.5,
                "config": {"iterations": 4}
            })
        );
    }

    #[test]
    fn test_unknown_type_deserializes() {
        let el: WorkflowElement =
            serde_json::from_str(r#"{"id":"x-1","type":"webhook","label":"Hook"}"#).unwrap();
        assert_eq!(el.kind, ElementType::Unknown);
        assert_eq!(el.kind.variant(), None);
        assert_eq!(el.x, 0.0);
    }

    #[test]
    fn test_patch_is_shallow() {
        let mut el = WorkflowElement::with_id("action-1", ElementType::Action, "Old")
            .with_config("command", json!("a"))
            .with_config("params", json!("{}"));

        let mut config = Map::new();
        config.insert("command".into(), json!("b"));
        el.apply(ElementPatch::default().label("New").config(config));

        assert_eq!(el.label, "New");
        assert_eq!(el.config.get("command"), Some(&json!("b")));
        assert!(el.config.get("params").is_none());
        assert_eq!(el.id, "action-1");
    }

    #[test]
    fn test_patch_deserializes_partial() {
        let patch: ElementPatch = serde_json::from_str(r#"{"x": 5}"#).unwrap();
        assert_eq!(patch.x, Some(5.0));
        assert!(patch.label.is_none());
        assert!(!patch.is_empty());
        assert!(ElementPatch::default().is_empty());
    }

    #[test]
    fn test_edge_link() {
        let e = Edge::link("a", "b");
        assert_eq!(e.id, "a-b");
        assert!(e.animated);
        assert_eq!(e.kind, "smoothstep");
        assert!(e.touches("a"));
        assert!(e.touches("b"));
        assert!(!e.touches("c"));
    }

    #[test]
    fn test_step_result_shapes() {
        let r = StepResult::Api {
            endpoint: "/api/mock".into(),
            status: 200,
            data: json!({"message": "ok"}),
            response_time_ms: 120,
        };
        let v = r.to_value();
        assert_eq!(v["responseTime"], json!(120));
        assert_eq!(v["status"], json!(200));

        assert_eq!(StepResult::Agent("hi".into()).to_value(), json!("hi"));
        assert_eq!(StepResult::skipped("gone").to_value()["status"], json!("skipped"));
        assert_eq!(StepResult::unknown().summary(), r#"{"status":"unknown"}"#);
    }

    #[test]
    fn test_element_type_parsing() {
        assert_eq!("LLM".parse::<ElementType>(), Ok(ElementType::Llm));
        assert!("webhook".parse::<ElementType>().is_err());
        assert_eq!(ElementType::Memory.variant(), Some(Variant::Agent));
        assert_eq!(ElementType::Api.variant(), Some(Variant::Generic));
    }
}
