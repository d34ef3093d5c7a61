//! JSON interchange for workflows.
//!
//! The canonical format is a bare array of element records, shared by
//! persistence, export and import. The agent editor's `{agents, links}`
//! document is supported through [`AgentDocument`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::types::{Edge, ElementType, Position, WorkflowElement};

/// Suggested file name for an export taken at `millis`.
pub fn export_file_name(millis: i64) -> String {
    format!("workflow-{}.json", millis)
}

/// Serialize elements to pretty JSON.
pub fn to_json(elements: &[WorkflowElement]) -> Result<String> {
    Ok(serde_json::to_string_pretty(elements)?)
}

/// Parse a canonical element array.
pub fn parse_elements(json: &str) -> Result<Vec<WorkflowElement>> {
    serde_json::from_str(json).map_err(|e| FlowdeckError::Import(e.to_string()))
}

/// Agent node in the `{agents, links}` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementType,
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkRecord {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// Export shape of the agent editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentDocument {
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

impl AgentDocument {
    pub fn from_workflow(elements: &[WorkflowElement], edges: &[Edge]) -> Self {
        let agents = elements
            .iter()
            .map(|el| AgentRecord {
                id: el.id.clone(),
                kind: el.kind,
                name: el.label.clone(),
                prompt: el.config_str("prompt").unwrap_or_default().to_string(),
                position: el.position(),
            })
            .collect();
        let links = edges
            .iter()
            .map(|e| LinkRecord {
                id: e.id.clone(),
                source: e.source.clone(),
                target: e.target.clone(),
            })
            .collect();
        Self { agents, links }
    }

    /// Convert back into elements and edges. Prompts land in `config.prompt`.
    pub fn into_workflow(self) -> (Vec<WorkflowElement>, Vec<Edge>) {
        let elements = self
            .agents
            .into_iter()
            .map(|a| {
                WorkflowElement::with_id(a.id, a.kind, a.name)
                    .at(a.position.x, a.position.y)
                    .with_config("prompt", Value::String(a.prompt))
            })
            .collect();
        let edges = self
            .links
            .into_iter()
            .map(|l| Edge {
                id: l.id,
                ..Edge::link(l.source, l.target)
            })
            .collect();
        (elements, edges)
    }

    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FlowdeckError::Import(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
