//! Workflow state model and its pure transitions.
//!
//! `WorkflowState` is what a view layer reads: elements, edges, selection,
//! execution status and the log trail. Every method here is a total,
//! synchronous transition. Unknown ids are silent no-ops and report `false`.
//! Locking, cancellation and event fan-out live in [`crate::workbench`].

use rand::Rng;
use serde::Serialize;

use flowdeck_core::context::ExecutionContext;
use flowdeck_core::types::{
    now_millis, Edge, ElementPatch, ElementType, RunId, StepResult, StepTrace, TraceStatus,
    Variant, WorkflowElement,
};

use crate::log::{LogLine, LogStore};

/// Coarse phase of the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Progress of the current (or last) run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExecutionState {
    pub is_running: bool,
    pub is_paused: bool,
    /// Number of completed steps. Never exceeds `total_steps`.
    pub current_step: usize,
    /// Element count frozen at `start`.
    pub total_steps: usize,
    /// Element being executed, or the one executed last.
    pub current_element_id: Option<String>,
    pub run_id: Option<RunId>,
    pub context: ExecutionContext,
}

impl ExecutionState {
    pub fn phase(&self) -> RunPhase {
        match (self.is_running, self.is_paused, &self.run_id) {
            (true, true, _) => RunPhase::Paused,
            (true, false, _) => RunPhase::Running,
            (false, _, Some(_)) => RunPhase::Stopped,
            (false, _, None) => RunPhase::Idle,
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.current_step as f64 / self.total_steps as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total_steps > 0 && self.current_step == self.total_steps
    }
}

/// What happened to the element whose turn it was.
#[derive(Debug, Clone)]
pub enum StepResolution {
    Executed {
        element: WorkflowElement,
        result: StepResult,
    },
    Failed {
        element: WorkflowElement,
        error: String,
    },
    /// The element was deleted after the run started.
    Skipped { element_id: String },
}

impl StepResolution {
    pub fn element_id(&self) -> &str {
        match self {
            Self::Executed { element, .. } | Self::Failed { element, .. } => &element.id,
            Self::Skipped { element_id } => element_id,
        }
    }
}

/// Snapshot of everything a view layer renders.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub variant: Variant,
    pub elements: Vec<WorkflowElement>,
    pub edges: Vec<Edge>,
    pub selected_id: Option<String>,
    pub execution: ExecutionState,
    pub logs: LogStore,
    /// Bumped once per applied mutation.
    pub revision: u64,
}

impl WorkflowState {
    pub fn new(variant: Variant, log_capacity: usize) -> Self {
        Self {
            variant,
            elements: Vec::new(),
            edges: Vec::new(),
            selected_id: None,
            execution: ExecutionState::default(),
            logs: LogStore::new(log_capacity),
            revision: 0,
        }
    }

    /// First element with the given id.
    pub fn find(&self, id: &str) -> Option<&WorkflowElement> {
        self.elements.iter().find(|el| el.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut WorkflowElement> {
        self.elements.iter_mut().find(|el| el.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn selected(&self) -> Option<&WorkflowElement> {
        self.selected_id.as_deref().and_then(|id| self.find(id))
    }

    /// Append an element. Duplicate ids are kept as-is.
    pub fn add(&mut self, element: WorkflowElement) {
        self.logs.append(
            LogLine::info(format!("Added element: {}", element.label)).element(&element.id),
        );
        self.elements.push(element);
    }

    /// Remove every element with `id`, its edges, and the selection if it
    /// pointed there.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(label) = self.find(id).map(|el| el.label.clone()) else {
            return false;
        };
        self.elements.retain(|el| el.id != id);
        self.edges.retain(|e| !e.touches(id));
        if self.selected_id.as_deref() == Some(id) {
            self.selected_id = None;
        }
        self.logs
            .append(LogLine::warning(format!("Removed element: {}", label)));
        true
    }

    pub fn update(&mut self, id: &str, patch: ElementPatch) -> bool {
        match self.find_mut(id) {
            Some(el) => {
                el.apply(patch);
                true
            }
            None => false,
        }
    }

    pub fn move_element(&mut self, id: &str, x: f64, y: f64) -> bool {
        match self.find_mut(id) {
            Some(el) => {
                el.x = x;
                el.y = y;
                true
            }
            None => false,
        }
    }

    /// Add a `source → target` edge. Returns the edge id if one was added.
    pub fn connect(&mut self, source: &str, target: &str) -> Option<String> {
        if !self.contains(source) || !self.contains(target) {
            return None;
        }
        let edge = Edge::link(source, target);
        if self.edges.iter().any(|e| e.id == edge.id) {
            return None;
        }
        let id = edge.id.clone();
        self.edges.push(edge);
        Some(id)
    }

    /// Point the selection at `id` (or clear it). Unknown ids are ignored.
    /// Returns whether the selection changed.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        if let Some(id) = id {
            if !self.contains(id) {
                return false;
            }
        }
        if self.selected_id.as_deref() == id {
            return false;
        }
        self.selected_id = id.map(str::to_string);
        true
    }

    /// Replace the whole graph. Edges whose endpoints are missing are dropped.
    pub fn load_graph(&mut self, elements: Vec<WorkflowElement>, edges: Vec<Edge>) -> usize {
        let count = elements.len();
        self.elements = elements;
        let mut kept: Vec<Edge> = Vec::with_capacity(edges.len());
        for edge in edges {
            if self.contains(&edge.source)
                && self.contains(&edge.target)
                && !kept.iter().any(|e| e.id == edge.id)
            {
                kept.push(edge);
            }
        }
        self.edges = kept;
        self.selected_id = None;
        self.logs
            .append(LogLine::info(format!("Loaded workflow with {} elements", count)));
        count
    }

    /// Empty the graph and zero the execution state. Logs are kept.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.edges.clear();
        self.selected_id = None;
        self.execution = ExecutionState::default();
        self.logs.append(LogLine::warning("Workflow cleared"));
    }

    /// Enter the running state. Returns the ordered id plan, or `None` when a
    /// run is already active or there is nothing to run.
    pub fn begin_run(&mut self, run_id: RunId) -> Option<Vec<String>> {
        if self.execution.is_running || self.elements.is_empty() {
            return None;
        }
        let plan: Vec<String> = self.elements.iter().map(|el| el.id.clone()).collect();
        self.execution = ExecutionState {
            is_running: true,
            total_steps: plan.len(),
            run_id: Some(run_id),
            ..ExecutionState::default()
        };
        self.logs.append(LogLine::info(format!(
            "Run started ({} steps)",
            plan.len()
        )));
        Some(plan)
    }

    /// Fold one finished step into counters, context, memory and log.
    ///
    /// Returns the 1-based step number, or `None` if the run is not active
    /// or already complete.
    pub fn complete_step(&mut self, resolution: &StepResolution) -> Option<usize> {
        let exec = &mut self.execution;
        if !exec.is_running || exec.current_step >= exec.total_steps {
            return None;
        }
        exec.current_step += 1;
        let step = exec.current_step;
        let total = exec.total_steps;
        exec.current_element_id = Some(resolution.element_id().to_string());

        let timestamp = now_millis();
        let line = match resolution {
            StepResolution::Executed { element, result } => {
                exec.context.record(element, result.to_value(), timestamp);
                let line = LogLine::success(format!(
                    "Step {}/{} completed: {}",
                    step, total, element.label
                ))
                .element(&element.id);
                match self.variant {
                    Variant::Agent => {
                        line.trace(trace_for(element, result.summary(), TraceStatus::Success))
                    }
                    Variant::Generic => line,
                }
            }
            StepResolution::Failed { element, error } => {
                exec.context
                    .record(element, StepResult::failed(error.clone()).to_value(), timestamp);
                let line = LogLine::error(format!(
                    "Step {}/{} failed: {}: {}",
                    step, total, element.label, error
                ))
                .element(&element.id);
                match self.variant {
                    Variant::Agent => {
                        line.trace(trace_for(element, error.clone(), TraceStatus::Error))
                    }
                    Variant::Generic => line,
                }
            }
            StepResolution::Skipped { element_id } => {
                let placeholder = WorkflowElement::with_id(
                    element_id.clone(),
                    ElementType::Unknown,
                    element_id.clone(),
                );
                let result = StepResult::skipped("element no longer exists");
                exec.context.record(&placeholder, result.to_value(), timestamp);
                LogLine::warning(format!(
                    "Step {}/{} skipped: {} no longer exists",
                    step, total, element_id
                ))
                .element(element_id)
            }
        };
        self.logs.append(line);
        Some(step)
    }

    /// Leave the running state. Returns whether the run had completed every
    /// step, or `None` if no run was active.
    pub fn finish_run(&mut self) -> Option<bool> {
        if !self.execution.is_running {
            return None;
        }
        self.execution.is_running = false;
        self.execution.is_paused = false;
        let completed = self.execution.current_step == self.execution.total_steps;
        let line = if completed {
            LogLine::success("Run completed successfully")
        } else {
            LogLine::warning(format!(
                "Run stopped ({}/{} steps)",
                self.execution.current_step, self.execution.total_steps
            ))
        };
        self.logs.append(line);
        Some(completed)
    }

    /// Toggle the pause flag of an active run. Returns whether it changed.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        if !self.execution.is_running || self.execution.is_paused == paused {
            return false;
        }
        self.execution.is_paused = paused;
        self.logs.append(LogLine::info(if paused {
            "Run paused"
        } else {
            "Run resumed"
        }));
        true
    }

    /// Zero the execution state and drop every log entry.
    pub fn reset_execution(&mut self) {
        self.execution = ExecutionState::default();
        self.logs.clear();
    }
}

fn trace_for(element: &WorkflowElement, output: String, status: TraceStatus) -> StepTrace {
    StepTrace {
        agent_name: element.label.clone(),
        agent_type: element.kind,
        input: element.config_str("prompt").unwrap_or_default().to_string(),
        output,
        status,
    }
}

/// Build a palette element the way the toolbar does: generated id, numbered
/// label, random canvas position, and type-appropriate empty config.
pub fn spawn_element(kind: ElementType) -> WorkflowElement {
    let millis = now_millis();
    let mut rng = rand::thread_rng();
    let (x, y) = match kind.variant() {
        Some(Variant::Agent) => (
            100.0 + rng.gen_range(0.0..600.0),
            100.0 + rng.gen_range(0.0..400.0),
        ),
        _ => (
            50.0 + rng.gen_range(0.0..300.0),
            50.0 + rng.gen_range(0.0..200.0),
        ),
    };
    let label = format!("{} {}", kind.display_name(), millis.rem_euclid(100));
    let id = format!("{}-{}", kind.as_str(), millis);
    let element = WorkflowElement::with_id(id, kind, label).at(x, y);
    match kind.variant() {
        Some(Variant::Agent) => {
            element.with_config("prompt", serde_json::Value::String(String::new()))
        }
        _ => element,
    }
}
