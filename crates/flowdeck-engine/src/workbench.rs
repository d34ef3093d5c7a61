use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowdeck_core::config::AppConfig;
use flowdeck_core::context::ExecutionContext;
use flowdeck_core::error::Result;
use flowdeck_core::event::EventBus;
use flowdeck_core::traits::{BlobStore, StepExecutor};
use flowdeck_core::types::{
    Edge, ElementPatch, ElementType, LogEntry, LogLevel, RunId, StepResult, Variant,
    WorkflowElement, WorkflowEvent,
};

use crate::executor::SimulatedExecutor;
use crate::interchange::{self, AgentDocument};
use crate::log::LogLine;
use crate::state::{spawn_element, ExecutionState, StepResolution, WorkflowState};

/// Result of a single `step()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Executed {
        element_id: String,
        step: usize,
        result: StepResult,
    },
    /// The executor returned an error; the run still advanced.
    Failed {
        element_id: String,
        step: usize,
        error: String,
    },
    /// The planned element was deleted after the run started.
    Skipped { element_id: String, step: usize },
    /// The run was stopped or replaced while the step was in flight.
    Discarded { element_id: String },
    NotRunning,
    /// Every planned step has already completed.
    Exhausted,
    /// Another step is still in flight.
    Busy,
}

impl StepOutcome {
    /// Whether the run's step counter moved.
    pub fn advanced(&self) -> bool {
        matches!(
            self,
            Self::Executed { .. } | Self::Failed { .. } | Self::Skipped { .. }
        )
    }
}

/// Summary returned by [`Workbench::auto_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Option<RunId>,
    pub steps_executed: usize,
    pub total_steps: usize,
    pub completed: bool,
}

const BUSY_BACKOFF: Duration = Duration::from_millis(10);

struct ActiveRun {
    id: RunId,
    plan: Vec<String>,
    cancel: CancellationToken,
    in_flight: bool,
}

struct Inner {
    state: WorkflowState,
    run: Option<ActiveRun>,
}

struct Shared {
    variant: Variant,
    step_interval: Duration,
    completion_delay: Duration,
    executor: Arc<dyn StepExecutor>,
    events: EventBus,
    paused: watch::Sender<bool>,
    inner: Mutex<Inner>,
}

enum Claim {
    Execute {
        run_id: RunId,
        cancel: CancellationToken,
        element: WorkflowElement,
        context: ExecutionContext,
    },
    Done(StepOutcome, Option<RunId>),
}

/// Releases a claimed step if `step()` is dropped before its result is
/// folded, so the run is not left busy.
struct ClaimGuard<'a> {
    workbench: &'a Workbench,
    run_id: RunId,
    folded: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.folded {
            return;
        }
        let mut inner = self.workbench.lock();
        if let Some(run) = inner.run.as_mut().filter(|r| r.id == self.run_id) {
            run.in_flight = false;
            debug!(run = %self.run_id, "Released abandoned step claim");
        }
    }
}

/// Builder for [`Workbench`].
pub struct WorkbenchBuilder {
    variant: Variant,
    executor: Option<Arc<dyn StepExecutor>>,
    log_capacity: usize,
    event_capacity: usize,
    step_interval: Option<Duration>,
    completion_delay: Duration,
}

impl WorkbenchBuilder {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            executor: None,
            log_capacity: 1000,
            event_capacity: 256,
            step_interval: None,
            completion_delay: Duration::from_millis(500),
        }
    }

    pub fn executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn step_interval(mut self, interval: Duration) -> Self {
        self.step_interval = Some(interval);
        self
    }

    pub fn completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    pub fn build(self) -> Workbench {
        let variant = self.variant;
        let step_interval = self.step_interval.unwrap_or_else(|| {
            Duration::from_millis(AppConfig::default().execution.step_interval(variant))
        });
        let executor: Arc<dyn StepExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(SimulatedExecutor::from_config(
                &AppConfig::default().execution,
                variant,
            )),
        };
        let (paused, _) = watch::channel(false);

        Workbench {
            shared: Arc::new(Shared {
                variant,
                step_interval,
                completion_delay: self.completion_delay,
                executor,
                events: EventBus::new(self.event_capacity),
                paused,
                inner: Mutex::new(Inner {
                    state: WorkflowState::new(variant, self.log_capacity),
                    run: None,
                }),
            }),
        }
    }
}

/// Owner of one workflow's state and its execution controller.
///
/// Cloning is cheap; clones share the same state. Every mutation takes the
/// state lock once, applies one transition, publishes its events and bumps
/// the revision before releasing. Executor calls run with the lock released.
#[derive(Clone)]
pub struct Workbench {
    shared: Arc<Shared>,
}

impl Workbench {
    pub fn builder(variant: Variant) -> WorkbenchBuilder {
        WorkbenchBuilder::new(variant)
    }

    pub fn new(variant: Variant) -> Self {
        Self::builder(variant).build()
    }

    /// Build a workbench with a simulated executor tuned by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let variant = config.workbench.variant;
        let exec = &config.execution;
        Self::builder(variant)
            .executor(Arc::new(SimulatedExecutor::from_config(exec, variant)))
            .log_capacity(config.workbench.log_capacity)
            .event_capacity(config.workbench.event_capacity)
            .step_interval(Duration::from_millis(exec.step_interval(variant)))
            .completion_delay(Duration::from_millis(exec.completion_delay_ms))
            .build()
    }

    pub fn variant(&self) -> Variant {
        self.shared.variant
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one transition under the lock. Events collected by `f` plus one
    /// `LogAppended` per new log entry are published before the lock drops.
    fn commit<R>(&self, f: impl FnOnce(&mut Inner, &mut Vec<WorkflowEvent>) -> R) -> R {
        let mut inner = self.lock();
        let first_log = inner.state.logs.next_id();
        let mut events = Vec::new();
        let out = f(&mut *inner, &mut events);
        for entry_id in first_log..inner.state.logs.next_id() {
            events.push(WorkflowEvent::LogAppended { entry_id });
        }
        if !events.is_empty() {
            inner.state.revision += 1;
            for event in events {
                self.shared.events.publish(event);
            }
        }
        out
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.shared.events.subscribe()
    }

    // -- Reads --

    pub fn snapshot(&self) -> WorkflowState {
        self.lock().state.clone()
    }

    pub fn elements(&self) -> Vec<WorkflowElement> {
        self.lock().state.elements.clone()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.lock().state.edges.clone()
    }

    pub fn find(&self, id: &str) -> Option<WorkflowElement> {
        self.lock().state.find(id).cloned()
    }

    pub fn selected(&self) -> Option<WorkflowElement> {
        self.lock().state.selected().cloned()
    }

    pub fn execution(&self) -> ExecutionState {
        self.lock().state.execution.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().state.logs.to_vec()
    }

    pub fn log_entry(&self, id: u64) -> Option<LogEntry> {
        self.lock().state.logs.get(id).cloned()
    }

    pub fn revision(&self) -> u64 {
        self.lock().state.revision
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.execution.is_running
    }

    // -- Mutations --

    pub fn add(&self, element: WorkflowElement) {
        self.commit(|inner, events| {
            events.push(WorkflowEvent::ElementAdded {
                id: element.id.clone(),
            });
            inner.state.add(element);
        })
    }

    /// Add a palette element of `kind` and return its id.
    pub fn add_new(&self, kind: ElementType) -> String {
        let element = spawn_element(kind);
        let id = element.id.clone();
        self.add(element);
        id
    }

    pub fn remove(&self, id: &str) -> bool {
        self.commit(|inner, events| {
            let removed = inner.state.remove(id);
            if removed {
                events.push(WorkflowEvent::ElementRemoved { id: id.to_string() });
            }
            removed
        })
    }

    pub fn update(&self, id: &str, patch: ElementPatch) -> bool {
        self.commit(|inner, events| {
            let updated = inner.state.update(id, patch);
            if updated {
                events.push(WorkflowEvent::ElementUpdated { id: id.to_string() });
            }
            updated
        })
    }

    pub fn move_element(&self, id: &str, x: f64, y: f64) -> bool {
        self.commit(|inner, events| {
            let moved = inner.state.move_element(id, x, y);
            if moved {
                events.push(WorkflowEvent::ElementMoved {
                    id: id.to_string(),
                    x,
                    y,
                });
            }
            moved
        })
    }

    /// Link two nodes. Only the agent variant has edges.
    pub fn connect(&self, source: &str, target: &str) -> bool {
        if self.shared.variant != Variant::Agent {
            return false;
        }
        self.commit(|inner, events| match inner.state.connect(source, target) {
            Some(edge_id) => {
                events.push(WorkflowEvent::Connected { edge_id });
                true
            }
            None => false,
        })
    }

    pub fn select(&self, id: Option<&str>) -> bool {
        self.commit(|inner, events| {
            let changed = inner.state.select(id);
            if changed {
                events.push(WorkflowEvent::SelectionChanged {
                    id: id.map(str::to_string),
                });
            }
            changed
        })
    }

    /// Replace every element. Edges that lose an endpoint are dropped.
    pub fn load_all(&self, elements: Vec<WorkflowElement>) -> usize {
        self.commit(|inner, events| {
            let edges = std::mem::take(&mut inner.state.edges);
            let count = inner.state.load_graph(elements, edges);
            events.push(WorkflowEvent::WorkflowLoaded { count });
            count
        })
    }

    pub fn load_graph(&self, elements: Vec<WorkflowElement>, edges: Vec<Edge>) -> usize {
        self.commit(|inner, events| {
            let count = inner.state.load_graph(elements, edges);
            events.push(WorkflowEvent::WorkflowLoaded { count });
            count
        })
    }

    /// Empty the workflow, abandoning any active run.
    pub fn clear(&self) {
        self.commit(|inner, events| {
            if let Some(run) = inner.run.take() {
                run.cancel.cancel();
            }
            inner.state.clear();
            events.push(WorkflowEvent::WorkflowCleared);
        });
        self.shared.paused.send_replace(false);
        info!("Workflow cleared");
    }

    pub fn append_log(&self, level: LogLevel, message: impl Into<String>) -> u64 {
        self.commit(|inner, _| inner.state.logs.append(LogLine::new(level, message)).id)
    }

    pub fn clear_logs(&self) {
        self.commit(|inner, events| {
            inner.state.logs.clear();
            events.push(WorkflowEvent::LogsCleared);
        })
    }

    // -- Execution controller --

    /// Begin a run over the current elements. Returns `false` when a run is
    /// already active or there is nothing to run.
    pub fn start(&self) -> bool {
        let started = self.commit(|inner, events| {
            let run_id = RunId::new();
            let plan = inner.state.begin_run(run_id.clone())?;
            if let Some(stale) = inner.run.take() {
                stale.cancel.cancel();
            }
            events.push(WorkflowEvent::RunStarted {
                run_id: run_id.clone(),
                total_steps: plan.len(),
            });
            let total = plan.len();
            inner.run = Some(ActiveRun {
                id: run_id.clone(),
                plan,
                cancel: CancellationToken::new(),
                in_flight: false,
            });
            Some((run_id, total))
        });
        match started {
            Some((run_id, total)) => {
                self.shared.paused.send_replace(false);
                info!(run = %run_id, steps = total, "Run started");
                true
            }
            None => false,
        }
    }

    /// Execute the next planned element.
    pub async fn step(&self) -> StepOutcome {
        let claim = self.commit(|inner, events| {
            let Inner { state, run } = inner;
            let Some(run) = run.as_mut().filter(|_| state.execution.is_running) else {
                return Claim::Done(StepOutcome::NotRunning, None);
            };
            if run.in_flight {
                return Claim::Done(StepOutcome::Busy, None);
            }
            let index = state.execution.current_step;
            let Some(element_id) = run.plan.get(index).cloned() else {
                return Claim::Done(StepOutcome::Exhausted, None);
            };

            let found = state.find(&element_id).cloned();
            match found {
                Some(element) => {
                    run.in_flight = true;
                    state.execution.current_element_id = Some(element_id.clone());
                    events.push(WorkflowEvent::StepStarted {
                        run_id: run.id.clone(),
                        element_id,
                        step: index + 1,
                    });
                    Claim::Execute {
                        run_id: run.id.clone(),
                        cancel: run.cancel.clone(),
                        element,
                        context: state.execution.context.clone(),
                    }
                }
                None => {
                    let resolution = StepResolution::Skipped {
                        element_id: element_id.clone(),
                    };
                    let (outcome, finished) = fold_step(state, &run.id, resolution, events);
                    Claim::Done(outcome, finished.then(|| run.id.clone()))
                }
            }
        });

        let (run_id, cancel, element, context) = match claim {
            Claim::Done(outcome, finished) => {
                if let Some(run_id) = finished {
                    self.schedule_finish(run_id);
                }
                return outcome;
            }
            Claim::Execute {
                run_id,
                cancel,
                element,
                context,
            } => (run_id, cancel, element, context),
        };

        let mut guard = ClaimGuard {
            workbench: self,
            run_id: run_id.clone(),
            folded: false,
        };
        debug!(run = %run_id, element = %element.id, "Executing step");
        let result = tokio::select! {
            r = self.shared.executor.execute(element.clone(), context) => Some(r),
            _ = cancel.cancelled() => None,
        };

        let (outcome, finished) = self.commit(|inner, events| {
            let Inner { state, run } = inner;
            match (run.as_mut(), result) {
                (Some(active), Some(result))
                    if active.id == run_id && !active.cancel.is_cancelled() =>
                {
                    active.in_flight = false;
                    let resolution = match result {
                        Ok(result) => StepResolution::Executed {
                            element: element.clone(),
                            result,
                        },
                        Err(e) => {
                            warn!(element = %element.id, error = %e, "Step executor failed");
                            StepResolution::Failed {
                                element: element.clone(),
                                error: e.to_string(),
                            }
                        }
                    };
                    fold_step(state, &run_id, resolution, events)
                }
                (active, _) => {
                    if let Some(active) = active.filter(|r| r.id == run_id) {
                        active.in_flight = false;
                    }
                    events.push(WorkflowEvent::StepDiscarded {
                        run_id: run_id.clone(),
                        element_id: element.id.clone(),
                    });
                    (
                        StepOutcome::Discarded {
                            element_id: element.id.clone(),
                        },
                        false,
                    )
                }
            }
        });
        guard.folded = true;

        if let StepOutcome::Discarded { element_id } = &outcome {
            debug!(run = %run_id, element = %element_id, "Discarded stale step result");
        }
        if finished {
            self.schedule_finish(run_id);
        }
        outcome
    }

    /// Stop `run_id` after the completion delay, unless something else
    /// already ended or replaced it.
    fn schedule_finish(&self, run_id: RunId) {
        let workbench = self.clone();
        let delay = self.shared.completion_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            workbench.stop_run(&run_id);
        });
    }

    /// Step through the whole plan, starting a run if none is active.
    ///
    /// Sleeps `step_interval` before each step and waits while paused.
    /// Stops its run when the plan is exhausted.
    pub async fn auto_run(&self) -> RunReport {
        if !self.is_running() {
            self.start();
        }
        let Some((run_id, cancel)) = self.active_run() else {
            return RunReport {
                run_id: None,
                steps_executed: 0,
                total_steps: 0,
                completed: false,
            };
        };

        let mut paused = self.shared.paused.subscribe();
        let mut steps_executed = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.shared.step_interval) => {}
            }
            let resumed = async {
                let _ = paused.wait_for(|p| !*p).await;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = resumed => {}
            }

            match self.step().await {
                outcome if outcome.advanced() => steps_executed += 1,
                StepOutcome::Busy => {
                    // Another caller holds the step; back off until it folds.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(BUSY_BACKOFF) => continue,
                    }
                }
                _ => break,
            }
            let exec = self.execution();
            if exec.current_step >= exec.total_steps {
                break;
            }
        }

        self.stop_run(&run_id);
        let exec = self.execution();
        let same_run = exec.run_id.as_ref() == Some(&run_id);
        RunReport {
            run_id: Some(run_id),
            steps_executed,
            total_steps: if same_run { exec.total_steps } else { 0 },
            completed: same_run && exec.is_complete(),
        }
    }

    fn active_run(&self) -> Option<(RunId, CancellationToken)> {
        let inner = self.lock();
        inner
            .run
            .as_ref()
            .filter(|_| inner.state.execution.is_running)
            .map(|r| (r.id.clone(), r.cancel.clone()))
    }

    /// Stop whatever run is active. Returns whether it had completed.
    pub fn stop(&self) -> Option<bool> {
        let run_id = self.active_run()?.0;
        self.stop_run(&run_id)
    }

    /// Stop `run_id` if it is still the active run.
    fn stop_run(&self, run_id: &RunId) -> Option<bool> {
        let completed = self.commit(|inner, events| {
            if inner.run.as_ref().map(|r| &r.id) != Some(run_id) {
                return None;
            }
            let completed = inner.state.finish_run()?;
            if let Some(run) = inner.run.take() {
                run.cancel.cancel();
            }
            events.push(WorkflowEvent::RunStopped {
                run_id: run_id.clone(),
                completed,
            });
            Some(completed)
        })?;
        self.shared.paused.send_replace(false);
        info!(run = %run_id, completed, "Run stopped");
        Some(completed)
    }

    /// Suspend auto-run between steps. Agent variant only.
    pub fn pause(&self) -> bool {
        self.set_paused(true)
    }

    pub fn resume(&self) -> bool {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> bool {
        if self.shared.variant != Variant::Agent {
            return false;
        }
        let changed = self.commit(|inner, events| {
            let Some(run_id) = inner.run.as_ref().map(|r| r.id.clone()) else {
                return false;
            };
            if !inner.state.set_paused(paused) {
                return false;
            }
            events.push(if paused {
                WorkflowEvent::RunPaused { run_id }
            } else {
                WorkflowEvent::RunResumed { run_id }
            });
            true
        });
        if changed {
            self.shared.paused.send_replace(paused);
        }
        changed
    }

    /// Abandon any run, zero the execution state and drop all logs.
    pub fn reset(&self) {
        self.commit(|inner, events| {
            if let Some(run) = inner.run.take() {
                run.cancel.cancel();
            }
            inner.state.reset_execution();
            events.push(WorkflowEvent::ExecutionReset);
            events.push(WorkflowEvent::LogsCleared);
        });
        self.shared.paused.send_replace(false);
        debug!("Execution reset");
    }

    // -- Interchange --

    /// Elements as pretty canonical JSON.
    pub fn export_json(&self) -> Result<String> {
        let json = interchange::to_json(&self.elements())?;
        self.append_log(LogLevel::Success, "Workflow exported to JSON");
        Ok(json)
    }

    pub fn export_agent_document(&self) -> Result<String> {
        let json = self.agent_document().to_json()?;
        self.append_log(LogLevel::Success, "Workflow exported to JSON");
        Ok(json)
    }

    /// Write canonical JSON to `path`. Success is logged once the file is
    /// written; a failed write logs one error entry instead.
    pub fn export_to(&self, path: &Path) -> Result<()> {
        let json = interchange::to_json(&self.elements())?;
        self.write_export(path, json)
    }

    pub fn export_agent_document_to(&self, path: &Path) -> Result<()> {
        let json = self.agent_document().to_json()?;
        self.write_export(path, json)
    }

    fn agent_document(&self) -> AgentDocument {
        let inner = self.lock();
        AgentDocument::from_workflow(&inner.state.elements, &inner.state.edges)
    }

    fn write_export(&self, path: &Path, json: String) -> Result<()> {
        match std::fs::write(path, json) {
            Ok(()) => {
                self.append_log(LogLevel::Success, "Workflow exported to JSON");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Export failed");
                self.append_log(LogLevel::Error, format!("Export failed: {}", e));
                Err(e.into())
            }
        }
    }

    /// Replace the workflow with a canonical element array. On malformed
    /// input one error entry is logged and nothing else changes.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        match interchange::parse_elements(json) {
            Ok(elements) => {
                let count = self.load_all(elements);
                self.append_log(LogLevel::Success, "Workflow imported from JSON");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Import failed");
                self.append_log(
                    LogLevel::Error,
                    "Import failed: invalid JSON. Expected an array of workflow elements",
                );
                Err(e)
            }
        }
    }

    pub fn import_agent_document(&self, json: &str) -> Result<usize> {
        match AgentDocument::parse(json) {
            Ok(doc) => {
                let (elements, edges) = doc.into_workflow();
                let count = self.load_graph(elements, edges);
                self.append_log(LogLevel::Success, "Workflow imported from JSON");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Import failed");
                self.append_log(
                    LogLevel::Error,
                    "Import failed: invalid JSON. Expected {agents, links}",
                );
                Err(e)
            }
        }
    }

    // -- Persistence --

    /// Write the element array under `key`, overwriting what was there.
    pub async fn save_to(&self, store: &dyn BlobStore, key: &str) -> Result<()> {
        let json = interchange::to_json(&self.elements())?;
        match store.put(key, json).await {
            Ok(()) => {
                self.append_log(LogLevel::Success, "Workflow saved");
                Ok(())
            }
            Err(e) => {
                self.append_log(LogLevel::Error, format!("Save failed: {}", e));
                Err(e)
            }
        }
    }

    /// Load the element array saved under `key`. An absent key or an empty
    /// array leaves the workflow untouched and returns 0.
    pub async fn load_from(&self, store: &dyn BlobStore, key: &str) -> Result<usize> {
        let loaded = store
            .get(key)
            .await
            .and_then(|blob| blob.map(|json| interchange::parse_elements(&json)).transpose());
        match loaded {
            Ok(Some(elements)) if !elements.is_empty() => Ok(self.load_all(elements)),
            Ok(_) => {
                self.append_log(LogLevel::Info, "No saved workflow");
                Ok(0)
            }
            Err(e) => {
                self.append_log(LogLevel::Error, format!("Load failed: {}", e));
                Err(e)
            }
        }
    }
}

/// Apply a resolved step to the state. Returns the outcome and whether it
/// completed the final planned step.
fn fold_step(
    state: &mut WorkflowState,
    run_id: &RunId,
    resolution: StepResolution,
    events: &mut Vec<WorkflowEvent>,
) -> (StepOutcome, bool) {
    let Some(step) = state.complete_step(&resolution) else {
        return (StepOutcome::Exhausted, false);
    };
    let element_id = resolution.element_id().to_string();
    events.push(WorkflowEvent::StepCompleted {
        run_id: run_id.clone(),
        element_id: element_id.clone(),
        step,
    });
    let outcome = match resolution {
        StepResolution::Executed { result, .. } => StepOutcome::Executed {
            element_id,
            step,
            result,
        },
        StepResolution::Failed { error, .. } => StepOutcome::Failed {
            element_id,
            step,
            error,
        },
        StepResolution::Skipped { .. } => StepOutcome::Skipped { element_id, step },
    };
    (outcome, step == state.execution.total_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_core::error::FlowdeckError;
    use futures::future::BoxFuture;
    use serde_json::json;

    fn fast(variant: Variant) -> Workbench {
        Workbench::builder(variant)
            .executor(Arc::new(SimulatedExecutor::instant()))
            .step_interval(Duration::ZERO)
            .completion_delay(Duration::ZERO)
            .build()
    }

    fn action(id: &str, label: &str) -> WorkflowElement {
        WorkflowElement::with_id(id, ElementType::Action, label)
    }

    struct FailingExecutor;

    impl StepExecutor for FailingExecutor {
        fn execute(
            &self,
            element: WorkflowElement,
            _context: ExecutionContext,
        ) -> BoxFuture<'_, Result<StepResult>> {
            Box::pin(async move {
                Err(FlowdeckError::StepExecution {
                    element: element.id,
                    message: "boom".into(),
                })
            })
        }
    }

    struct SlowExecutor;

    impl StepExecutor for SlowExecutor {
        fn execute(
            &self,
            element: WorkflowElement,
            _context: ExecutionContext,
        ) -> BoxFuture<'_, Result<StepResult>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(SimulatedExecutor::instant().simulate(&element))
            })
        }
    }

    #[tokio::test]
    async fn test_single_action_scenario() {
        let wb = fast(Variant::Generic);
        wb.add(action("action-1", "Fetch Data"));
        let logs_before = wb.logs().len();

        assert!(wb.start());
        let exec = wb.execution();
        assert!(exec.is_running);
        assert_eq!(exec.total_steps, 1);
        assert_eq!(exec.current_step, 0);

        let logs_started = wb.logs().len();
        assert_eq!(logs_started, logs_before + 1);

        let outcome = wb.step().await;
        assert!(matches!(outcome, StepOutcome::Executed { step: 1, .. }));
        let exec = wb.execution();
        assert_eq!(exec.current_step, 1);
        assert_eq!(exec.context.field("action-1", "status"), Some(&json!("completed")));
        let logs = wb.logs();
        assert_eq!(logs.len(), logs_started + 1);
        assert_eq!(logs.last().unwrap().level, LogLevel::Success);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!wb.is_running());
        assert_eq!(wb.logs().last().unwrap().message, "Run completed successfully");
    }

    #[tokio::test]
    async fn test_start_requires_elements() {
        let wb = fast(Variant::Generic);
        assert!(!wb.start());
        assert_eq!(wb.step().await, StepOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_step_after_last_is_noop() {
        let wb = Workbench::builder(Variant::Generic)
            .executor(Arc::new(SimulatedExecutor::instant()))
            .completion_delay(Duration::from_secs(60))
            .build();
        wb.add(action("a", "A"));
        wb.start();
        wb.step().await;
        let logs = wb.logs().len();

        assert_eq!(wb.step().await, StepOutcome::Exhausted);
        assert_eq!(wb.execution().current_step, 1);
        assert_eq!(wb.logs().len(), logs);
    }

    #[tokio::test]
    async fn test_executor_failure_is_logged_and_run_continues() {
        let wb = Workbench::builder(Variant::Generic)
            .executor(Arc::new(FailingExecutor))
            .completion_delay(Duration::from_secs(60))
            .build();
        wb.add(action("a", "A"));
        wb.add(action("b", "B"));
        wb.start();

        let outcome = wb.step().await;
        assert!(matches!(outcome, StepOutcome::Failed { step: 1, .. }));
        let last = wb.logs().last().cloned().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.starts_with("Step 1/2 failed: A"));
        assert_eq!(wb.execution().context.field("a", "status"), Some(&json!("error")));

        assert!(wb.step().await.advanced());
        assert_eq!(wb.execution().current_step, 2);
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_result() {
        let wb = Workbench::builder(Variant::Generic)
            .executor(Arc::new(SlowExecutor))
            .build();
        wb.add(action("a", "A"));
        wb.start();

        let runner = wb.clone();
        let handle = tokio::spawn(async move { runner.step().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(wb.step().await, StepOutcome::Busy);

        assert_eq!(wb.stop(), Some(false));
        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Discarded {
                element_id: "a".into()
            }
        );
        let exec = wb.execution();
        assert_eq!(exec.current_step, 0);
        assert!(exec.context.is_empty());
        assert_eq!(wb.logs().last().unwrap().level, LogLevel::Warning);
    }

    #[tokio::test]
    async fn test_deleted_element_is_skipped() {
        let wb = Workbench::builder(Variant::Generic)
            .executor(Arc::new(SimulatedExecutor::instant()))
            .completion_delay(Duration::from_secs(60))
            .build();
        wb.add(action("a", "A"));
        wb.add(action("b", "B"));
        wb.start();
        wb.remove("a");

        let outcome = wb.step().await;
        assert_eq!(
            outcome,
            StepOutcome::Skipped {
                element_id: "a".into(),
                step: 1
            }
        );
        assert_eq!(wb.execution().total_steps, 2);
        assert!(matches!(wb.step().await, StepOutcome::Executed { step: 2, .. }));
    }

    #[tokio::test]
    async fn test_auto_run_log_count() {
        let wb = fast(Variant::Generic);
        for i in 0..3 {
            wb.add(action(&format!("a{}", i), &format!("A{}", i)));
        }
        wb.clear_logs();

        let report = wb.auto_run().await;
        assert!(report.completed);
        assert_eq!(report.steps_executed, 3);
        assert_eq!(report.total_steps, 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let logs = wb.logs();
        assert_eq!(logs.len(), 3 + 2);
        assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(wb.execution().context.memory().len(), 3);
    }

    #[tokio::test]
    async fn test_pause_is_agent_only() {
        let generic = fast(Variant::Generic);
        generic.add(action("a", "A"));
        generic.start();
        assert!(!generic.pause());

        let agent = fast(Variant::Agent);
        agent.add(WorkflowElement::with_id("llm-1", ElementType::Llm, "Writer"));
        assert!(!agent.pause());
        agent.start();
        assert!(agent.pause());
        assert!(!agent.pause());
        assert!(agent.execution().is_paused);
        assert!(agent.resume());
        assert!(!agent.execution().is_paused);
    }

    #[tokio::test]
    async fn test_paused_auto_run_waits() {
        let wb = fast(Variant::Agent);
        wb.add(WorkflowElement::with_id("llm-1", ElementType::Llm, "Writer"));
        wb.add(WorkflowElement::with_id("tool-1", ElementType::Tool, "Search"));
        wb.start();
        wb.pause();

        let runner = wb.clone();
        let handle = tokio::spawn(async move { runner.auto_run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(wb.execution().current_step, 0);

        wb.resume();
        let report = handle.await.unwrap();
        assert!(report.completed);
        assert_eq!(report.steps_executed, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_logs_and_execution() {
        let wb = fast(Variant::Generic);
        wb.add(action("a", "A"));
        wb.start();
        wb.reset();

        assert!(wb.logs().is_empty());
        assert_eq!(wb.execution(), ExecutionState::default());
        assert_eq!(wb.step().await, StepOutcome::NotRunning);
        assert_eq!(wb.elements().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_generic_is_noop() {
        let wb = fast(Variant::Generic);
        wb.add(action("a", "A"));
        wb.add(action("b", "B"));
        assert!(!wb.connect("a", "b"));
        assert!(wb.edges().is_empty());
    }

    #[tokio::test]
    async fn test_events_follow_mutations() {
        let wb = fast(Variant::Generic);
        let mut rx = wb.subscribe();
        let rev = wb.revision();

        wb.add(action("a", "A"));
        assert_eq!(
            rx.recv().await.unwrap(),
            WorkflowEvent::ElementAdded { id: "a".into() }
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::LogAppended { .. }
        ));
        assert_eq!(wb.revision(), rev + 1);

        assert!(!wb.remove("ghost"));
        assert_eq!(wb.revision(), rev + 1);
    }

    #[tokio::test]
    async fn test_import_failure_leaves_store() {
        let wb = fast(Variant::Generic);
        wb.add(action("a", "A"));
        let before = wb.elements();
        let logs = wb.logs().len();

        assert!(wb.import_json("not json").is_err());
        assert_eq!(wb.elements(), before);
        let after = wb.logs();
        assert_eq!(after.len(), logs + 1);
        assert_eq!(after.last().unwrap().level, LogLevel::Error);
    }

    fn slow(variant: Variant) -> Workbench {
        Workbench::builder(variant)
            .executor(Arc::new(SlowExecutor))
            .step_interval(Duration::ZERO)
            .completion_delay(Duration::from_secs(60))
            .build()
    }

    #[tokio::test]
    async fn test_dropped_step_releases_claim() {
        let wb = slow(Variant::Generic);
        wb.add(action("a", "A"));
        wb.add(action("b", "B"));
        wb.start();

        let timed_out = tokio::time::timeout(Duration::from_millis(10), wb.step()).await;
        assert!(timed_out.is_err());
        assert_eq!(wb.execution().current_step, 0);

        let outcome = wb.step().await;
        assert!(matches!(outcome, StepOutcome::Executed { step: 1, .. }));

        let report = tokio::time::timeout(Duration::from_secs(2), wb.auto_run())
            .await
            .unwrap();
        assert!(report.completed);
        assert_eq!(report.steps_executed, 1);
        assert!(!wb.is_running());
    }

    #[tokio::test]
    async fn test_auto_run_waits_out_busy_step() {
        let wb = slow(Variant::Generic);
        wb.add(action("a", "A"));
        wb.start();

        let runner = wb.clone();
        let held = tokio::spawn(async move { runner.step().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = tokio::time::timeout(Duration::from_secs(2), wb.auto_run())
            .await
            .unwrap();
        assert!(matches!(held.await.unwrap(), StepOutcome::Executed { step: 1, .. }));
        assert!(report.completed);
        assert_eq!(report.steps_executed, 0);
        assert_eq!(wb.execution().context.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_result() {
        let wb = slow(Variant::Generic);
        wb.add(action("a", "A"));
        wb.start();

        let runner = wb.clone();
        let handle = tokio::spawn(async move { runner.step().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        wb.reset();

        assert_eq!(
            handle.await.unwrap(),
            StepOutcome::Discarded {
                element_id: "a".into()
            }
        );
        let exec = wb.execution();
        assert!(!exec.is_running);
        assert_eq!(exec.current_step, 0);
        assert!(exec.context.is_empty());
        assert!(wb.logs().is_empty());
        assert_eq!(wb.elements().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_result() {
        let wb = slow(Variant::Generic);
        wb.add(action("a", "A"));
        wb.start();

        let runner = wb.clone();
        let handle = tokio::spawn(async move { runner.step().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        wb.clear();

        assert_eq!(
            handle.await.unwrap(),
            StepOutcome::Discarded {
                element_id: "a".into()
            }
        );
        let exec = wb.execution();
        assert!(!exec.is_running);
        assert!(exec.context.is_empty());
        assert!(wb.elements().is_empty());
    }

    #[tokio::test]
    async fn test_finish_timer_ignores_replaced_run() {
        let wb = Workbench::builder(Variant::Generic)
            .executor(Arc::new(SimulatedExecutor::instant()))
            .completion_delay(Duration::from_millis(100))
            .build();
        wb.add(action("a", "A"));
        wb.start();
        let first = wb.execution().run_id.clone();

        assert!(matches!(wb.step().await, StepOutcome::Executed { step: 1, .. }));
        assert_eq!(wb.stop(), Some(true));
        assert!(wb.start());
        let second = wb.execution().run_id.clone();
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let exec = wb.execution();
        assert!(exec.is_running);
        assert_eq!(exec.run_id, second);
        assert_eq!(exec.current_step, 0);
    }
}
