pub mod executor;
pub mod interchange;
pub mod log;
pub mod state;
pub mod workbench;

pub use executor::SimulatedExecutor;
pub use interchange::{AgentDocument, AgentRecord, LinkRecord};
pub use log::{LogLine, LogStore};
pub use state::{spawn_element, ExecutionState, RunPhase, StepResolution, WorkflowState};
pub use workbench::{RunReport, StepOutcome, Workbench, WorkbenchBuilder};
