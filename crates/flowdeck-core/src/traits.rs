use futures::future::BoxFuture;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::types::{StepResult, WorkflowElement};

/// Step executor: produces the result of running one element.
pub trait StepExecutor: Send + Sync + 'static {
    /// Execute one element against a snapshot of the run context.
    ///
    /// Implementations may take arbitrarily long; the caller does not hold
    /// any workbench lock while awaiting.
    fn execute(
        &self,
        element: WorkflowElement,
        context: ExecutionContext,
    ) -> BoxFuture<'_, Result<StepResult>>;
}

/// Blob store: key-value persistence backend.
pub trait BlobStore: Send + Sync + 'static {
    /// Write a value, overwriting any previous value under the key.
    fn put(&self, key: &str, value: String) -> BoxFuture<'_, Result<()>>;

    /// Read a value; `None` if the key was never written.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>>;
}
