use std::time::Duration;

use crate::error::Result;
use crate::rpc::RpcRequest;
use crate::types::TaskId;

/// Periodic delivery of a request to the agent that owns this scheduler.
pub trait Scheduler: Send + Sync {
    /// Start delivering `request` every `interval`. Returns a task id usable
    /// with [`Scheduler::cancel`].
    fn schedule(&self, request: RpcRequest, interval: Duration) -> Result<TaskId>;

    /// Stop a task. Unknown ids are a no-op.
    fn cancel(&self, task_id: &str) -> Result<()>;
}
