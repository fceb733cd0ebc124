//! Task dispatching.
//!
//! A batch of named tasks is checked against the cache first; only the
//! misses are executed, concurrently and each under its own timeout. Any
//! executor failure is absorbed by the task's fallback so a batch always
//! yields one value per task.

mod dispatcher;
mod task;

pub use dispatcher::TaskDispatcher;
pub use task::{Fallback, Task, TaskDefinition, TaskRequest, TaskResult, TaskSource};
