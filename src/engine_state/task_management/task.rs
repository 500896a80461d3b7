//! # Task System Core Traits
//!
//! This module defines the unit of off-thread work accepted by the
//! `TickSyncScheduler`.
//!
//! ## Task Lifecycle
//! 1. A `Task` is created and handed to `TickSyncScheduler::schedule_off_thread()`
//! 2. The task's `process()` method is called on a worker thread
//! 3. The output travels back to the tick thread as a type-erased value
//! 4. At the next tick boundary the continuation receives the output, typed again
//!
//! ## Thread Safety
//! - `Task` must be `Send` to be transferred to a worker
//! - `Task::Output` must be `Send` to be transferred back
//! - Tasks must not mutate shared world state; they read it and return results

use std::any::Any;

use crate::core::error::TaskError;

/// A unit of work that runs on a worker thread.
///
/// Tasks own everything they need (typically cloned `MtResource` handles plus
/// plain parameters) and must be side-effect free with respect to world state:
/// all mutation happens later, on the tick thread, in the continuation.
pub trait Task: Send + 'static {
    /// What the task hands back to its continuation.
    type Output: Send + 'static;

    /// Performs the work. Runs on a worker thread.
    fn process(self) -> Result<Self::Output, TaskError>;
}

/// Adapts a closure into a `Task`.
///
/// # Examples
/// ```
/// use vessel_engine::engine_state::task_management::task::{FnTask, Task};
///
/// let task = FnTask::new(|| Ok(6 * 7));
/// assert_eq!(task.process(), Ok(42));
/// ```
pub struct FnTask<F>(F);

impl<F> FnTask<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        FnTask(f)
    }
}

impl<F, T> Task for FnTask<F>
where
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn process(self) -> Result<T, TaskError> {
        (self.0)()
    }
}

/// Output of a task after it has crossed back to the tick thread.
pub(crate) type Outcome = Result<Box<dyn Any + Send>, TaskError>;

/// Object-safe form of `Task`, so differently typed tasks share one channel.
pub(crate) trait ErasedTask: Send {
    fn run(self: Box<Self>) -> Outcome;
}

impl<T: Task> ErasedTask for T {
    fn run(self: Box<Self>) -> Outcome {
        (*self)
            .process()
            .map(|output| Box::new(output) as Box<dyn Any + Send>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_task_output_downcasts_back() {
        let task: Box<dyn ErasedTask> = Box::new(FnTask::new(|| Ok(String::from("done"))));
        let output = task.run().unwrap();
        assert_eq!(*output.downcast::<String>().unwrap(), "done");
    }

    #[test]
    fn failures_pass_through_unchanged() {
        let task: Box<dyn ErasedTask> =
            Box::new(FnTask::new(|| Err::<(), _>(TaskError::Failed("no".into()))));
        assert_eq!(task.run().err(), Some(TaskError::Failed("no".into())));
    }
}
