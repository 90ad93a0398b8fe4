//! Executors.
//!
//! An executor accepts [`WorkItem`]s and arranges for them to run. The
//! concrete executors are:
//!
//! - [`CpuExecutor`](cpu::CpuExecutor): N worker threads, P priority bands,
//!   work stealing over a topology matrix.
//! - [`ManualExecutor`](manual::ManualExecutor): no threads; the host pumps
//!   it with `run_one`/`run_n`/`run_all`.
//! - [`Braid`](braid::Braid): serializes its submissions onto a parent
//!   executor.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::task::{Priority, WorkItem, WorkerId};

pub mod braid;
pub mod cpu;
pub mod manual;

pub(crate) mod context;
pub(crate) mod matrix;
pub(crate) mod queues;

pub use matrix::StealStrategy;

#[cfg(test)]
pub(crate) mod test_util;

/// Anything that can accept submitted work.
///
/// Implementations must never block the submitter and must tolerate
/// submissions from any thread, including their own workers.
pub trait Executor: Send + Sync + 'static {
    /// Human-readable name, used in thread names and logs.
    fn name(&self) -> &str;

    /// Number of priority bands this executor serves.
    ///
    /// Submissions at a higher band are clamped to the last served band.
    fn priority_count(&self) -> usize {
        1
    }

    /// Enqueues one item at the given priority, optionally targeting a
    /// specific worker.
    fn submit(&self, item: WorkItem, prio: Priority, hint: Option<WorkerId>);

    /// Enqueues a batch of items at the given priority.
    ///
    /// The default forwards to [`submit`](Executor::submit); the CPU
    /// executor overrides this to place the batch once and fan out wakes.
    fn submit_bulk(&self, items: Vec<WorkItem>, prio: Priority) {
        for item in items {
            self.submit(item, prio, None);
        }
    }
}

/// Shared handle to an executor.
pub type ExecutorRef = Arc<dyn Executor>;

static DEFAULT_EXECUTOR: RwLock<Option<ExecutorRef>> = RwLock::new(None);

/// Installs the process-wide default executor.
///
/// Used by `spawn` and `post` when called from a thread that is not a worker
/// of any executor. The executor must outlive every thread that submits
/// through it.
pub fn set_default_executor(exec: ExecutorRef) {
    *DEFAULT_EXECUTOR.write() = Some(exec);
}

/// Returns the process-wide default executor, if one was installed.
pub fn default_executor() -> Option<ExecutorRef> {
    DEFAULT_EXECUTOR.read().clone()
}

/// The executor submissions from the current thread go to: the innermost
/// entered executor (worker thread, braid drain, manual pump), else the
/// process default.
pub fn current_executor() -> Option<ExecutorRef> {
    context::current_executor().or_else(default_executor)
}
