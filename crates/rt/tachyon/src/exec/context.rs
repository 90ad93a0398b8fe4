//! Thread-local execution context.
//!
//! Three pieces of per-thread state tie the operators to the scheduler:
//!
//! - the *executor stack*: which executor submissions from this thread go
//!   to (worker threads push their executor at startup; braid drains and
//!   manual pumps push for the duration of a batch);
//! - the *task stack*: the task currently being polled, so `yield`,
//!   `change_priority`, and friends can reach their own header;
//! - the *worker registration*: set once on CPU-executor worker threads so
//!   the submit fast path can use the local queues directly.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crossbeam_deque::Worker as Deque;

use crate::exec::ExecutorRef;
use crate::exec::cpu::WorkerShared;
use crate::task::{TaskCore, WorkItem};

/// Worker identity for the submit fast path.
pub(crate) struct WorkerTls {
    /// Unique id of the owning executor core.
    pub exec_id: usize,
    /// This worker's index.
    pub index: usize,
    /// Shared scheduling state (current priority, yield bits).
    pub shared: Arc<WorkerShared>,
    /// Per-priority local FIFO deques.
    pub locals: Rc<Vec<Deque<WorkItem>>>,
}

thread_local! {
    static EXEC_STACK: RefCell<Vec<ExecutorRef>> = const { RefCell::new(Vec::new()) };
    static TASK_STACK: RefCell<Vec<Arc<TaskCore>>> = const { RefCell::new(Vec::new()) };
    static WORKER: RefCell<Option<WorkerTls>> = const { RefCell::new(None) };
}

/// RAII guard popping the executor stack.
pub(crate) struct ExecGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Makes `exec` the submission target for the current thread until the
/// guard drops.
pub(crate) fn enter_executor(exec: ExecutorRef) -> ExecGuard {
    EXEC_STACK.with(|s| s.borrow_mut().push(exec));
    ExecGuard {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for ExecGuard {
    fn drop(&mut self) {
        EXEC_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// RAII guard popping both the task and executor stacks.
pub(crate) struct TaskGuard {
    _exec: ExecGuard,
}

/// Marks `task` as the task being polled on this thread, with `exec` as the
/// submission target for anything it spawns.
pub(crate) fn enter_task(task: Arc<TaskCore>, exec: ExecutorRef) -> TaskGuard {
    TASK_STACK.with(|s| s.borrow_mut().push(task));
    TaskGuard {
        _exec: enter_executor(exec),
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        TASK_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// The innermost entered executor, if any.
pub(crate) fn current_executor() -> Option<ExecutorRef> {
    EXEC_STACK.with(|s| s.borrow().last().cloned())
}

/// The task currently being polled on this thread, if any.
pub(crate) fn current_task() -> Option<Arc<TaskCore>> {
    TASK_STACK.with(|s| s.borrow().last().cloned())
}

/// RAII guard clearing the worker registration.
pub(crate) struct WorkerGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Registers the current thread as a CPU-executor worker.
pub(crate) fn register_worker(worker: WorkerTls) -> WorkerGuard {
    WORKER.with(|w| {
        let mut slot = w.borrow_mut();
        debug_assert!(slot.is_none(), "thread already registered as a worker");
        *slot = Some(worker);
    });
    WorkerGuard {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        WORKER.with(|w| {
            *w.borrow_mut() = None;
        });
    }
}

/// Runs `f` with the current thread's worker registration, if any.
pub(crate) fn with_worker<R>(f: impl FnOnce(&WorkerTls) -> R) -> Option<R> {
    WORKER.with(|w| w.borrow().as_ref().map(f))
}
