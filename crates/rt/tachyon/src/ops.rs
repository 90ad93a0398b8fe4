//! Cooperative operators: yielding, priority changes, executor migration.
//!
//! All of these act on the task currently being polled, through its header.
//! Awaited from outside a task (say, under `block_on`) they degrade to
//! no-ops rather than panicking, matching their cooperative character.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::exec::{ExecutorRef, context};
use crate::task::Priority;

/// Suspends the current task and reposts it on its recorded executor at its
/// recorded priority, letting same-or-higher-priority work run first.
#[must_use = "futures do nothing unless awaited"]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Returns `true` if higher-priority work is pending on the current worker.
///
/// Cheap enough to call in a tight loop; pair with
/// [`yield_if_requested`] or [`yield_now`].
pub fn yield_requested() -> bool {
    context::with_worker(|w| w.shared.yield_requested()).unwrap_or(false)
}

/// Yields only if [`yield_requested`] is set; otherwise completes
/// immediately without suspending.
#[must_use = "futures do nothing unless awaited"]
pub fn yield_if_requested() -> YieldIfRequested {
    YieldIfRequested { yielded: false }
}

/// Future returned by [`yield_if_requested`].
pub struct YieldIfRequested {
    yielded: bool,
}

impl Future for YieldIfRequested {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded || !yield_requested() {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Re-arms the current task at priority `band` and reposts it, so the
/// remainder of the task runs at the new priority.
///
/// Completes without suspending when the task is already at `band`.
#[must_use = "futures do nothing unless awaited"]
pub fn change_priority(band: usize) -> ChangePriority {
    ChangePriority {
        prio: Priority::new(band),
        moved: false,
    }
}

/// Future returned by [`change_priority`].
pub struct ChangePriority {
    prio: Priority,
    moved: bool,
}

impl Future for ChangePriority {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.moved {
            return Poll::Ready(());
        }
        let Some(task) = context::current_task() else {
            return Poll::Ready(());
        };
        if task.priority() == self.prio {
            return Poll::Ready(());
        }
        task.set_priority(self.prio);
        self.moved = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Migrates the current task: the remainder runs on `exec` at the task's
/// recorded priority.
///
/// Completes without suspending when the task is already on `exec`.
#[must_use = "futures do nothing unless awaited"]
pub fn resume_on(exec: ExecutorRef) -> ResumeOn {
    ResumeOn {
        target: exec,
        moved: false,
    }
}

/// Future returned by [`resume_on`].
pub struct ResumeOn {
    target: ExecutorRef,
    moved: bool,
}

impl Future for ResumeOn {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.moved {
            return Poll::Ready(());
        }
        let Some(task) = context::current_task() else {
            return Poll::Ready(());
        };
        if Arc::ptr_eq(&task.executor(), &self.target) {
            return Poll::Ready(());
        }
        task.set_executor(Arc::clone(&self.target));
        self.moved = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Enters `exec` (typically a braid), returning a scope that can later
/// [`exit`](ExecScope::exit) back to the executor the task entered from.
#[must_use = "futures do nothing unless awaited"]
pub fn enter(exec: ExecutorRef) -> Enter {
    Enter {
        inner: resume_on(exec),
        prev: None,
    }
}

/// Future returned by [`enter`].
pub struct Enter {
    inner: ResumeOn,
    prev: Option<ExecutorRef>,
}

impl Future for Enter {
    type Output = ExecScope;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ExecScope> {
        if self.prev.is_none() {
            self.prev = context::current_task().map(|t| t.executor());
        }
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(()) => Poll::Ready(ExecScope {
                prev: self.prev.take(),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Handle capturing where an [`enter`] came from.
#[must_use = "exit the scope to leave the entered executor"]
pub struct ExecScope {
    prev: Option<ExecutorRef>,
}

impl ExecScope {
    /// Migrates the task back to the executor captured at entry.
    ///
    /// Not calling this is fine: the task then simply finishes on the
    /// entered executor.
    pub fn exit(self) -> ResumeOn {
        match self.prev {
            Some(prev) => resume_on(prev),
            // Entered from outside any task: nothing to return to.
            None => ResumeOn {
                target: dead_end(),
                moved: true,
            },
        }
    }
}

/// Placeholder executor for the degenerate already-moved [`ResumeOn`].
fn dead_end() -> ExecutorRef {
    struct DeadEnd;
    impl crate::exec::Executor for DeadEnd {
        fn name(&self) -> &str {
            "dead-end"
        }
        fn submit(
            &self,
            _item: crate::task::WorkItem,
            _prio: Priority,
            _hint: Option<crate::task::WorkerId>,
        ) {
            unreachable!("dead-end executor never receives work");
        }
    }
    Arc::new(DeadEnd)
}

/// Amortized yield check: polls [`yield_requested`] every `period`
/// iterations instead of every iteration.
///
/// ```ignore
/// let mut check = CheckYieldCounter::new(1000);
/// for item in work {
///     process(item);
///     check.tick().await;
/// }
/// ```
pub struct CheckYieldCounter {
    period: u32,
    left: u32,
}

impl CheckYieldCounter {
    /// A counter that checks every `period` ticks (`period >= 1`).
    pub fn new(period: u32) -> Self {
        let period = period.max(1);
        Self { period, left: period }
    }

    /// Restarts the countdown.
    pub fn reset(&mut self) {
        self.left = self.period;
    }

    /// Counts one iteration; on every `period`-th call, yields if a
    /// higher-priority arrival requested it.
    pub async fn tick(&mut self) {
        self.left -= 1;
        if self.left == 0 {
            self.left = self.period;
            if yield_requested() {
                yield_now().await;
            }
        }
    }
}
