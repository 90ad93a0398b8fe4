//! Task primitive.
//!
//! A task is a heap-allocated, pinned, dynamically dispatched future plus a
//! header recording where and how it runs: its executor, its priority band,
//! and an optional worker hint. The header is what a [`Waker`] consults when
//! the task is resumed, so a task always reschedules onto its *recorded*
//! executor at its *recorded* priority, never onto whatever thread happened
//! to wake it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::exec::ExecutorRef;

/// A priority band. Band 0 is the highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(u8);

impl Priority {
    /// The highest priority band.
    pub const HIGHEST: Priority = Priority(0);

    /// Upper bound on the number of priority bands an executor may serve.
    pub const MAX_COUNT: usize = 64;

    /// Creates a priority for the given band, saturating at
    /// [`MAX_COUNT`](Self::MAX_COUNT)` - 1`.
    pub const fn new(band: usize) -> Self {
        if band >= Self::MAX_COUNT {
            Priority((Self::MAX_COUNT - 1) as u8)
        } else {
            Priority(band as u8)
        }
    }

    /// The band index.
    pub const fn band(self) -> usize {
        self.0 as usize
    }

    /// Clamps this priority to an executor serving `count` bands.
    pub(crate) fn clamp_to(self, count: usize) -> Priority {
        if self.band() >= count {
            Priority::new(count.saturating_sub(1))
        } else {
            self
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one worker thread of a CPU executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Creates a new `WorkerId`.
    pub const fn new(val: usize) -> Self {
        Self(val)
    }

    /// Returns the raw index.
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A panic payload captured from a task body.
pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// A type-erased runnable: a task handle or a bare callable.
pub enum WorkItem {
    /// A resumable task. Running it polls the task once.
    Task(Arc<TaskCore>),
    /// A plain callable. Runs to completion on the worker.
    Call(Box<dyn FnOnce() + Send + 'static>),
}

impl WorkItem {
    /// Wraps a callable.
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        WorkItem::Call(Box::new(f))
    }

    /// Executes the item on the current thread.
    ///
    /// A panicking callable terminates the process: bare callables have no
    /// join point to rethrow at.
    pub fn run(self) {
        match self {
            WorkItem::Task(task) => TaskCore::run(&task),
            WorkItem::Call(f) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
                    let msg = payload_message(&payload);
                    tracing::error!(target: "tachyon::task", %msg, "posted callable panicked");
                    std::process::abort();
                }
            }
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Task(_) => f.write_str("WorkItem::Task"),
            WorkItem::Call(_) => f.write_str("WorkItem::Call"),
        }
    }
}

/// Best-effort extraction of a panic message for logging.
pub(crate) fn payload_message(payload: &PanicPayload) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

// Task lifecycle states. A task is polled only by the worker that moved it
// SCHEDULED -> RUNNING, so polls never overlap.
const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The shared core of a spawned task: its future plus the scheduling header.
pub struct TaskCore {
    state: AtomicU8,
    /// Recorded priority band; resubmission reads this.
    prio: AtomicUsize,
    /// Preferred worker index, or `usize::MAX` for none.
    hint: AtomicUsize,
    /// Recorded executor; resubmission goes here.
    exec: Mutex<ExecutorRef>,
    /// The future, present until completion.
    future: Mutex<Option<TaskFuture>>,
}

impl TaskCore {
    /// Creates a task core in the idle (not yet submitted) state.
    pub(crate) fn new(
        future: impl Future<Output = ()> + Send + 'static,
        exec: ExecutorRef,
        prio: Priority,
        hint: Option<WorkerId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(IDLE),
            prio: AtomicUsize::new(prio.band()),
            hint: AtomicUsize::new(hint.map_or(usize::MAX, WorkerId::as_usize)),
            exec: Mutex::new(exec),
            future: Mutex::new(Some(Box::pin(future))),
        })
    }

    /// The task's recorded priority.
    pub fn priority(&self) -> Priority {
        Priority::new(self.prio.load(Ordering::Relaxed))
    }

    /// Re-arms the task at a new priority. Takes effect on the next
    /// resubmission.
    pub(crate) fn set_priority(&self, prio: Priority) {
        self.prio.store(prio.band(), Ordering::Relaxed);
    }

    /// The task's recorded worker hint.
    pub(crate) fn hint(&self) -> Option<WorkerId> {
        match self.hint.load(Ordering::Relaxed) {
            usize::MAX => None,
            idx => Some(WorkerId::new(idx)),
        }
    }

    /// The task's recorded executor.
    pub(crate) fn executor(&self) -> ExecutorRef {
        self.exec.lock().clone()
    }

    /// Redirects future resubmissions to a different executor.
    pub(crate) fn set_executor(&self, exec: ExecutorRef) {
        *self.exec.lock() = exec;
    }

    /// Submits the task for its first run.
    ///
    /// A task is submitted exactly once; reuse is a logic error.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let prev = self
            .state
            .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire);
        debug_assert!(prev.is_ok(), "task submitted twice");
        if prev.is_ok() {
            self.resubmit();
        }
    }

    fn resubmit(self: &Arc<Self>) {
        let exec = self.executor();
        let prio = self.priority();
        let hint = self.hint();
        exec.submit(WorkItem::Task(Arc::clone(self)), prio, hint);
    }

    /// Wake path: marks the task runnable and enqueues it on its recorded
    /// executor, unless it is already queued or mid-poll (a mid-poll wake is
    /// deferred and replayed by the runner when the poll returns).
    fn wake_inner(self: &Arc<Self>) {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let (next, submit) = match cur {
                IDLE => (SCHEDULED, true),
                RUNNING => (NOTIFIED, false),
                // Already queued, already notified, or finished.
                _ => return,
            };
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if submit {
                        self.resubmit();
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Polls the task once on the current thread.
    ///
    /// Called by executors for each dequeued task item.
    pub(crate) fn run(this: &Arc<Self>) {
        if this
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Stale queue entry (e.g. the task completed via another path).
            return;
        }

        let waker = Waker::from(Arc::clone(this));
        let mut cx = Context::from_waker(&waker);

        // Expose the task and its executor to in-task operators
        // (yield, change_priority, spawn-with-inherited-executor).
        let _ctx = crate::exec::context::enter_task(Arc::clone(this), this.executor());

        let poll = {
            let mut slot = this.future.lock();
            match slot.as_mut() {
                Some(fut) => {
                    let poll = fut.as_mut().poll(&mut cx);
                    if poll.is_ready() {
                        *slot = None;
                    }
                    poll
                }
                None => Poll::Ready(()),
            }
        };

        match poll {
            Poll::Ready(()) => {
                this.state.store(COMPLETE, Ordering::Release);
            }
            Poll::Pending => {
                // RUNNING -> IDLE, or replay a wake that arrived mid-poll.
                if this
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    this.state.store(SCHEDULED, Ordering::Release);
                    this.resubmit();
                }
            }
        }
    }
}

impl Wake for TaskCore {
    fn wake(self: Arc<Self>) {
        self.wake_inner();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wake_inner();
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("prio", &self.priority())
            .finish()
    }
}

/// Future combinator that converts a panic during poll into an `Err`.
///
/// This is how a task's panic reaches its join point instead of unwinding
/// through the worker's run loop.
pub(crate) struct CatchUnwind<F> {
    inner: F,
}

impl<F> CatchUnwind<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, PanicPayload>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `inner` is structurally pinned; it is never moved out of
        // `self` and we only project the pin.
        let inner = unsafe { self.map_unchecked_mut(|s| &mut s.inner) };
        match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(poll) => poll.map(Ok),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Shared result slot between a task and its joiner.
pub(crate) struct JoinState<T> {
    slot: Mutex<JoinSlot<T>>,
}

struct JoinSlot<T> {
    result: Option<Result<T, PanicPayload>>,
    waker: Option<Waker>,
    /// Parent task to re-target when the spawn requested `resume_on`.
    resume: Option<(Arc<TaskCore>, ExecutorRef)>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(JoinSlot {
                result: None,
                waker: None,
                resume: None,
            }),
        })
    }

    /// Called by the completing child: stores the result and wakes the
    /// joiner, re-targeting its executor first if requested.
    ///
    /// When the joiner has not suspended yet, the re-target is left in
    /// place for [`poll_take`](Self::poll_take) to apply at the join point.
    pub(crate) fn complete(&self, result: Result<T, PanicPayload>) {
        let (waker, resume) = {
            let mut slot = self.slot.lock();
            debug_assert!(slot.result.is_none(), "task completed twice");
            slot.result = Some(result);
            let waker = slot.waker.take();
            let resume = if waker.is_some() {
                slot.resume.take()
            } else {
                None
            };
            (waker, resume)
        };
        if let Some((task, exec)) = resume {
            task.set_executor(exec);
        }
        if let Some(w) = waker {
            w.wake();
        }
    }

    /// Joiner-side poll: takes the result if present, otherwise registers
    /// the waker. A still-pending `resume_on` redirection is applied here
    /// when the child finished before the joiner suspended: the joiner is
    /// bounced through its new executor once before the result is
    /// delivered.
    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T, PanicPayload>> {
        let mut slot = self.slot.lock();
        if slot.result.is_some() {
            if let Some((task, exec)) = slot.resume.take() {
                if !Arc::ptr_eq(&task.executor(), &exec) {
                    task.set_executor(exec);
                    drop(slot);
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
            }
            Poll::Ready(slot.result.take().expect("checked above"))
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    /// Records that the joining task should be moved to `exec` when the
    /// child completes.
    pub(crate) fn set_resume(&self, task: Arc<TaskCore>, exec: ExecutorRef) {
        self.slot.lock().resume = Some((task, exec));
    }
}

/// Shared done-counter between a parent and its `N` children.
///
/// Each child decrements on completion; the last decrement wakes the parent.
#[doc(hidden)]
pub struct DoneGroup {
    remaining: AtomicUsize,
    waker: Mutex<Option<Waker>>,
    /// First captured child panic, rethrown at the join point.
    panic: Mutex<Option<PanicPayload>>,
    /// Parent task to re-target when the spawn requested `resume_on`.
    resume: Mutex<Option<(Arc<TaskCore>, ExecutorRef)>>,
}

impl DoneGroup {
    pub(crate) fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            waker: Mutex::new(None),
            panic: Mutex::new(None),
            resume: Mutex::new(None),
        })
    }

    /// Registers `n` additional expected completions.
    pub(crate) fn add(&self, n: usize) {
        self.remaining.fetch_add(n, Ordering::AcqRel);
    }

    /// Records that the joining task should be moved to `exec` when the
    /// last child completes.
    pub(crate) fn set_resume(&self, task: Arc<TaskCore>, exec: ExecutorRef) {
        *self.resume.lock() = Some((task, exec));
    }

    /// Child-side completion. The last child wakes the parent, re-targeting
    /// it first when a suspended joiner requested `resume_on`. With no
    /// suspended joiner the re-target is left for
    /// [`poll_ready`](Self::poll_ready).
    pub(crate) fn decrement(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let waker = self.waker.lock().take();
            if waker.is_some() {
                if let Some((task, exec)) = self.resume.lock().take() {
                    task.set_executor(exec);
                }
            }
            if let Some(w) = waker {
                w.wake();
            }
        }
    }

    /// Applies a still-pending `resume_on` at the join point; returns
    /// `Pending` (after self-waking) when the joiner must bounce through
    /// its new executor first.
    fn ready_with_resume(&self, cx: &mut Context<'_>) -> Poll<()> {
        if let Some((task, exec)) = self.resume.lock().take() {
            if !Arc::ptr_eq(&task.executor(), &exec) {
                task.set_executor(exec);
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
        }
        Poll::Ready(())
    }

    /// Records a child panic; the first one wins.
    pub(crate) fn record_panic(&self, payload: PanicPayload) {
        let mut slot = self.panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    /// Parent-side poll: ready once every child has completed.
    pub(crate) fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.remaining.load(Ordering::Acquire) == 0 {
            return self.ready_with_resume(cx);
        }
        *self.waker.lock() = Some(cx.waker().clone());
        // Recheck after registration to cover a concurrent last decrement.
        if self.remaining.load(Ordering::Acquire) == 0 {
            self.ready_with_resume(cx)
        } else {
            Poll::Pending
        }
    }

    /// Takes the first recorded child panic, if any.
    pub(crate) fn take_panic(&self) -> Option<PanicPayload> {
        self.panic.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::test_util::{CollectExec, noop_waker};

    #[test]
    fn priority_saturates() {
        assert_eq!(Priority::new(0).band(), 0);
        assert_eq!(Priority::new(5).band(), 5);
        assert_eq!(Priority::new(1000).band(), Priority::MAX_COUNT - 1);
    }

    #[test]
    fn priority_clamps_to_band_count() {
        assert_eq!(Priority::new(5).clamp_to(2).band(), 1);
        assert_eq!(Priority::new(1).clamp_to(4).band(), 1);
        assert_eq!(Priority::new(0).clamp_to(1).band(), 0);
    }

    #[test]
    fn priority_default_is_highest() {
        assert_eq!(Priority::default(), Priority::HIGHEST);
    }

    #[test]
    fn worker_id_roundtrip() {
        let id = WorkerId::new(7);
        assert_eq!(id.as_usize(), 7);
        assert_eq!(format!("{id}"), "7");
    }

    #[test]
    fn schedule_submits_once() {
        let exec = CollectExec::new();
        let task = TaskCore::new(async {}, exec.clone_ref(), Priority::HIGHEST, None);
        task.schedule();
        assert_eq!(exec.drain().len(), 1);
    }

    #[test]
    fn wake_while_queued_is_coalesced() {
        let exec = CollectExec::new();
        let task = TaskCore::new(
            std::future::pending::<()>(),
            exec.clone_ref(),
            Priority::HIGHEST,
            None,
        );
        task.schedule();
        // Extra wakes while SCHEDULED must not enqueue again.
        task.wake_inner();
        task.wake_inner();
        assert_eq!(exec.drain().len(), 1);
    }

    #[test]
    fn run_completes_ready_future() {
        let exec = CollectExec::new();
        let task = TaskCore::new(async {}, exec.clone_ref(), Priority::HIGHEST, None);
        task.schedule();
        for item in exec.drain() {
            item.run();
        }
        assert_eq!(task.state.load(Ordering::SeqCst), COMPLETE);
        // Wakes after completion are no-ops.
        task.wake_inner();
        assert!(exec.drain().is_empty());
    }

    #[test]
    fn pending_future_reschedules_on_wake() {
        let exec = CollectExec::new();
        let task = TaskCore::new(
            std::future::pending::<()>(),
            exec.clone_ref(),
            Priority::HIGHEST,
            None,
        );
        task.schedule();
        for item in exec.drain() {
            item.run();
        }
        // Pending, no self-wake: nothing queued.
        assert!(exec.drain().is_empty());
        task.wake_inner();
        assert_eq!(exec.drain().len(), 1);
    }

    #[test]
    fn yielding_future_requeues_itself() {
        // A future that wakes itself then returns Pending should come back
        // through the executor exactly once per poll.
        struct SelfWake(bool);
        impl Future for SelfWake {
            type Output = ();
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.0 {
                    Poll::Ready(())
                } else {
                    self.0 = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        let exec = CollectExec::new();
        let task = TaskCore::new(SelfWake(false), exec.clone_ref(), Priority::new(2), None);
        task.schedule();
        let first = exec.drain();
        assert_eq!(first.len(), 1);
        for item in first {
            item.run();
        }
        // The mid-poll wake was replayed as a resubmission.
        let second = exec.drain();
        assert_eq!(second.len(), 1);
        for item in second {
            item.run();
        }
        assert_eq!(task.state.load(Ordering::SeqCst), COMPLETE);
    }

    #[test]
    fn change_priority_applies_to_resubmission() {
        let exec = CollectExec::new();
        let task = TaskCore::new(
            std::future::pending::<()>(),
            exec.clone_ref(),
            Priority::new(3),
            None,
        );
        task.schedule();
        exec.drain();
        task.set_priority(Priority::new(1));
        // schedule() was already consumed; simulate a wake-driven resubmit.
        let mut cur = task.state.load(Ordering::SeqCst);
        assert_eq!(cur, SCHEDULED);
        task.state.store(IDLE, Ordering::SeqCst);
        cur = task.state.load(Ordering::SeqCst);
        assert_eq!(cur, IDLE);
        task.wake_inner();
        let prios = exec.drain_prios();
        assert_eq!(prios, vec![Priority::new(1)]);
    }

    #[test]
    fn done_group_wakes_on_last_decrement() {
        let group = DoneGroup::new(2);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(group.poll_ready(&mut cx).is_pending());
        group.decrement();
        assert!(group.poll_ready(&mut cx).is_pending());
        group.decrement();
        assert!(group.poll_ready(&mut cx).is_ready());
    }

    #[test]
    fn done_group_zero_is_ready() {
        let group = DoneGroup::new(0);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(group.poll_ready(&mut cx).is_ready());
    }

    #[test]
    fn join_state_delivers_result() {
        let js: Arc<JoinState<u32>> = JoinState::new();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(js.poll_take(&mut cx).is_pending());
        js.complete(Ok(17));
        let Poll::Ready(Ok(v)) = js.poll_take(&mut cx) else {
            panic!("expected a ready Ok result");
        };
        assert_eq!(v, 17);
    }

    #[test]
    fn catch_unwind_captures_panic() {
        let fut = CatchUnwind::new(async { panic!("boom") });
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(fut);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Err(payload)) => {
                assert_eq!(payload_message(&payload), "boom");
            }
            other => panic!("unexpected poll result: {:?}", other.map(|r| r.is_ok())),
        }
    }
}
