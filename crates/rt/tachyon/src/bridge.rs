//! Blocking sync-async bridges.
//!
//! [`block_on`] polls a future to completion on the calling thread,
//! parking between polls. [`post_waitable`] submits work to an executor
//! and returns a handle a non-worker thread can block on. Both exist for
//! the edges of the system (tests, `main`); inside tasks, await instead.

use std::future::Future;
use std::panic::resume_unwind;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use crate::exec::ExecutorRef;
use crate::task::{CatchUnwind, JoinState, Priority, TaskCore};

/// Waker that unparks a blocked host thread.
struct ThreadUnparker {
    thread: Thread,
    notified: AtomicBool,
}

impl ThreadUnparker {
    fn current() -> Arc<Self> {
        Arc::new(Self {
            thread: thread::current(),
            notified: AtomicBool::new(false),
        })
    }

    /// Parks until a wake arrives; absorbs spurious unparks.
    fn park_until_notified(&self) {
        while !self.notified.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }
}

impl Wake for ThreadUnparker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Polls `fut` to completion, blocking the calling thread between polls.
///
/// Must not be called from an executor worker: it would stall that worker
/// for the duration.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let parker = ThreadUnparker::current();
    let waker = Waker::from(Arc::clone(&parker));
    let mut cx = Context::from_waker(&waker);
    let mut fut = pin!(fut);
    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(v) => return v,
            Poll::Pending => parker.park_until_notified(),
        }
    }
}

/// Submits `fut` to `exec` at `prio` and returns a handle the calling
/// thread can block on.
pub fn post_waitable<F>(exec: &ExecutorRef, fut: F, prio: Priority) -> WaitHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let state = JoinState::new();
    let st = Arc::clone(&state);
    let wrapper = async move {
        st.complete(CatchUnwind::new(fut).await);
    };
    TaskCore::new(wrapper, Arc::clone(exec), prio, None).schedule();
    WaitHandle { state }
}

/// Handle returned by [`post_waitable`].
///
/// Await it from a task, or [`wait`](WaitHandle::wait) from a blocking
/// thread. A panic in the submitted work is rethrown here.
pub struct WaitHandle<T> {
    state: Arc<JoinState<T>>,
}

impl<T> WaitHandle<T> {
    /// Blocks the calling thread until the work completes.
    pub fn wait(self) -> T {
        let parker = ThreadUnparker::current();
        let waker = Waker::from(Arc::clone(&parker));
        let mut cx = Context::from_waker(&waker);
        loop {
            match self.state.poll_take(&mut cx) {
                Poll::Ready(Ok(v)) => return v,
                Poll::Ready(Err(payload)) => resume_unwind(payload),
                Poll::Pending => parker.park_until_notified(),
            }
        }
    }
}

impl<T> Future for WaitHandle<T> {
    type Output = T;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match self.state.poll_take(cx) {
            Poll::Ready(Ok(v)) => Poll::Ready(v),
            Poll::Ready(Err(payload)) => resume_unwind(payload),
            Poll::Pending => Poll::Pending,
        }
    }
}
