//! Single-use countdown latch.
//!
//! [`Latch`] opens when its count reaches zero and stays open: waiters
//! registered earlier are released by the final
//! [`count_down`](Latch::count_down), later waits pass through. Waiters
//! ride the shared lock-free [`WaitList`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use super::WaitList;
use super::wait_list::Waiter;

/// A decrement-to-zero latch.
pub struct Latch {
    remaining: AtomicUsize,
    waiters: WaitList,
}

impl Latch {
    /// Creates a latch requiring `count` decrements. A count of zero is
    /// already open.
    pub const fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            waiters: WaitList::new(),
        }
    }

    /// Decrements the count by one; the decrement that reaches zero
    /// releases every waiter. Decrements past zero are no-ops.
    pub fn count_down(&self) {
        self.count_down_n(1);
    }

    /// Decrements the count by `n` (saturating at zero).
    pub fn count_down_n(&self, n: usize) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(n))
            })
            .expect("fetch_update closure always returns Some");
        if prev > 0 && prev <= n {
            self.waiters.wake_all();
        }
    }

    /// `true` once the count has reached zero.
    pub fn is_ready(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Current remaining count.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Suspends until the latch opens; passes through when already open.
    pub fn wait(&self) -> LatchWait<'_> {
        LatchWait {
            latch: self,
            reg: None,
        }
    }
}

/// Future returned by [`Latch::wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct LatchWait<'a> {
    latch: &'a Latch,
    reg: Option<Waiter<'a>>,
}

impl Future for LatchWait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let latch = self.latch;
        if let Some(reg) = self.reg.take() {
            reg.complete();
        }
        if latch.is_ready() {
            return Poll::Ready(());
        }
        let reg = latch.waiters.register(cx.waker());
        // Recheck to cover a count_down racing the registration. (The
        // final count_down's wake_all only covers records it can see.)
        if latch.is_ready() {
            reg.complete();
            return Poll::Ready(());
        }
        self.reg = Some(reg);
        Poll::Pending
    }
}
