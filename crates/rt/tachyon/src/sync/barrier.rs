//! Cyclic barrier.
//!
//! [`Barrier`] synchronizes a fixed set of tasks in epochs: each epoch's
//! N-th [`arrive`](Barrier::arrive) releases every waiter and re-arms the
//! counter for the next epoch. The epoch and remaining count share one
//! atomic word (epoch in the high half, remaining in the low half), so
//! arrival, release, and cancellation are single compare-and-swap updates;
//! waiters ride the shared lock-free [`WaitList`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use super::WaitList;
use super::wait_list::Waiter;

fn pack(epoch: u32, remaining: u32) -> u64 {
    (u64::from(epoch) << 32) | u64::from(remaining)
}

#[allow(clippy::cast_possible_truncation)]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// A cyclic barrier of fixed arity.
pub struct Barrier {
    arity: u32,
    /// `epoch << 32 | remaining`.
    state: AtomicU64,
    waiters: WaitList,
}

impl Barrier {
    /// Creates a barrier for `arity` participants (at least 1).
    pub fn new(arity: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let arity = arity.clamp(1, u32::MAX as usize) as u32;
        Self {
            arity,
            state: AtomicU64::new(pack(0, arity)),
            waiters: WaitList::new(),
        }
    }

    /// Number of participants per epoch.
    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    /// Arrives at the barrier, suspending until every other participant of
    /// the current epoch has also arrived. The final arrival releases all
    /// waiters and resets the counter.
    pub fn arrive(&self) -> Arrive<'_> {
        Arrive {
            barrier: self,
            epoch: None,
            passed: false,
            reg: None,
        }
    }

    fn current_epoch(&self) -> u32 {
        unpack(self.state.load(Ordering::SeqCst)).0
    }

    /// Counts one arrival. Returns the epoch it belongs to, or `None` when
    /// it was the releasing arrival.
    fn count_arrival(&self) -> Option<u32> {
        let prev = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                let (epoch, remaining) = unpack(word);
                if remaining <= 1 {
                    Some(pack(epoch.wrapping_add(1), self.arity))
                } else {
                    Some(pack(epoch, remaining - 1))
                }
            })
            .expect("fetch_update closure always returns Some");
        let (epoch, remaining) = unpack(prev);
        if remaining <= 1 { None } else { Some(epoch) }
    }

    /// Un-counts an arrival abandoned before its epoch completed.
    fn cancel_arrival(&self, my_epoch: u32) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                let (epoch, remaining) = unpack(word);
                if epoch == my_epoch {
                    Some(pack(epoch, remaining + 1))
                } else {
                    // The epoch completed anyway; nothing to give back.
                    None
                }
            });
    }
}

/// Future returned by [`Barrier::arrive`].
#[must_use = "futures do nothing unless awaited"]
pub struct Arrive<'a> {
    barrier: &'a Barrier,
    /// Epoch this arrival belongs to, once counted.
    epoch: Option<u32>,
    passed: bool,
    reg: Option<Waiter<'a>>,
}

impl Future for Arrive<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.passed {
            return Poll::Ready(());
        }
        let barrier = self.barrier;
        if self.epoch.is_none() {
            match barrier.count_arrival() {
                None => {
                    // Releasing arrival: everyone else goes too.
                    self.passed = true;
                    barrier.waiters.wake_all();
                    return Poll::Ready(());
                }
                Some(epoch) => self.epoch = Some(epoch),
            }
        }
        let my_epoch = self.epoch.expect("counted above");
        if let Some(reg) = self.reg.take() {
            reg.complete();
        }
        if barrier.current_epoch() != my_epoch {
            self.passed = true;
            return Poll::Ready(());
        }
        let reg = barrier.waiters.register(cx.waker());
        // Recheck: the releasing arrival may have swept the list before
        // our record was visible.
        if barrier.current_epoch() != my_epoch {
            reg.complete();
            self.passed = true;
            return Poll::Ready(());
        }
        self.reg = Some(reg);
        Poll::Pending
    }
}

impl Drop for Arrive<'_> {
    fn drop(&mut self) {
        // An arrival abandoned before its epoch completed must be
        // un-counted, or the remaining participants deadlock.
        if self.passed {
            return;
        }
        if let Some(my_epoch) = self.epoch {
            self.barrier.cancel_arrival(my_epoch);
        }
    }
}
