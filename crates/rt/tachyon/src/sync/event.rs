//! Auto-reset event.
//!
//! A boolean event with single-delivery semantics: each
//! [`set`](AutoResetEvent::set) wakes exactly one waiter, or latches the
//! flag when nobody is waiting so the next waiter passes straight through.
//! Delivery is a grant on the shared lock-free [`WaitList`]: the token
//! goes to one specific waiter, and a waiter abandoned after delivery
//! passes the token on rather than losing it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use super::WaitList;
use super::wait_list::Waiter;

/// An auto-reset event.
pub struct AutoResetEvent {
    set: AtomicBool,
    waiters: WaitList,
}

impl AutoResetEvent {
    /// Creates an event, initially unset.
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            waiters: WaitList::new(),
        }
    }

    /// Signals the event: wakes exactly one waiter (the flag stays
    /// cleared), or latches the flag when no waiter is present.
    pub fn set(&self) {
        loop {
            if self.waiters.grant_one() {
                return;
            }
            self.set.store(true, Ordering::SeqCst);
            // A waiter may have registered between the failed grant and
            // the store. If the latch is still ours to take back, deliver
            // it as a grant instead; if someone consumed it, the signal
            // already landed.
            if self.waiters.is_empty() {
                return;
            }
            if !self.set.swap(false, Ordering::SeqCst) {
                return;
            }
        }
    }

    /// `true` while the flag is latched (set with no waiter present and
    /// not yet consumed).
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    /// Waits for the event: passes through (clearing the flag) when set,
    /// otherwise suspends until a [`set`](AutoResetEvent::set) delivers to
    /// this waiter.
    pub fn wait(&self) -> EventWait<'_> {
        EventWait {
            event: self,
            reg: None,
        }
    }
}

impl Default for AutoResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`AutoResetEvent::wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct EventWait<'a> {
    event: &'a AutoResetEvent,
    reg: Option<Waiter<'a>>,
}

impl Future for EventWait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let event = self.event;
        if let Some(reg) = self.reg.take() {
            if reg.is_granted() {
                reg.complete();
                return Poll::Ready(());
            }
            // Advisory wake (a forwarded credit, not a token): retire the
            // registration and try again.
            reg.complete();
        }
        if event.set.swap(false, Ordering::SeqCst) {
            return Poll::Ready(());
        }
        let reg = event.waiters.register(cx.waker());
        // Post-registration retry closes the race with a set() that
        // latched before our record was visible.
        if event.set.swap(false, Ordering::SeqCst) {
            reg.complete();
            return Poll::Ready(());
        }
        self.reg = Some(reg);
        Poll::Pending
    }
}

impl Drop for EventWait<'_> {
    fn drop(&mut self) {
        let Some(reg) = self.reg.take() else {
            return;
        };
        if reg.is_granted() {
            // Abandoned after delivery: pass the token on.
            reg.complete();
            self.event.set();
        } else {
            drop(reg);
        }
    }
}
