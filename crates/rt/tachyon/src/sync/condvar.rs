//! Value condition variable.
//!
//! [`Condvar`] stores a value of `T` and lets tasks wait until the value
//! moves away from an expected one. Waiters ride the shared lock-free
//! [`WaitList`]; notification and value updates are separate operations,
//! so a waiter that is woken while the value is still unchanged simply
//! re-registers and keeps waiting.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use super::WaitList;
use super::wait_list::Waiter;

/// A condition variable parameterized by a stored value.
pub struct Condvar<T> {
    value: Mutex<T>,
    waiters: WaitList,
}

impl<T: Copy + PartialEq> Condvar<T> {
    /// Creates a condvar holding `initial`.
    pub const fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            waiters: WaitList::new(),
        }
    }

    /// The current value.
    pub fn get(&self) -> T {
        *self.value.lock()
    }

    /// Stores a new value without notifying.
    pub fn store(&self, value: T) {
        *self.value.lock() = value;
    }

    /// Stores a new value and wakes every waiter.
    pub fn set(&self, value: T) {
        self.store(value);
        self.notify_all();
    }

    /// Wakes one waiter (stack order).
    pub fn notify_one(&self) {
        self.waiters.wake_one();
    }

    /// Wakes up to `n` waiters.
    pub fn notify_n(&self, n: usize) {
        self.waiters.wake_n(n);
    }

    /// Wakes every waiter.
    pub fn notify_all(&self) {
        self.waiters.wake_all();
    }

    /// Suspends until the stored value differs from `expected`.
    ///
    /// Completes immediately when it already differs.
    pub fn wait_while_eq(&self, expected: T) -> WaitWhileEq<'_, T> {
        WaitWhileEq {
            condvar: self,
            expected,
            reg: None,
        }
    }
}

/// Future returned by [`Condvar::wait_while_eq`].
#[must_use = "futures do nothing unless awaited"]
pub struct WaitWhileEq<'a, T> {
    condvar: &'a Condvar<T>,
    expected: T,
    reg: Option<Waiter<'a>>,
}

impl<T: Copy + PartialEq> Future for WaitWhileEq<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = unsafe { self.get_unchecked_mut() };
        let condvar = this.condvar;
        let expected = this.expected;
        if let Some(reg) = this.reg.take() {
            // Woken or re-polled: either way the registration is stale.
            reg.complete();
        }
        if condvar.get() != expected {
            return Poll::Ready(());
        }
        let reg = condvar.waiters.register(cx.waker());
        // Recheck: the transition may have happened between the first read
        // and the registration.
        if condvar.get() != expected {
            reg.complete();
            return Poll::Ready(());
        }
        this.reg = Some(reg);
        Poll::Pending
    }
}
