//! Async-aware mutual exclusion lock with direct ownership handoff.
//!
//! Unlike a barging lock, unlocking with waiters present transfers
//! ownership to a queued waiter directly: the `locked` flag never clears,
//! so no third party can slip in, and the woken waiter does not
//! re-acquire. Only one waiter is resumed per unlock. The waiter queue is
//! the shared lock-free [`WaitList`]; handoff rides its grant tokens.

use std::cell::UnsafeCell;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use super::WaitList;
use super::wait_list::Waiter;

/// An async mutual exclusion lock.
///
/// Contended acquirers suspend; `unlock` (guard drop) hands the lock to a
/// queued waiter in stack order.
pub struct Mutex<T> {
    locked: AtomicBool,
    waiters: WaitList,
    data: UnsafeCell<T>,
}

// SAFETY: The lock protocol guarantees exclusive access to `data`.
// `T: Send` because the value may be accessed from any worker thread.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new unlocked mutex wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            waiters: WaitList::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Asynchronously acquires the lock.
    pub fn lock(&self) -> LockFuture<'_, T> {
        LockFuture {
            mutex: self,
            reg: None,
        }
    }

    /// Attempts to acquire the lock without suspending.
    ///
    /// Fails while the lock is held, including while a handoff to a queued
    /// waiter is in flight.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Consumes the mutex, returning the inner value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Releases the lock: hand it to a queued waiter if any, else clear.
    fn unlock(&self) {
        loop {
            if self.waiters.grant_one() {
                // Ownership transferred: `locked` stays true.
                return;
            }
            self.locked.store(false, Ordering::Release);
            // A waiter may have enqueued between the failed grant and the
            // store. If one is visible and the lock is still ours to
            // re-claim, hand it off; otherwise whoever took the lock will
            // unlock in turn.
            if self.waiters.is_empty() {
                return;
            }
            if self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
        }
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless awaited"]
pub struct LockFuture<'a, T> {
    mutex: &'a Mutex<T>,
    reg: Option<Waiter<'a>>,
}

impl<'a, T> Future for LockFuture<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mutex = self.mutex;
        if let Some(reg) = self.reg.take() {
            if reg.is_granted() {
                // Ownership was handed to us; `locked` is already true.
                reg.complete();
                return Poll::Ready(MutexGuard { mutex });
            }
            // Advisory wake or a re-poll with a fresh waker: retire the
            // old registration and go around again.
            reg.complete();
        }
        if let Some(guard) = mutex.try_lock() {
            return Poll::Ready(guard);
        }
        let reg = mutex.waiters.register(cx.waker());
        // Post-registration retry closes the race with an unlock that ran
        // before our record was visible.
        if let Some(guard) = mutex.try_lock() {
            reg.complete();
            return Poll::Ready(guard);
        }
        self.reg = Some(reg);
        Poll::Pending
    }
}

impl<T> Drop for LockFuture<'_, T> {
    fn drop(&mut self) {
        let Some(reg) = self.reg.take() else {
            return;
        };
        if reg.is_granted() {
            // Ownership was handed to us after our last poll: pass the
            // lock on instead of leaking it.
            reg.complete();
            self.mutex.unlock();
        } else {
            drop(reg);
        }
    }
}

/// RAII guard; unlocking on drop hands the lock to a queued waiter.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::test_util::{counting_waker, noop_waker};
    use std::sync::atomic::Ordering as AtomicOrdering;

    #[test]
    fn try_lock_succeeds_when_free() {
        let mutex = Mutex::new(42);
        let guard = mutex.try_lock();
        assert!(guard.is_some());
        assert_eq!(*guard.unwrap(), 42);
    }

    #[test]
    fn try_lock_fails_when_held() {
        let mutex = Mutex::new(42);
        let _guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
    }

    #[test]
    fn guard_mutate_and_release() {
        let mutex = Mutex::new(0);
        {
            let mut guard = mutex.try_lock().unwrap();
            *guard = 99;
        }
        assert_eq!(*mutex.try_lock().unwrap(), 99);
    }

    #[test]
    fn lock_future_ready_when_free() {
        let mutex = Mutex::new(1);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = mutex.lock();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
    }

    #[test]
    fn lock_future_pending_when_held() {
        let mutex = Mutex::new(1);
        let _guard = mutex.try_lock().unwrap();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = mutex.lock();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
    }

    #[test]
    fn unlock_hands_off_to_waiter() {
        let mutex = Mutex::new(1);
        let guard = mutex.try_lock().unwrap();

        let (waker, count) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = mutex.lock();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

        drop(guard);
        assert!(count.load(AtomicOrdering::SeqCst) > 0, "waiter not woken");

        // Handoff means nobody else can barge in before the waiter runs.
        assert!(mutex.try_lock().is_none());

        let guard = match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("handoff did not complete"),
        };
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn handoff_order_is_stack_order() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();

        let (w1, c1) = counting_waker();
        let (w2, c2) = counting_waker();
        let mut cx1 = Context::from_waker(&w1);
        let mut cx2 = Context::from_waker(&w2);
        let mut f1 = mutex.lock();
        let mut f2 = mutex.lock();
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_pending());
        assert!(Pin::new(&mut f2).poll(&mut cx2).is_pending());

        // Most recent waiter is granted first.
        drop(guard);
        assert!(c2.load(AtomicOrdering::SeqCst) > 0);
        assert_eq!(c1.load(AtomicOrdering::SeqCst), 0, "older waiter woken early");

        let g2 = match Pin::new(&mut f2).poll(&mut cx2) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("granted waiter should own the lock"),
        };
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_pending());
        drop(g2);
        assert!(c1.load(AtomicOrdering::SeqCst) > 0);
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_ready());
    }

    #[test]
    fn dropping_queued_waiter_removes_it() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();

        let (w1, c1) = counting_waker();
        let (w2, _c2) = counting_waker();
        let mut cx1 = Context::from_waker(&w1);
        let mut cx2 = Context::from_waker(&w2);
        let mut f1 = mutex.lock();
        let mut f2 = mutex.lock();
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_pending());
        assert!(Pin::new(&mut f2).poll(&mut cx2).is_pending());

        // The would-be first grantee gives up; the handoff skips to f1.
        drop(f2);
        drop(guard);
        assert!(c1.load(AtomicOrdering::SeqCst) > 0);
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_ready());
    }

    #[test]
    fn dropping_granted_waiter_passes_lock_on() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();

        let (w1, c1) = counting_waker();
        let (w2, _c2) = counting_waker();
        let mut cx1 = Context::from_waker(&w1);
        let mut cx2 = Context::from_waker(&w2);
        let mut f1 = mutex.lock();
        let mut f2 = mutex.lock();
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_pending());
        assert!(Pin::new(&mut f2).poll(&mut cx2).is_pending());

        // Hand off to f2 (most recent), then drop it unpolled: the lock
        // must travel on to f1 rather than leak.
        drop(guard);
        drop(f2);
        assert!(c1.load(AtomicOrdering::SeqCst) > 0);
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_ready());
    }

    #[test]
    fn late_enqueue_still_receives_the_lock() {
        // A waiter that registers while the unlock path is mid-flight is
        // caught by either its post-registration retry or the unlock
        // recheck; either way the lock ends up claimable.
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();
        let (w, _c) = counting_waker();
        let mut cx = Context::from_waker(&w);
        let mut fut = mutex.lock();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        drop(guard);
        let g = match Pin::new(&mut fut).poll(&mut cx) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("lock lost in handoff"),
        };
        drop(g);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn into_inner_returns_value() {
        let mutex = Mutex::new(7);
        assert_eq!(mutex.into_inner(), 7);
    }
}
