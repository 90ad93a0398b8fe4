//! Counting semaphore.
//!
//! [`Semaphore`] limits concurrent access to a resource. Acquisition
//! decrements the permit count or suspends on the shared lock-free
//! [`WaitList`]; [`release`](Semaphore::release) adds permits and issues as
//! many wakes. Woken waiters re-attempt the decrement, so delivery is not
//! a handoff; a release racing an enqueue is banked by the list and cannot
//! be lost.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use super::WaitList;
use super::wait_list::Waiter;

/// A counting semaphore.
pub struct Semaphore {
    permits: AtomicUsize,
    waiters: WaitList,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: AtomicUsize::new(permits),
            waiters: WaitList::new(),
        }
    }

    /// Acquires one permit, suspending while none are available.
    ///
    /// The caller is responsible for the matching
    /// [`release`](Semaphore::release); see
    /// [`acquire_scoped`](Semaphore::acquire_scoped) for the RAII form.
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            sem: self,
            reg: None,
        }
    }

    /// Acquires one permit and returns an RAII scope that releases it on
    /// drop.
    pub fn acquire_scoped(&self) -> AcquireScoped<'_> {
        AcquireScoped {
            inner: self.acquire(),
        }
    }

    /// Attempts to take one permit without suspending.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Adds `n` permits and wakes up to `n` waiters.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.permits.fetch_add(n, Ordering::Release);
        self.waiters.wake_n(n);
    }

    /// Number of currently available permits.
    pub fn available(&self) -> usize {
        self.permits.load(Ordering::Relaxed)
    }
}

/// Future returned by [`Semaphore::acquire`].
#[must_use = "futures do nothing unless awaited"]
pub struct Acquire<'a> {
    sem: &'a Semaphore,
    reg: Option<Waiter<'a>>,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let sem = self.sem;
        if let Some(reg) = self.reg.take() {
            // Whether we were woken or merely re-polled, the registration
            // is stale: retire it and re-run the protocol with the
            // current waker.
            reg.complete();
        }
        if sem.try_acquire() {
            return Poll::Ready(());
        }
        let reg = sem.waiters.register(cx.waker());
        // Retry after registration: a release may have slipped between
        // the failed attempt and the registration. (A release after the
        // registration is banked by the list, so it cannot be lost.)
        if sem.try_acquire() {
            reg.complete();
            return Poll::Ready(());
        }
        self.reg = Some(reg);
        Poll::Pending
    }
}

/// Future returned by [`Semaphore::acquire_scoped`].
#[must_use = "futures do nothing unless awaited"]
pub struct AcquireScoped<'a> {
    inner: Acquire<'a>,
}

impl<'a> Future for AcquireScoped<'a> {
    type Output = SemaphorePermit<'a>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let sem = self.inner.sem;
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(()) => Poll::Ready(SemaphorePermit { sem }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// RAII permit that releases back to the [`Semaphore`] on drop.
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sem.release(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::test_util::{counting_waker, noop_waker};
    use std::sync::atomic::Ordering as AtomicOrdering;

    #[test]
    fn try_acquire_exhausts_permits() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn release_restores_permits() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        sem.release(1);
        assert_eq!(sem.available(), 1);
        assert!(sem.try_acquire());
    }

    #[test]
    fn zero_permits() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_acquire());
    }

    #[test]
    fn acquire_ready_when_available() {
        let sem = Semaphore::new(1);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = sem.acquire();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn acquire_pending_when_exhausted_then_woken() {
        let sem = Semaphore::new(0);
        let (waker, count) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = sem.acquire();
        assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());
        sem.release(1);
        assert!(count.load(AtomicOrdering::SeqCst) > 0);
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
    }

    #[test]
    fn release_n_wakes_up_to_n_in_stack_order() {
        let sem = Semaphore::new(0);
        let (w1, c1) = counting_waker();
        let (w2, c2) = counting_waker();
        let (w3, c3) = counting_waker();
        let mut cx1 = Context::from_waker(&w1);
        let mut cx2 = Context::from_waker(&w2);
        let mut cx3 = Context::from_waker(&w3);
        let mut f1 = sem.acquire();
        let mut f2 = sem.acquire();
        let mut f3 = sem.acquire();
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_pending());
        assert!(Pin::new(&mut f2).poll(&mut cx2).is_pending());
        assert!(Pin::new(&mut f3).poll(&mut cx3).is_pending());

        // The two most recent waiters are woken.
        sem.release(2);
        assert!(c3.load(AtomicOrdering::SeqCst) > 0);
        assert!(c2.load(AtomicOrdering::SeqCst) > 0);
        assert_eq!(c1.load(AtomicOrdering::SeqCst), 0);
        assert!(Pin::new(&mut f3).poll(&mut cx3).is_ready());
        assert!(Pin::new(&mut f2).poll(&mut cx2).is_ready());
        assert!(Pin::new(&mut f1).poll(&mut cx1).is_pending());
    }

    #[test]
    fn release_before_suspension_is_not_lost() {
        // Wake issued while nobody was registered: banked by the list and
        // delivered to the next registration.
        let sem = Semaphore::new(0);
        sem.release(1);
        let (waker, count) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = sem.acquire();
        // The permit was already there: the first poll succeeds.
        assert!(Pin::new(&mut fut).poll(&mut cx).is_ready());
        let _ = count;
    }

    #[test]
    fn scoped_permit_releases_on_drop() {
        let sem = Semaphore::new(1);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        {
            let mut fut = sem.acquire_scoped();
            let Poll::Ready(_permit) = Pin::new(&mut fut).poll(&mut cx) else {
                panic!("permit should be available");
            };
            assert_eq!(sem.available(), 0);
        }
        assert_eq!(sem.available(), 1);
    }
}
