//! MPMC channel.
//!
//! [`Chan`] is the application-visible message transport between tasks:
//! multiple producers, multiple consumers, unbounded buffering, explicit
//! [`close`](Chan::close) and [`drain`](Chan::drain). Producer order is
//! preserved per producer; consumers compete for values.
//!
//! Consumer waits are waker-based in the same shape as the executor's other
//! waiter lists. Waker cells come from a fixed bitmap-indexed pool and fall
//! back to a heap slot when the pool is exhausted.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tachyon_core::ObjectPool;

/// Waker cells handed to pending pulls; heap fallback beyond this.
const WAITER_POOL_SLOTS: usize = 16;

/// Result of a non-suspending pull.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPull<T> {
    /// A value was available.
    Ok(T),
    /// The channel is open but currently empty.
    Empty,
    /// The channel is closed and fully drained.
    Closed,
}

/// Configuration for a [`Chan`].
///
/// `block_size` governs buffer reservation granularity and `reuse_blocks`
/// whether drained capacity is retained; the remaining options are layout
/// and allocation hints with identical observable semantics.
#[derive(Debug, Clone)]
pub struct ChanBuilder {
    block_size: usize,
    packing_level: u8,
    embed_first_block: bool,
    reuse_blocks: bool,
    heavy_load_threshold: usize,
}

impl ChanBuilder {
    /// Default configuration.
    pub fn new() -> Self {
        Self {
            block_size: 4096,
            packing_level: 0,
            embed_first_block: false,
            reuse_blocks: true,
            heavy_load_threshold: 0,
        }
    }

    /// Elements per block; must be a power of two.
    #[must_use]
    pub fn block_size(mut self, n: usize) -> Self {
        debug_assert!(
            tachyon_core::bits::is_power_of_two(n),
            "block size must be a power of two"
        );
        self.block_size = n.max(1);
        self
    }

    /// Slot-state packing level (0, 1, or 2). A performance hint.
    #[must_use]
    pub fn packing_level(mut self, level: u8) -> Self {
        self.packing_level = level.min(2);
        self
    }

    /// Whether the first block's storage is reserved up front.
    #[must_use]
    pub fn embed_first_block(mut self, embed: bool) -> Self {
        self.embed_first_block = embed;
        self
    }

    /// Whether drained capacity is retained for reuse (default) or
    /// returned to the allocator.
    #[must_use]
    pub fn reuse_blocks(mut self, reuse: bool) -> Self {
        self.reuse_blocks = reuse;
        self
    }

    /// Producer-side hint that switches the allocation strategy under
    /// sustained backpressure.
    #[must_use]
    pub fn heavy_load_threshold(mut self, threshold: usize) -> Self {
        self.heavy_load_threshold = threshold;
        self
    }

    /// Builds the channel.
    pub fn build<T: Send>(self) -> Chan<T> {
        let initial = if self.embed_first_block {
            self.block_size
        } else {
            0
        };
        Chan {
            inner: Arc::new(ChanInner {
                state: Mutex::new(ChanState {
                    buf: VecDeque::with_capacity(initial),
                    closed: false,
                    pull_waiters: VecDeque::new(),
                    drain_waiters: Vec::new(),
                }),
                drain_cv: Condvar::new(),
                waiter_pool: ObjectPool::new(WAITER_POOL_SLOTS),
                config: self,
            }),
        }
    }
}

impl Default for ChanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a channel with the default configuration.
pub fn channel<T: Send>() -> Chan<T> {
    ChanBuilder::new().build()
}

/// An MPMC channel handle. Clones share the same channel.
pub struct Chan<T> {
    inner: Arc<ChanInner<T>>,
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Chan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Chan")
            .field("len", &st.buf.len())
            .field("closed", &st.closed)
            .finish()
    }
}

struct ChanInner<T> {
    state: Mutex<ChanState<T>>,
    drain_cv: Condvar,
    waiter_pool: ObjectPool<Mutex<Option<Waker>>>,
    config: ChanBuilder,
}

struct ChanState<T> {
    buf: VecDeque<T>,
    closed: bool,
    pull_waiters: VecDeque<WaiterRef>,
    drain_waiters: Vec<Waker>,
}

/// A registered consumer waiter: a pool slot index or a heap fallback.
enum WaiterRef {
    Pooled(usize),
    Heap(Waker),
}

impl<T: Send> ChanInner<T> {
    /// Registers `waker` as a pending pull, preferring a pooled cell.
    fn register_pull(&self, st: &mut ChanState<T>, waker: &Waker) {
        match self.waiter_pool.acquire_index_with(Mutex::default) {
            Ok(idx) => {
                *self
                    .waiter_pool
                    .get(idx)
                    .expect("acquired slot is constructed")
                    .lock() = Some(waker.clone());
                st.pull_waiters.push_back(WaiterRef::Pooled(idx));
            }
            Err(_) => st.pull_waiters.push_back(WaiterRef::Heap(waker.clone())),
        }
    }

    /// Pops one pending pull, returning its waker. Pool slots are released
    /// here, before the wake.
    fn take_pull_waiter(&self, st: &mut ChanState<T>) -> Option<Waker> {
        while let Some(w) = st.pull_waiters.pop_front() {
            let waker = match w {
                WaiterRef::Pooled(idx) => {
                    let waker = self
                        .waiter_pool
                        .get(idx)
                        .expect("registered slot is constructed")
                        .lock()
                        .take();
                    self.waiter_pool.release_index(idx);
                    waker
                }
                WaiterRef::Heap(waker) => Some(waker),
            };
            if waker.is_some() {
                return waker;
            }
        }
        None
    }

    fn take_all_pull_waiters(&self, st: &mut ChanState<T>) -> Vec<Waker> {
        let mut out = Vec::with_capacity(st.pull_waiters.len());
        while let Some(w) = self.take_pull_waiter(st) {
            out.push(w);
        }
        out
    }

    /// Called with a value just removed while the channel may be closed:
    /// collects the drain wakers and reports whether the channel just
    /// became drained (closed and empty).
    fn after_remove(&self, st: &mut ChanState<T>) -> (Vec<Waker>, bool) {
        if st.buf.is_empty() {
            if !self.config.reuse_blocks && st.buf.capacity() > self.config.block_size {
                st.buf.shrink_to(self.config.block_size);
            }
            if st.closed {
                return (std::mem::take(&mut st.drain_waiters), true);
            }
        }
        (Vec::new(), false)
    }

    /// Post-lock notification for a drained transition.
    fn notify_drained(&self, wakers: Vec<Waker>, drained: bool) {
        if drained {
            self.drain_cv.notify_all();
        }
        for w in wakers {
            w.wake();
        }
    }

    fn push_value(&self, value: T) -> bool {
        let waker = {
            let mut st = self.state.lock();
            if st.closed {
                // Value dropped here, exactly once.
                return false;
            }
            st.buf.push_back(value);
            self.take_pull_waiter(&mut st)
        };
        if let Some(w) = waker {
            w.wake();
        }
        true
    }
}

impl<T: Send> Chan<T> {
    /// Starts configuring a channel.
    pub fn builder() -> ChanBuilder {
        ChanBuilder::new()
    }

    /// Enqueues a value, waking one pending pull.
    ///
    /// Resolves to `false` (and destroys the value) when the channel is
    /// closed. With unbounded buffering the write itself never waits.
    pub fn push(&self, value: T) -> Push<'_, T> {
        Push {
            chan: &self.inner,
            value: Some(value),
        }
    }

    /// Non-suspending push: enqueues unless closed, in which case the value
    /// is destroyed.
    pub fn post(&self, value: T) {
        let _ = self.inner.push_value(value);
    }

    /// Posts every value of an iterator; zero-sized ranges are fine.
    /// Returns how many values were accepted.
    pub fn post_bulk(&self, values: impl IntoIterator<Item = T>) -> usize {
        let mut n = 0;
        for v in values {
            if !self.inner.push_value(v) {
                break;
            }
            n += 1;
        }
        n
    }

    /// Dequeues the next value, suspending while the channel is open and
    /// empty. Resolves to `None` once the channel is closed and drained.
    pub fn pull(&self) -> Pull<'_, T> {
        Pull { chan: &self.inner }
    }

    /// Zero-copy pull: resolves to a reference-like guard bound to the
    /// value's slot; the value is consumed when the guard drops.
    pub fn pull_zc(&self) -> PullZc<'_, T> {
        PullZc { chan: &self.inner }
    }

    /// Non-suspending pull.
    pub fn try_pull(&self) -> TryPull<T> {
        let (out, wakers, drained) = {
            let mut st = self.inner.state.lock();
            match st.buf.pop_front() {
                Some(v) => {
                    let (dw, drained) = self.inner.after_remove(&mut st);
                    (TryPull::Ok(v), dw, drained)
                }
                None if st.closed => (TryPull::Closed, Vec::new(), false),
                None => (TryPull::Empty, Vec::new(), false),
            }
        };
        self.inner.notify_drained(wakers, drained);
        out
    }

    /// Closes the channel: no further values are accepted, pending pulls
    /// wake (draining the remaining values, then observing `None`).
    pub fn close(&self) {
        let (pull_wakers, drain_wakers, drained) = {
            let mut st = self.inner.state.lock();
            if st.closed {
                (Vec::new(), Vec::new(), false)
            } else {
                st.closed = true;
                let pw = self.inner.take_all_pull_waiters(&mut st);
                let drained = st.buf.is_empty();
                let dw = if drained {
                    std::mem::take(&mut st.drain_waiters)
                } else {
                    Vec::new()
                };
                (pw, dw, drained)
            }
        };
        for w in pull_wakers {
            w.wake();
        }
        if drained {
            self.inner.drain_cv.notify_all();
        }
        for w in drain_wakers {
            w.wake();
        }
    }

    /// `true` once [`close`](Chan::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of buffered values at the instant of the call.
    pub fn len(&self) -> usize {
        self.inner.state.lock().buf.len()
    }

    /// `true` when no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().buf.is_empty()
    }

    /// Resolves once the channel is closed and every value has been
    /// consumed.
    pub fn drain(&self) -> Drain<'_, T> {
        Drain { chan: &self.inner }
    }

    /// Thread-blocking counterpart of [`drain`](Chan::drain).
    pub fn drain_wait(&self) {
        let mut st = self.inner.state.lock();
        while !(st.closed && st.buf.is_empty()) {
            self.inner.drain_cv.wait(&mut st);
        }
    }
}

/// Future returned by [`Chan::push`].
#[must_use = "futures do nothing unless awaited"]
pub struct Push<'a, T> {
    chan: &'a ChanInner<T>,
    value: Option<T>,
}

impl<T: Send> Future for Push<'_, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<bool> {
        let this = unsafe { self.get_unchecked_mut() };
        let value = this.value.take().expect("push polled after completion");
        Poll::Ready(this.chan.push_value(value))
    }
}

/// Future returned by [`Chan::pull`].
#[must_use = "futures do nothing unless awaited"]
pub struct Pull<'a, T> {
    chan: &'a ChanInner<T>,
}

impl<T: Send> Future for Pull<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let (out, wakers, drained) = {
            let mut st = self.chan.state.lock();
            match st.buf.pop_front() {
                Some(v) => {
                    let (dw, drained) = self.chan.after_remove(&mut st);
                    (Poll::Ready(Some(v)), dw, drained)
                }
                None if st.closed => (Poll::Ready(None), Vec::new(), false),
                None => {
                    self.chan.register_pull(&mut st, cx.waker());
                    (Poll::Pending, Vec::new(), false)
                }
            }
        };
        self.chan.notify_drained(wakers, drained);
        out
    }
}

/// Future returned by [`Chan::pull_zc`].
#[must_use = "futures do nothing unless awaited"]
pub struct PullZc<'a, T> {
    chan: &'a ChanInner<T>,
}

impl<'a, T: Send> Future for PullZc<'a, T> {
    type Output = Option<ZcRef<'a, T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let chan = self.chan;
        let mut st = chan.state.lock();
        if !st.buf.is_empty() {
            return Poll::Ready(Some(ZcRef {
                chan,
                guard: Some(st),
            }));
        }
        if st.closed {
            return Poll::Ready(None);
        }
        chan.register_pull(&mut st, cx.waker());
        Poll::Pending
    }
}

/// Slot-bound reference produced by [`Chan::pull_zc`].
///
/// Dereferences to the front value; dropping it consumes the value.
pub struct ZcRef<'a, T: Send> {
    chan: &'a ChanInner<T>,
    guard: Option<MutexGuard<'a, ChanState<T>>>,
}

impl<T: Send> std::ops::Deref for ZcRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard
            .as_ref()
            .expect("guard present until drop")
            .buf
            .front()
            .expect("slot bound to a present value")
    }
}

impl<T: Send> Drop for ZcRef<'_, T> {
    fn drop(&mut self) {
        let mut guard = self.guard.take().expect("guard present until drop");
        let _ = guard.buf.pop_front();
        let (wakers, drained) = self.chan.after_remove(&mut guard);
        drop(guard);
        self.chan.notify_drained(wakers, drained);
    }
}

/// Future returned by [`Chan::drain`].
#[must_use = "futures do nothing unless awaited"]
pub struct Drain<'a, T> {
    chan: &'a ChanInner<T>,
}

impl<T: Send> Future for Drain<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut st = self.chan.state.lock();
        if st.closed && st.buf.is_empty() {
            Poll::Ready(())
        } else {
            st.drain_waiters.push(cx.waker().clone());
            Poll::Pending
        }
    }
}
