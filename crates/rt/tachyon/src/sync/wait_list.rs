//! Shared waiter list.
//!
//! The waiter-list model every primitive builds on: a lock-free CAS stack
//! of waiter records. Enqueue is a single compare-and-swap on the atomic
//! list head; wake operations detach the whole chain with a swap, walk it
//! exclusively, and re-push the records they did not claim. All list
//! operations are `SeqCst` to keep the protocol easy to reason about.
//!
//! Each record carries a status word driving the handoff:
//!
//! - `PREPARED`: the waker is being written; the record is not yet
//!   published.
//! - `READY`: linked and claimable; the waker is visible.
//! - `NOTIFIED`: claimed by exactly one wake (the `READY -> NOTIFIED`
//!   transition grants exclusive access to the waker cell).
//! - `CANCELLED`: abandoned by its task; skipped and unlinked lazily.
//!
//! Wakes issued while no claimable record is linked are banked as credits
//! and delivered to the next registration, so a release can never be lost
//! to an enqueue race; the cost is an occasional spurious wake, which every
//! caller already tolerates by re-checking its condition. Records are
//! reference-counted (list and registration each hold one reference), so a
//! record abandoned mid-claim is never freed under a concurrent walker.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::task::Waker;

const PREPARED: u8 = 0;
const READY: u8 = 1;
const NOTIFIED: u8 = 2;
const CANCELLED: u8 = 3;

/// One waiter record: status word, optional grant token, waker slot, and
/// the intrusive link.
struct WaitNode {
    state: AtomicU8,
    /// Set by [`WaitList::grant_one`] before claiming, so the woken waiter
    /// can distinguish an ownership handoff from an advisory wake.
    token: AtomicBool,
    /// Written before publication, taken by whoever wins the
    /// `READY -> NOTIFIED` transition.
    waker: UnsafeCell<Option<Waker>>,
    next: AtomicPtr<WaitNode>,
}

// SAFETY: the waker cell is only touched by the registrant before the node
// is published (state PREPARED) and by the single winner of the
// `READY -> NOTIFIED` swap afterwards; every other field is atomic.
unsafe impl Send for WaitNode {}
// SAFETY: as above.
unsafe impl Sync for WaitNode {}

/// A lock-free stack of waiting tasks' wakers.
///
/// Wake order is stack order: the most recently registered claimable
/// waiter is woken first.
pub struct WaitList {
    head: AtomicPtr<WaitNode>,
    /// Banked wakes not yet delivered to a claimable record.
    pending: AtomicUsize,
    /// Approximate linked-record count (cancelled records linger until a
    /// wake unlinks them); used to size `wake_all`.
    len: AtomicUsize,
}

impl WaitList {
    /// Creates an empty wait list.
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            pending: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
        }
    }

    /// Registers a waker and returns the handle owning the registration.
    ///
    /// Dropping the handle cancels the registration; a wake already
    /// consumed by the abandoned record is forwarded to the next waiter.
    /// Call [`Waiter::complete`] instead when the wait is satisfied.
    pub fn register(&self, waker: &Waker) -> Waiter<'_> {
        let node = Arc::new(WaitNode {
            state: AtomicU8::new(PREPARED),
            token: AtomicBool::new(false),
            waker: UnsafeCell::new(Some(waker.clone())),
            next: AtomicPtr::new(ptr::null_mut()),
        });
        // The waker is in place: publish. PREPARED -> READY before the
        // push makes the record claimable only once its handle is visible.
        node.state.store(READY, Ordering::SeqCst);
        self.len.fetch_add(1, Ordering::SeqCst);
        self.push(Arc::clone(&node));
        // Deliver any wake banked while the list looked empty.
        if self.pending.load(Ordering::SeqCst) > 0 {
            self.drain();
        }
        Waiter {
            list: self,
            node,
            completed: false,
        }
    }

    /// Wakes one waiting task (stack order).
    pub fn wake_one(&self) {
        self.wake_n(1);
    }

    /// Wakes up to `n` waiting tasks; undelivered wakes are banked for the
    /// next registrations.
    pub fn wake_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.pending.fetch_add(n, Ordering::SeqCst);
        self.drain();
    }

    /// Wakes every task currently registered.
    pub fn wake_all(&self) {
        let linked = self.len.load(Ordering::SeqCst);
        if linked == 0 {
            return;
        }
        self.pending.fetch_add(linked, Ordering::SeqCst);
        self.drain();
    }

    /// Pops one claimable record, marks it granted, and wakes it.
    ///
    /// Returns `false` when no claimable record was linked. Unlike the
    /// `wake_*` operations nothing is banked: the caller keeps whatever
    /// resource it was handing off and retries its own protocol.
    pub fn grant_one(&self) -> bool {
        let chain = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
        if chain.is_null() {
            return false;
        }
        let mut delivered = false;
        let mut survivors: Vec<Arc<WaitNode>> = Vec::new();
        let mut cursor = chain;
        while !cursor.is_null() {
            // SAFETY: the swap detached the chain; we hold the list's
            // reference to every record on it.
            let node = unsafe { Arc::from_raw(cursor) };
            cursor = node.next.load(Ordering::SeqCst);
            if delivered {
                survivors.push(node);
                continue;
            }
            if node.state.load(Ordering::SeqCst) == CANCELLED {
                self.len.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            // Token before the claim: a waiter that observes NOTIFIED must
            // also observe the token.
            node.token.store(true, Ordering::SeqCst);
            match node.state.swap(NOTIFIED, Ordering::SeqCst) {
                READY => {
                    self.len.fetch_sub(1, Ordering::SeqCst);
                    // SAFETY: winning READY -> NOTIFIED grants exclusive
                    // access to the waker cell.
                    if let Some(w) = unsafe { (*node.waker.get()).take() } {
                        w.wake();
                    }
                    delivered = true;
                }
                CANCELLED => {
                    // Raced with abandonment; the token dies with it.
                    self.len.fetch_sub(1, Ordering::SeqCst);
                }
                _ => debug_assert!(false, "waiter notified twice"),
            }
        }
        self.push_back_survivors(survivors);
        delivered
    }

    /// Approximate number of linked records (cancelled records count until
    /// a wake unlinks them).
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// `true` when no records are linked. Conservative: may report
    /// non-empty while only cancelled records remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// CAS push onto the stack head.
    fn push(&self, node: Arc<WaitNode>) {
        let raw = Arc::into_raw(node).cast_mut();
        loop {
            let head = self.head.load(Ordering::SeqCst);
            // SAFETY: until the CAS succeeds the record is unpublished and
            // `raw` is the reference we own.
            unsafe { (*raw).next.store(head, Ordering::SeqCst) };
            if self
                .head
                .compare_exchange_weak(head, raw, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Re-links unclaimed records, oldest first, so the stack keeps its
    /// order.
    fn push_back_survivors(&self, survivors: Vec<Arc<WaitNode>>) {
        for node in survivors.into_iter().rev() {
            self.push(node);
        }
    }

    /// Delivers banked wakes to claimable records until either runs out.
    fn drain(&self) {
        loop {
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            let chain = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
            if chain.is_null() {
                // Credits stay banked; the next registration drains them.
                return;
            }
            let mut survivors: Vec<Arc<WaitNode>> = Vec::new();
            let mut cursor = chain;
            while !cursor.is_null() {
                // SAFETY: the swap detached the chain; we hold the list's
                // reference to every record on it.
                let node = unsafe { Arc::from_raw(cursor) };
                cursor = node.next.load(Ordering::SeqCst);
                if node.state.load(Ordering::SeqCst) == CANCELLED {
                    self.len.fetch_sub(1, Ordering::SeqCst);
                    continue;
                }
                let claimed = self
                    .pending
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| p.checked_sub(1))
                    .is_ok();
                if !claimed {
                    survivors.push(node);
                    continue;
                }
                match node.state.swap(NOTIFIED, Ordering::SeqCst) {
                    READY => {
                        self.len.fetch_sub(1, Ordering::SeqCst);
                        // SAFETY: winning READY -> NOTIFIED grants
                        // exclusive access to the waker cell.
                        if let Some(w) = unsafe { (*node.waker.get()).take() } {
                            w.wake();
                        }
                    }
                    CANCELLED => {
                        // Raced with abandonment: refund the credit.
                        self.pending.fetch_add(1, Ordering::SeqCst);
                        self.len.fetch_sub(1, Ordering::SeqCst);
                    }
                    _ => debug_assert!(false, "waiter notified twice"),
                }
            }
            self.push_back_survivors(survivors);
            // Re-read: a wake may have been banked while we held the
            // chain and observed an apparently-empty head.
        }
    }
}

impl Drop for WaitList {
    fn drop(&mut self) {
        // Resume anyone still linked, then reclaim the list's references.
        let mut cursor = self.head.swap(ptr::null_mut(), Ordering::SeqCst);
        while !cursor.is_null() {
            // SAFETY: the list is being dropped; the chain is ours.
            let node = unsafe { Arc::from_raw(cursor) };
            cursor = node.next.load(Ordering::SeqCst);
            if node.state.swap(NOTIFIED, Ordering::SeqCst) == READY {
                // SAFETY: winning READY -> NOTIFIED grants exclusive
                // access to the waker cell.
                if let Some(w) = unsafe { (*node.waker.get()).take() } {
                    w.wake();
                }
            }
        }
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a live registration on a [`WaitList`].
///
/// The owning future keeps this across polls; the record it points at is
/// shared with the list.
pub struct Waiter<'a> {
    list: &'a WaitList,
    node: Arc<WaitNode>,
    completed: bool,
}

impl Waiter<'_> {
    /// `true` once a wake has claimed this registration.
    pub fn is_notified(&self) -> bool {
        self.node.state.load(Ordering::SeqCst) == NOTIFIED
    }

    /// `true` once a [`grant_one`](WaitList::grant_one) handoff has claimed
    /// this registration.
    pub fn is_granted(&self) -> bool {
        self.is_notified() && self.node.token.load(Ordering::SeqCst)
    }

    /// Retires the registration because the wait was satisfied: any wake
    /// it consumed is kept, not forwarded.
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let prev = self.node.state.swap(CANCELLED, Ordering::SeqCst);
        if prev == NOTIFIED && !self.completed {
            // Abandoned after a wake was spent on us: pass it on so the
            // release is not lost.
            self.list.wake_one();
        }
    }
}
