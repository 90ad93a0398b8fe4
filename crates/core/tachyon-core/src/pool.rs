//! Bitmap-indexed object pool.
//!
//! [`ObjectPool`] hands out references to a fixed set of reusable objects.
//! Acquisition is a wait-free scan over the `in_use` bitmap; the object in a
//! slot is constructed on that slot's first acquisition and then kept alive
//! for the life of the pool, so later acquisitions see its state preserved.
//! The pool never resizes: when every slot is busy, acquisition reports
//! [`PoolFull`] and the caller falls back to a heap allocation.

use std::fmt;
use std::ops::Deref;
use std::sync::OnceLock;

use crate::bitmap::AtomicBitmap;

/// Error returned when every pool slot is currently acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolFull;

impl fmt::Display for PoolFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object pool at capacity")
    }
}

impl std::error::Error for PoolFull {}

/// A fixed-capacity pool of reusable objects.
///
/// Slot state is two-layered: the `in_use` bitmap says whether a slot is
/// currently acquired, and the slot's `OnceLock` says whether its object has
/// ever been constructed. Releasing a slot clears only the `in_use` bit;
/// the object survives and is handed back, state intact, to the next
/// acquirer of that slot.
pub struct ObjectPool<T> {
    in_use: AtomicBitmap,
    slots: Box<[OnceLock<T>]>,
}

impl<T> ObjectPool<T> {
    /// Creates a pool with `capacity` slots, none constructed.
    pub fn new(capacity: usize) -> Self {
        Self {
            in_use: AtomicBitmap::new(capacity),
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of currently acquired slots.
    pub fn in_use(&self) -> usize {
        self.in_use.count_ones()
    }

    /// Acquires a free slot, constructing its object with `init` if this is
    /// the slot's first acquisition.
    ///
    /// Returns [`PoolFull`] when every slot is busy.
    pub fn acquire_with(&self, init: impl FnOnce() -> T) -> Result<PoolRef<'_, T>, PoolFull> {
        let idx = self.in_use.set_first_clear().ok_or(PoolFull)?;
        // First acquisition of this slot constructs; later ones observe.
        let obj = self.slots[idx].get_or_init(init);
        Ok(PoolRef {
            pool: self,
            idx,
            obj,
        })
    }
}

impl<T> ObjectPool<T> {
    /// Index-based acquisition for callers that cannot hold a borrowing
    /// guard (for example a slot reference stored inside another structure
    /// that also owns the pool). Pair with
    /// [`release_index`](Self::release_index).
    pub fn acquire_index_with(&self, init: impl FnOnce() -> T) -> Result<usize, PoolFull> {
        let idx = self.in_use.set_first_clear().ok_or(PoolFull)?;
        let _ = self.slots[idx].get_or_init(init);
        Ok(idx)
    }

    /// The object in slot `idx`, if it has ever been constructed.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(OnceLock::get)
    }

    /// Releases a slot acquired with
    /// [`acquire_index_with`](Self::acquire_index_with).
    pub fn release_index(&self, idx: usize) {
        let changed = self.in_use.clear(idx);
        debug_assert!(changed, "pool slot released twice");
    }
}

impl<T: Default> ObjectPool<T> {
    /// Acquires a free slot, default-constructing on first acquisition.
    pub fn acquire(&self) -> Result<PoolRef<'_, T>, PoolFull> {
        self.acquire_with(T::default)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// RAII handle to an acquired pool slot; releases the slot on drop.
#[derive(Debug)]
pub struct PoolRef<'a, T> {
    pool: &'a ObjectPool<T>,
    idx: usize,
    obj: &'a T,
}

impl<T> PoolRef<'_, T> {
    /// Index of the acquired slot within the pool.
    pub fn index(&self) -> usize {
        self.idx
    }
}

impl<T> Deref for PoolRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.obj
    }
}

impl<T> Drop for PoolRef<'_, T> {
    fn drop(&mut self) {
        let changed = self.pool.in_use.clear(self.idx);
        debug_assert!(changed, "pool slot released twice");
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn acquire_up_to_capacity() {
        let pool: ObjectPool<usize> = ObjectPool::new(3);
        let a = pool.acquire_with(|| 1).unwrap();
        let b = pool.acquire_with(|| 2).unwrap();
        let c = pool.acquire_with(|| 3).unwrap();
        assert_eq!(pool.in_use(), 3);
        assert_eq!(pool.acquire_with(|| 4).unwrap_err(), PoolFull);
        drop((a, b, c));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn init_runs_once_per_slot() {
        let calls = AtomicUsize::new(0);
        let pool: ObjectPool<usize> = ObjectPool::new(1);
        {
            let r = pool
                .acquire_with(|| calls.fetch_add(1, Ordering::SeqCst))
                .unwrap();
            assert_eq!(*r, 0);
        }
        {
            // Same slot, already constructed: init must not run again.
            let r = pool
                .acquire_with(|| calls.fetch_add(1, Ordering::SeqCst))
                .unwrap();
            assert_eq!(*r, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_preserved_across_acquisitions() {
        let pool: ObjectPool<AtomicUsize> = ObjectPool::new(1);
        {
            let r = pool.acquire().unwrap();
            r.store(42, Ordering::SeqCst);
        }
        let r = pool.acquire().unwrap();
        assert_eq!(r.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn slot_index_is_stable() {
        let pool: ObjectPool<usize> = ObjectPool::new(2);
        let a = pool.acquire_with(|| 0).unwrap();
        assert_eq!(a.index(), 0);
        let b = pool.acquire_with(|| 0).unwrap();
        assert_eq!(b.index(), 1);
        drop(a);
        let c = pool.acquire_with(|| 0).unwrap();
        assert_eq!(c.index(), 0);
        drop(b);
        drop(c);
    }

    #[test]
    fn zero_capacity_pool_is_always_full() {
        let pool: ObjectPool<usize> = ObjectPool::new(0);
        assert_eq!(pool.acquire_with(|| 0).unwrap_err(), PoolFull);
    }

    #[test]
    fn destructor_runs_exactly_once_per_constructed_object() {
        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let pool: ObjectPool<DropCounter> = ObjectPool::new(4);
            // Construct two of the four slots, with one re-acquisition.
            let a = pool.acquire_with(|| DropCounter(Arc::clone(&drops))).unwrap();
            let b = pool.acquire_with(|| DropCounter(Arc::clone(&drops))).unwrap();
            drop(a);
            let c = pool.acquire_with(|| DropCounter(Arc::clone(&drops))).unwrap();
            drop(b);
            drop(c);
            assert_eq!(drops.load(Ordering::SeqCst), 0, "alive while pool is");
        }
        // Two constructed objects, two destructor runs. Never-constructed
        // slots do not run destructors.
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_acquire_never_shares_a_slot() {
        use std::thread;

        let pool: Arc<ObjectPool<AtomicUsize>> = Arc::new(ObjectPool::new(8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Ok(r) = pool.acquire() {
                            // Exclusive use: flag must be 0 on entry.
                            assert_eq!(r.fetch_add(1, Ordering::SeqCst), 0);
                            r.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
