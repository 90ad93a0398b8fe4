//! Resumption primitives.
//!
//! Suspension-based synchronization for tasks: when a primitive is not
//! immediately available, the awaiting task registers a waiter record and
//! suspends; release operations wake waiters, whose tasks are then
//! re-submitted to their *recorded* executor at their *recorded* priority
//! (not the releaser's). Release operations never block and never suspend
//! the releaser.
//!
//! All primitives share the [`WaitList`] waiter model: a lock-free CAS
//! stack of records, each carrying a status word and a waker. Mutex and
//! event deliver ownership through the list's grant tokens; semaphore,
//! condvar, latch, and barrier use advisory wakes and re-check their
//! condition after every resumption.
//!
//! Wait futures borrow the primitive, so a primitive cannot be destroyed
//! while waiters exist; no task is ever stranded by a drop.

pub mod barrier;
pub mod condvar;
pub mod event;
pub mod latch;
pub mod mutex;
pub mod semaphore;
pub mod wait_list;

pub use barrier::Barrier;
pub use condvar::Condvar;
pub use event::AutoResetEvent;
pub use latch::Latch;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use wait_list::{WaitList, Waiter};
