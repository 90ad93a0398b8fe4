//! A priority-aware work-stealing task runtime.
//!
//! `tachyon` schedules fine-grained cooperative tasks across a pool of
//! worker threads. Applications submit futures (or plain callables) to
//! executors; each executor drives its own pool and provides ordering,
//! fairness, and locality guarantees.
//!
//! ## Pieces
//!
//! - [`exec::cpu::CpuExecutor`]: N workers × P priority bands, per-worker
//!   queues and inboxes, topology-matrix work stealing, idle-bitmap
//!   sleep/wake.
//! - [`exec::manual::ManualExecutor`] and
//!   [`CpuExecutor::single_thread`](exec::cpu::CpuExecutor::single_thread):
//!   degenerate executors for deterministic and embedded use.
//! - [`exec::braid::Braid`]: a serializing executor hosted on a parent.
//! - [`spawn`], [`spawn_many`], [`spawn_tuple`], [`spawn_group`],
//!   [`fork_group`]: child-task submission with joinable handles.
//! - [`ops`]: cooperative yielding, priority re-arming, and executor
//!   migration from inside tasks.
//! - [`chan`]: the MPMC channel; [`queue::MpscQueue`]: the serializing
//!   transport.
//! - [`sync`]: mutex, semaphore, condvar, auto-reset event, latch,
//!   barrier, all waker-based.
//!
//! ## Example
//!
//! ```ignore
//! let ex = tachyon::CpuExecutor::builder().thread_count(4).build();
//! tachyon::set_default_executor(ex.clone());
//!
//! let sum = tachyon::post_waitable(
//!     &(ex.clone() as tachyon::ExecutorRef),
//!     async {
//!         let (a, b) = tachyon::spawn_tuple((async { 1 }, async { 2 })).await;
//!         a + b
//!     },
//!     tachyon::Priority::HIGHEST,
//! )
//! .wait();
//! assert_eq!(sum, 3);
//! ```

pub mod bridge;
pub mod chan;
pub mod exec;
pub mod ops;
pub mod queue;
pub mod spawn;
pub mod sync;
pub mod task;
pub mod topology;

pub use bridge::{WaitHandle, block_on, post_waitable};
pub use chan::{Chan, ChanBuilder, TryPull, channel};
pub use exec::braid::Braid;
pub use exec::cpu::{CpuBuilder, CpuExecutor};
pub use exec::manual::ManualExecutor;
pub use exec::{
    Executor, ExecutorRef, StealStrategy, current_executor, default_executor,
    set_default_executor,
};
pub use ops::{
    CheckYieldCounter, ExecScope, change_priority, enter, resume_on, yield_if_requested,
    yield_now, yield_requested,
};
pub use queue::MpscQueue;
pub use spawn::{
    ForkGroup, JoinHandle, SpawnGroup, fork_group, spawn, spawn_group, spawn_many, spawn_tuple,
};
pub use sync::{AutoResetEvent, Barrier, Condvar, Latch, Mutex, Semaphore, WaitList};
pub use task::{Priority, WorkItem, WorkerId};
pub use topology::{CacheGroup, CpuKind, PackingStrategy, PinningLevel, ThreadInfo, Topology};
