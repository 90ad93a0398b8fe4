//! Manually pumped executor.
//!
//! [`ManualExecutor`] has no threads of its own: the host calls
//! [`run_one`](ManualExecutor::run_one), [`run_n`](ManualExecutor::run_n),
//! or [`run_all`](ManualExecutor::run_all) from whatever thread it likes.
//! Submission is identical to the CPU executor; parking is replaced by
//! returning from the `run_*` calls. Useful for deterministic tests and for
//! embedding inside a foreign event loop.

use std::sync::{Arc, Weak};

use crossbeam_deque::Injector;

use crate::exec::context;
use crate::exec::queues::steal_into;
use crate::exec::{Executor, ExecutorRef};
use crate::task::{Priority, WorkItem, WorkerId};

/// An executor with no internal threads; the host provides the thread.
pub struct ManualExecutor {
    me: Weak<ManualExecutor>,
    name: String,
    /// One queue per priority band.
    injectors: Box<[Injector<WorkItem>]>,
}

impl ManualExecutor {
    /// A manual executor with a single priority band.
    pub fn new() -> Arc<Self> {
        Self::with_priorities(1)
    }

    /// A manual executor serving `prio_count` bands.
    pub fn with_priorities(prio_count: usize) -> Arc<Self> {
        let prio_count = prio_count.clamp(1, Priority::MAX_COUNT);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            name: "manual".to_string(),
            injectors: (0..prio_count).map(|_| Injector::new()).collect(),
        })
    }

    fn as_ref(&self) -> ExecutorRef {
        self.me.upgrade().expect("executor still alive") as ExecutorRef
    }

    /// Runs the highest-priority pending item, if any.
    ///
    /// Returns `false` when nothing was pending.
    pub fn run_one(&self) -> bool {
        for injector in &self.injectors {
            if let Some(item) = steal_into(|| injector.steal()) {
                let _ctx = context::enter_executor(self.as_ref());
                item.run();
                return true;
            }
        }
        false
    }

    /// Runs up to `n` pending items; returns how many ran.
    pub fn run_n(&self, n: usize) -> usize {
        let mut ran = 0;
        while ran < n && self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Runs until no work is pending; returns how many items ran.
    ///
    /// Items enqueued while draining (continuations, re-posted yields) are
    /// run too, so a task that re-posts itself forever keeps this looping.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Conservative "nothing pending" predicate.
    ///
    /// May transiently report non-empty while an item is mid-flight between
    /// queues; never reports empty while an item is enqueued.
    pub fn is_empty(&self) -> bool {
        self.injectors.iter().all(Injector::is_empty)
    }
}

impl Executor for ManualExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_count(&self) -> usize {
        self.injectors.len()
    }

    fn submit(&self, item: WorkItem, prio: Priority, _hint: Option<WorkerId>) {
        let band = prio.clamp_to(self.injectors.len()).band();
        self.injectors[band].push(item);
    }
}
