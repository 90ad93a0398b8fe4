//! Serializing executor.
//!
//! A [`Braid`] wraps a parent executor and turns concurrent submissions
//! into serial execution: at most one braid item runs at any moment,
//! across all parent workers, but on whichever parent worker happens to be
//! free. Semantically a mutex around a task queue, without ever blocking a
//! worker.
//!
//! Submission enqueues onto an MPSC queue; the first submitter to find the
//! `running` flag clear posts a drainer to the parent. The drainer runs
//! items one at a time, clears the flag when the queue looks empty, then
//! rechecks once to cover the race with a concurrent enqueue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::exec::context;
use crate::exec::{Executor, ExecutorRef};
use crate::queue::MpscQueue;
use crate::task::{Priority, WorkItem, WorkerId};

/// A serializing sub-scheduler hosted on a parent executor.
pub struct Braid {
    me: std::sync::Weak<Braid>,
    name: String,
    parent: ExecutorRef,
    queue: MpscQueue<(WorkItem, Priority)>,
    running: AtomicBool,
}

impl Braid {
    /// Creates a braid over `parent`.
    pub fn new(parent: ExecutorRef) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            name: format!("braid@{}", parent.name()),
            parent,
            queue: MpscQueue::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Creates a braid over the current executor (the submitter's executor
    /// inside tasks, else the process default).
    ///
    /// # Panics
    ///
    /// Panics when no current or default executor exists.
    pub fn on_current() -> Arc<Self> {
        let parent = crate::exec::current_executor()
            .expect("Braid::on_current requires a current or default executor");
        Self::new(parent)
    }

    /// The parent executor submissions drain onto.
    pub fn parent(&self) -> &ExecutorRef {
        &self.parent
    }

    /// Runs queued items serially until the queue drains.
    fn drain(self: &Arc<Self>) {
        loop {
            match self.queue.try_pull() {
                Some((item, _prio)) => {
                    // Anything the item spawns or resumes stays serialized.
                    let _ctx = context::enter_executor(Arc::clone(self) as ExecutorRef);
                    item.run();
                }
                None => {
                    self.running.store(false, Ordering::Release);
                    // A producer may have enqueued between our pull and the
                    // flag clear. Whoever wins the re-claim keeps draining.
                    if self.queue.is_empty() {
                        return;
                    }
                    if self.running.swap(true, Ordering::AcqRel) {
                        return;
                    }
                }
            }
        }
    }

    fn spawn_drainer(self: Arc<Self>, prio: Priority) {
        let parent = self.parent.clone();
        parent.submit(
            WorkItem::from_fn(move || self.drain()),
            prio,
            None,
        );
    }
}

impl Executor for Braid {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_count(&self) -> usize {
        self.parent.priority_count()
    }

    fn submit(&self, item: WorkItem, prio: Priority, _hint: Option<WorkerId>) {
        self.queue.post((item, prio));
        if !self.running.swap(true, Ordering::AcqRel) {
            let me = self.me.upgrade().expect("braid still alive");
            me.spawn_drainer(prio);
        }
    }
}
