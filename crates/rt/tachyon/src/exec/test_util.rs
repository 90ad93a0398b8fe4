//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

use parking_lot::Mutex;

use crate::exec::{Executor, ExecutorRef};
use crate::task::{Priority, WorkItem, WorkerId};

/// An executor that records submissions instead of running them.
pub(crate) struct CollectExec {
    items: Mutex<Vec<(WorkItem, Priority)>>,
}

impl CollectExec {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
        })
    }

    /// This collector as an [`ExecutorRef`].
    pub(crate) fn clone_ref(self: &Arc<Self>) -> ExecutorRef {
        Arc::clone(self) as ExecutorRef
    }

    /// Takes every recorded item.
    pub(crate) fn drain(&self) -> Vec<WorkItem> {
        self.items.lock().drain(..).map(|(item, _)| item).collect()
    }

    /// Takes every recorded item, returning only the priorities.
    pub(crate) fn drain_prios(&self) -> Vec<Priority> {
        self.items.lock().drain(..).map(|(_, prio)| prio).collect()
    }
}

impl Executor for CollectExec {
    fn name(&self) -> &str {
        "collect"
    }

    fn priority_count(&self) -> usize {
        Priority::MAX_COUNT
    }

    fn submit(&self, item: WorkItem, prio: Priority, _hint: Option<WorkerId>) {
        self.items.lock().push((item, prio));
    }
}

/// A waker that does nothing.
pub(crate) fn noop_waker() -> Waker {
    Waker::noop().clone()
}

struct Counting(Arc<AtomicUsize>);

impl Wake for Counting {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A waker that counts how often it fires.
pub(crate) fn counting_waker() -> (Waker, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Waker::from(Arc::new(Counting(Arc::clone(&count)))), count)
}
