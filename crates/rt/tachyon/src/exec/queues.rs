//! Per-worker queue bundle.
//!
//! Each worker owns, per priority band:
//!
//! - a local FIFO deque — its own submissions land here; thieves take from
//!   the other end via the paired [`Stealer`];
//! - a shared injector — the unbounded MPMC block queue remote submitters
//!   push into;
//! - a bounded inbox ring — targeted posts (`thread_hint`) try this first
//!   and fall back to the injector when full.
//!
//! Steals move a batch (up to half the victim's queue) in one shot.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};

use crate::task::WorkItem;

/// Inbox ring capacity per (worker, priority).
pub(crate) const INBOX_CAPACITY: usize = 64;

/// The shared (submitter-visible) half of one worker's queues.
pub(crate) struct SharedQueues {
    /// One injector per priority band.
    pub injectors: Box<[Injector<WorkItem>]>,
    /// One stealer per priority band, paired with the worker's local deques.
    pub stealers: Box<[Stealer<WorkItem>]>,
    /// Bounded inbox senders, one per priority band.
    pub inbox_tx: Box<[Sender<WorkItem>]>,
    /// Inbox receivers; only the owning worker may consume.
    pub inbox_rx: Box<[Receiver<WorkItem>]>,
}

impl SharedQueues {
    /// Targeted post: inbox first, injector on a full ring.
    pub(crate) fn post_targeted(&self, prio: usize, item: WorkItem) {
        match self.inbox_tx[prio].try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item) | TrySendError::Disconnected(item)) => {
                self.injectors[prio].push(item);
            }
        }
    }

    /// Conservative emptiness check across all bands of this worker's
    /// shared queues.
    pub(crate) fn looks_empty(&self) -> bool {
        self.injectors.iter().all(Injector::is_empty)
            && self.inbox_rx.iter().all(Receiver::is_empty)
            && self.stealers.iter().all(Stealer::is_empty)
    }
}

/// The worker-private half: local FIFO deques, one per priority band.
/// Moved onto the worker thread at startup.
pub(crate) struct LocalQueues {
    pub deques: Vec<Deque<WorkItem>>,
}

/// Builds the queue pair for one worker serving `prio_count` bands.
pub(crate) fn make_queues(prio_count: usize) -> (SharedQueues, LocalQueues) {
    let mut injectors = Vec::with_capacity(prio_count);
    let mut stealers = Vec::with_capacity(prio_count);
    let mut inbox_tx = Vec::with_capacity(prio_count);
    let mut inbox_rx = Vec::with_capacity(prio_count);
    let mut deques = Vec::with_capacity(prio_count);

    for _ in 0..prio_count {
        let deque = Deque::new_fifo();
        stealers.push(deque.stealer());
        deques.push(deque);
        injectors.push(Injector::new());
        let (tx, rx) = bounded(INBOX_CAPACITY);
        inbox_tx.push(tx);
        inbox_rx.push(rx);
    }

    (
        SharedQueues {
            injectors: injectors.into_boxed_slice(),
            stealers: stealers.into_boxed_slice(),
            inbox_tx: inbox_tx.into_boxed_slice(),
            inbox_rx: inbox_rx.into_boxed_slice(),
        },
        LocalQueues { deques },
    )
}

/// Repeatedly retries a [`Steal`] operation until it yields or is empty.
pub(crate) fn steal_into(
    op: impl Fn() -> Steal<WorkItem>,
) -> Option<WorkItem> {
    loop {
        match op() {
            Steal::Success(item) => return Some(item),
            Steal::Empty => return None,
            Steal::Retry => {}
        }
    }
}
