//! Multi-producer single-consumer queue.
//!
//! [`MpscQueue`] is the serialization backbone of the braid: producers post
//! from any thread without waiting, a single consumer drains in order. The
//! transport is an unbounded linked-block channel whose blocks are
//! hazard-protected and reclaimed once no producer holds a reference into
//! them; the queue owns both endpoints, so `post` can never observe a
//! disconnected receiver.

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

/// An unbounded MPSC queue.
///
/// Producer ordering is FIFO per producer; cross-producer order is whatever
/// the arrival interleaving was. Only one consumer may call
/// [`try_pull`](MpscQueue::try_pull) at a time — that discipline is the
/// caller's, not enforced here.
pub struct MpscQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T: Send> MpscQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Enqueues one value. Never waits.
    pub fn post(&self, value: T) {
        // The queue owns the receiver, so the channel cannot be closed.
        self.tx.send(value).expect("queue receiver owned by self");
    }

    /// Enqueues every value of an iterator. Never waits.
    pub fn post_bulk(&self, values: impl IntoIterator<Item = T>) {
        for v in values {
            self.post(v);
        }
    }

    /// Dequeues the next value, or `None` if the next slot is still empty.
    pub fn try_pull(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(v) => Some(v),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Conservative emptiness check.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Number of queued values at the instant of the call.
    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl<T: Send> Default for MpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
