//! Multi-priority work-stealing CPU executor.
//!
//! A [`CpuExecutor`] owns N worker threads serving P priority bands. Each
//! worker drains its own queues highest band first (inbox, then local
//! deque, then injector), steals from other workers in the order given by
//! the topology matrix when its own queues are empty, and parks after a
//! configurable number of empty probes. Submitters wake parked workers
//! through the idle bitmap; a submission at a higher band than a worker's
//! running task sets that worker's yield bit, which cooperative tasks poll
//! via [`yield_if_requested`](crate::ops::yield_if_requested).

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::sync::{Parker, Unparker};
use parking_lot::Mutex;
use tachyon_core::AtomicBitmap;

use crate::exec::context::{self, WorkerTls};
use crate::exec::matrix::{StealMatrix, StealStrategy};
use crate::exec::queues::{self, LocalQueues, SharedQueues, steal_into};
use crate::exec::{Executor, ExecutorRef};
use crate::task::{Priority, WorkItem, WorkerId};
use crate::topology::{
    CpuKind, PackingStrategy, PinFn, PinningLevel, ThreadHook, ThreadInfo, Topology,
};

static NEXT_EXEC_ID: AtomicUsize = AtomicUsize::new(1);

/// Sentinel for "not currently executing anything".
const NO_PRIO: usize = usize::MAX;

/// Per-worker scheduling state shared between the worker and submitters.
pub(crate) struct WorkerShared {
    /// Band of the item currently executing, or [`NO_PRIO`].
    pub(crate) current_prio: AtomicUsize,
    /// Bit `p` set: work at band `p` arrived while this worker was running
    /// a lower-priority item.
    pub(crate) yield_bits: AtomicU64,
}

impl WorkerShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            current_prio: AtomicUsize::new(NO_PRIO),
            yield_bits: AtomicU64::new(0),
        })
    }

    /// True if work at a band above `current` is pending for this worker.
    pub(crate) fn yield_requested(&self) -> bool {
        let cur = self.current_prio.load(Ordering::SeqCst);
        if cur == NO_PRIO || cur == 0 {
            return false;
        }
        let mask = (1u64 << cur) - 1;
        self.yield_bits.load(Ordering::SeqCst) & mask != 0
    }
}

struct WorkerSlot {
    shared: Arc<WorkerShared>,
    queues: SharedQueues,
    unparker: Unparker,
    info: ThreadInfo,
}

/// Partition rule: workers whose cores match `filter` serve bands
/// `lo..=hi`.
#[derive(Debug, Clone, Copy)]
struct Partition {
    filter: CpuKind,
    lo: usize,
    hi: usize,
}

/// The shared core of a CPU executor. Worker threads and spawned tasks
/// hold this; the user-facing [`CpuExecutor`] owns the thread handles.
pub(crate) struct CpuCore {
    id: usize,
    name: String,
    prio_count: usize,
    spins: usize,
    workers: Box<[WorkerSlot]>,
    /// Bit per worker: set while that worker is parked (or about to park).
    idle: AtomicBitmap,
    matrix: StealMatrix,
    /// Eligible workers per band, used for target selection.
    band_workers: Box<[Box<[usize]>]>,
    /// Bands served per worker, ascending.
    worker_bands: Box<[Box<[usize]>]>,
    /// `serves[band * width + w]`.
    serves: Box<[bool]>,
    shutdown: AtomicBool,
    rr: AtomicUsize,
    pinning: PinningLevel,
    pin_fn: Option<PinFn>,
    init_hook: Option<ThreadHook>,
    teardown_hook: Option<ThreadHook>,
}

impl CpuCore {
    fn width(&self) -> usize {
        self.workers.len()
    }

    fn serves(&self, worker: usize, band: usize) -> bool {
        self.serves[band * self.width() + worker]
    }

    /// Picks a destination worker for an untargeted submission at `band`:
    /// an idle eligible worker if one exists, else rotating round-robin.
    fn pick_target(&self, band: usize) -> usize {
        let eligible = &self.band_workers[band];
        let start = self.rr.fetch_add(1, Ordering::Relaxed);
        for i in 0..eligible.len() {
            let w = eligible[(start + i) % eligible.len()];
            if self.idle.is_set(w) {
                return w;
            }
        }
        eligible[start % eligible.len()]
    }

    /// Post-enqueue notification: arm the yield bit if the destination is
    /// busy with lower-priority work, and unpark it if it is idle.
    fn notify(&self, worker: usize, band: usize) {
        let shared = &self.workers[worker].shared;
        let cur = shared.current_prio.load(Ordering::SeqCst);
        if cur != NO_PRIO && band < cur {
            shared.yield_bits.fetch_or(1 << band, Ordering::SeqCst);
        }
        if self.idle.clear(worker) {
            self.workers[worker].unparker.unpark();
        }
    }

    /// Wakes up to `n` idle workers, walking `origin`'s wake-matrix row so
    /// the nearest likely thieves come up first.
    fn wake_from(&self, origin: usize, n: usize) {
        let mut woken = 0;
        for &w in &self.matrix.wake_row(origin)[1..] {
            if woken == n {
                break;
            }
            if self.idle.clear(w) {
                self.workers[w].unparker.unpark();
                woken += 1;
            }
        }
    }

    fn submit_inner(&self, item: WorkItem, prio: Priority, hint: Option<WorkerId>) {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!(target: "tachyon::exec", exec = %self.name, "submission after teardown dropped");
            return;
        }
        let band = prio.clamp_to(self.prio_count).band();

        // Fast path: the submitter is one of our own workers.
        if hint.is_none() {
            let mut item_slot = Some(item);
            let local = context::with_worker(|w| {
                if w.exec_id == self.id && self.serves(w.index, band) {
                    w.locals[band].push(item_slot.take().expect("item already consumed"));
                    Some(w.index)
                } else {
                    None
                }
            })
            .flatten();
            if let Some(origin) = local {
                // The running task may itself now be outranked.
                let shared = &self.workers[origin].shared;
                let cur = shared.current_prio.load(Ordering::SeqCst);
                if cur != NO_PRIO && band < cur {
                    shared.yield_bits.fetch_or(1 << band, Ordering::SeqCst);
                }
                // Give an idle neighbor a chance to steal it.
                self.wake_from(origin, 1);
                return;
            }
            let item = item_slot.expect("item consumed without local push");
            let w = self.pick_target(band);
            self.workers[w].queues.injectors[band].push(item);
            self.notify(w, band);
            return;
        }

        // Targeted post: hinted worker's inbox, injector on overflow.
        let hinted = hint.expect("checked above").as_usize();
        let w = if hinted < self.width() && self.serves(hinted, band) {
            hinted
        } else {
            self.pick_target(band)
        };
        self.workers[w].queues.post_targeted(band, item);
        self.notify(w, band);
    }

    fn submit_bulk_inner(&self, items: Vec<WorkItem>, prio: Priority) {
        if items.is_empty() {
            return;
        }
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!(target: "tachyon::exec", exec = %self.name, "bulk submission after teardown dropped");
            return;
        }
        let band = prio.clamp_to(self.prio_count).band();
        let n = items.len();

        let origin = context::with_worker(|w| {
            if w.exec_id == self.id && self.serves(w.index, band) {
                Some(w.index)
            } else {
                None
            }
        })
        .flatten();

        match origin {
            Some(me) => {
                context::with_worker(|w| {
                    for item in items {
                        w.locals[band].push(item);
                    }
                });
                self.wake_from(me, n);
            }
            None => {
                let w = self.pick_target(band);
                for item in items {
                    self.workers[w].queues.injectors[band].push(item);
                }
                self.notify(w, band);
                // One wake per posted item, at most.
                self.wake_from(w, n - 1);
            }
        }
    }

    // ── Worker side ─────────────────────────────────────────────────────

    /// Takes the highest-band item from this worker's own queues.
    fn next_local(&self, index: usize, locals: &[crossbeam_deque::Worker<WorkItem>]) -> Option<(WorkItem, usize)> {
        let slot = &self.workers[index];
        for &band in &self.worker_bands[index] {
            if let Ok(item) = slot.queues.inbox_rx[band].try_recv() {
                return Some((item, band));
            }
            if let Some(item) = locals[band].pop() {
                return Some((item, band));
            }
            if let Some(item) =
                steal_into(|| slot.queues.injectors[band].steal_batch_and_pop(&locals[band]))
            {
                return Some((item, band));
            }
        }
        None
    }

    /// One full steal sweep: bands high to low, victims in matrix order.
    fn steal(&self, index: usize, locals: &[crossbeam_deque::Worker<WorkItem>]) -> Option<(WorkItem, usize)> {
        for &band in &self.worker_bands[index] {
            for &victim in &self.matrix.steal_row(index)[1..] {
                if !self.serves(victim, band) {
                    continue;
                }
                let vq = &self.workers[victim].queues;
                if let Some(item) =
                    steal_into(|| vq.injectors[band].steal_batch_and_pop(&locals[band]))
                {
                    return Some((item, band));
                }
                if let Some(item) =
                    steal_into(|| vq.stealers[band].steal_batch_and_pop(&locals[band]))
                {
                    return Some((item, band));
                }
            }
        }
        None
    }

    fn run_item(&self, index: usize, band: usize, item: WorkItem) {
        let shared = &self.workers[index].shared;
        shared.current_prio.store(band, Ordering::SeqCst);
        shared.yield_bits.fetch_and(!(1 << band), Ordering::SeqCst);
        item.run();
        shared.current_prio.store(NO_PRIO, Ordering::SeqCst);
    }

    /// Conservative recheck of this worker's own queues, used to close the
    /// race between marking idle and parking.
    fn own_queues_look_empty(&self, index: usize, locals: &[crossbeam_deque::Worker<WorkItem>]) -> bool {
        let slot = &self.workers[index];
        self.worker_bands[index].iter().all(|&band| {
            slot.queues.inbox_rx[band].is_empty()
                && locals[band].is_empty()
                && slot.queues.injectors[band].is_empty()
        })
    }
}

impl Executor for CpuCore {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority_count(&self) -> usize {
        self.prio_count
    }

    fn submit(&self, item: WorkItem, prio: Priority, hint: Option<WorkerId>) {
        self.submit_inner(item, prio, hint);
    }

    fn submit_bulk(&self, items: Vec<WorkItem>, prio: Priority) {
        self.submit_bulk_inner(items, prio);
    }
}

fn worker_main(core: &Arc<CpuCore>, index: usize, locals: LocalQueues, parker: &Parker) {
    let locals = Rc::new(locals.deques);
    let exec_ref: ExecutorRef = Arc::clone(core) as ExecutorRef;
    let _worker = context::register_worker(WorkerTls {
        exec_id: core.id,
        index,
        shared: Arc::clone(&core.workers[index].shared),
        locals: Rc::clone(&locals),
    });
    let _exec = context::enter_executor(exec_ref);

    let info = core.workers[index].info;
    if !matches!(core.pinning, PinningLevel::Off) {
        if let Some(pin) = &core.pin_fn {
            pin(&info);
        }
    }
    if let Some(hook) = &core.init_hook {
        hook(&info);
    }
    tracing::trace!(target: "tachyon::exec", exec = %core.name, worker = index, "worker started");

    'run: loop {
        if core.shutdown.load(Ordering::Acquire) {
            break;
        }
        if let Some((item, band)) = core.next_local(index, &locals) {
            core.run_item(index, band, item);
            continue;
        }

        // Empty probes: alternate steal sweeps with spins before parking.
        let mut probes = 0;
        loop {
            if core.shutdown.load(Ordering::Acquire) {
                break 'run;
            }
            if let Some((item, band)) = core.steal(index, &locals) {
                core.run_item(index, band, item);
                continue 'run;
            }
            probes += 1;
            if probes >= core.spins {
                break;
            }
            std::hint::spin_loop();
        }

        // Park protocol: mark idle, recheck own queues once to close the
        // race with a submitter that saw us busy, then park.
        core.idle.set(index);
        if !core.own_queues_look_empty(index, &locals) {
            core.idle.clear(index);
            continue;
        }
        if core.shutdown.load(Ordering::Acquire) {
            core.idle.clear(index);
            break;
        }
        parker.park();
        core.idle.clear(index);
    }

    if let Some(hook) = &core.teardown_hook {
        hook(&info);
    }
    tracing::trace!(target: "tachyon::exec", exec = %core.name, worker = index, "worker exiting");
}

/// A multi-priority work-stealing executor over OS threads.
///
/// Build one with [`CpuExecutor::builder`]; dropping it (or calling
/// [`teardown`](CpuExecutor::teardown)) stops the workers. Pending work is
/// abandoned once the currently running items return.
pub struct CpuExecutor {
    core: Arc<CpuCore>,
    joins: Mutex<Vec<thread::JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl CpuExecutor {
    /// Starts configuring a CPU executor.
    pub fn builder() -> CpuBuilder {
        CpuBuilder::new()
    }

    /// A single-worker CPU executor: same submission API and priority
    /// semantics, one thread.
    pub fn single_thread() -> Arc<CpuExecutor> {
        Self::builder().thread_count(1).build()
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.core.width()
    }

    /// Stops the workers and waits for them to exit. Idempotent.
    ///
    /// When called from one of this executor's own workers, the join is
    /// skipped and the threads wind down on their own.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(target: "tachyon::exec", exec = %self.core.name, "tearing down");
        self.core.shutdown.store(true, Ordering::Release);
        for slot in &self.core.workers {
            slot.unparker.unpark();
        }
        let on_own_worker =
            context::with_worker(|w| w.exec_id == self.core.id).unwrap_or(false);
        if on_own_worker {
            return;
        }
        let joins = std::mem::take(&mut *self.joins.lock());
        for handle in joins {
            let _ = handle.join();
        }
    }

    /// `true` until [`teardown`](CpuExecutor::teardown) has been initiated.
    pub fn is_running(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst)
    }
}

impl Executor for CpuExecutor {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn priority_count(&self) -> usize {
        self.core.prio_count
    }

    fn submit(&self, item: WorkItem, prio: Priority, hint: Option<WorkerId>) {
        self.core.submit_inner(item, prio, hint);
    }

    fn submit_bulk(&self, items: Vec<WorkItem>, prio: Priority) {
        self.core.submit_bulk_inner(items, prio);
    }
}

impl Drop for CpuExecutor {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Configuration for a [`CpuExecutor`]. All options apply at
/// [`build`](CpuBuilder::build); the builder is consumed, so late
/// reconfiguration is impossible by construction.
pub struct CpuBuilder {
    name: String,
    thread_count: Option<usize>,
    priority_count: usize,
    spins: usize,
    strategy: StealStrategy,
    topology: Option<Topology>,
    occupancy: f64,
    packing: PackingStrategy,
    pinning: PinningLevel,
    pin_fn: Option<PinFn>,
    init_hook: Option<ThreadHook>,
    teardown_hook: Option<ThreadHook>,
    partitions: Vec<Partition>,
}

impl CpuBuilder {
    fn new() -> Self {
        Self {
            name: "cpu".to_string(),
            thread_count: None,
            priority_count: 1,
            spins: 64,
            strategy: StealStrategy::default(),
            topology: None,
            occupancy: 1.0,
            packing: PackingStrategy::default(),
            pinning: PinningLevel::default(),
            pin_fn: None,
            init_hook: None,
            teardown_hook: None,
            partitions: Vec::new(),
        }
    }

    /// Names the executor; worker threads are named `"<name>-<index>"`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the worker count. Defaults to the topology's recommendation
    /// (container quota respected).
    #[must_use]
    pub fn thread_count(mut self, n: usize) -> Self {
        self.thread_count = Some(n.max(1));
        self
    }

    /// Sets the number of priority bands (1 to [`Priority::MAX_COUNT`]).
    #[must_use]
    pub fn priority_count(mut self, p: usize) -> Self {
        self.priority_count = p.clamp(1, Priority::MAX_COUNT);
        self
    }

    /// Empty-probe iterations before a worker parks.
    #[must_use]
    pub fn spins(mut self, n: usize) -> Self {
        self.spins = n.max(1);
        self
    }

    /// Chooses the steal-order strategy.
    #[must_use]
    pub fn work_stealing_strategy(mut self, strategy: StealStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Supplies an explicit topology instead of detecting one.
    #[must_use]
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology = Some(topo);
        self
    }

    /// Workers per core multiplier used when deriving the thread count.
    #[must_use]
    pub fn thread_occupancy(mut self, occupancy: f64) -> Self {
        self.occupancy = occupancy;
        self
    }

    /// How workers are distributed across cache groups.
    #[must_use]
    pub fn thread_packing_strategy(mut self, packing: PackingStrategy) -> Self {
        self.packing = packing;
        self
    }

    /// Sets the pinning level and the callback that applies it. The
    /// callback runs once on each worker thread before its run loop.
    #[must_use]
    pub fn thread_pinning(mut self, level: PinningLevel, pin: PinFn) -> Self {
        self.pinning = level;
        self.pin_fn = Some(pin);
        self
    }

    /// Callback invoked on each worker thread before its run loop.
    #[must_use]
    pub fn thread_init_hook(mut self, hook: impl Fn(&ThreadInfo) + Send + Sync + 'static) -> Self {
        self.init_hook = Some(Arc::new(hook));
        self
    }

    /// Callback invoked on each worker thread after its run loop.
    #[must_use]
    pub fn thread_teardown_hook(
        mut self,
        hook: impl Fn(&ThreadInfo) + Send + Sync + 'static,
    ) -> Self {
        self.teardown_hook = Some(Arc::new(hook));
        self
    }

    /// Restricts bands `lo_prio..=hi_prio` to workers whose cores match
    /// `filter`. Multiple partitions may overlap; a band no partition
    /// covers is served by every worker.
    #[must_use]
    pub fn add_partition(mut self, filter: CpuKind, lo_prio: usize, hi_prio: usize) -> Self {
        self.partitions.push(Partition {
            filter,
            lo: lo_prio,
            hi: hi_prio.max(lo_prio),
        });
        self
    }

    /// Builds the executor and starts its workers.
    pub fn build(self) -> Arc<CpuExecutor> {
        let topo = self.topology.unwrap_or_else(Topology::detect);
        let width = self
            .thread_count
            .unwrap_or_else(|| topo.recommended_workers(self.occupancy))
            .max(1);
        let prio_count = self.priority_count;

        let groups_of = topo.assign_groups(width, self.packing);
        let matrix = StealMatrix::build(&groups_of, self.strategy);

        // Band eligibility from partitions.
        let mut serves = vec![false; prio_count * width];
        for band in 0..prio_count {
            let covering: Vec<&Partition> = self
                .partitions
                .iter()
                .filter(|p| p.lo <= band && band <= p.hi)
                .collect();
            for (w, &g) in groups_of.iter().enumerate() {
                let kind = topo.groups[g].kind;
                let eligible = if covering.is_empty() {
                    true
                } else {
                    covering.iter().any(|p| kind.matches(p.filter))
                };
                serves[band * width + w] = eligible;
            }
            // A band nobody serves falls back to every worker.
            if !serves[band * width..(band + 1) * width].iter().any(|&b| b) {
                for w in 0..width {
                    serves[band * width + w] = true;
                }
            }
        }
        let band_workers: Vec<Box<[usize]>> = (0..prio_count)
            .map(|band| {
                (0..width)
                    .filter(|&w| serves[band * width + w])
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();
        let worker_bands: Vec<Box<[usize]>> = (0..width)
            .map(|w| {
                (0..prio_count)
                    .filter(|&band| serves[band * width + w])
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();

        let mut slots = Vec::with_capacity(width);
        let mut locals = Vec::with_capacity(width);
        let mut parkers = Vec::with_capacity(width);
        for w in 0..width {
            let (shared_q, local_q) = queues::make_queues(prio_count);
            let parker = Parker::new();
            let g = groups_of[w];
            slots.push(WorkerSlot {
                shared: WorkerShared::new(),
                queues: shared_q,
                unparker: parker.unparker().clone(),
                info: ThreadInfo {
                    index: w,
                    group: g,
                    kind: topo.groups[g].kind,
                    smt_level: topo.groups[g].smt_level,
                    pinning: self.pinning,
                },
            });
            locals.push(local_q);
            parkers.push(parker);
        }

        let core = Arc::new(CpuCore {
            id: NEXT_EXEC_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            prio_count,
            spins: self.spins,
            workers: slots.into_boxed_slice(),
            idle: AtomicBitmap::new(width),
            matrix,
            band_workers: band_workers.into_boxed_slice(),
            worker_bands: worker_bands.into_boxed_slice(),
            serves: serves.into_boxed_slice(),
            shutdown: AtomicBool::new(false),
            rr: AtomicUsize::new(0),
            pinning: self.pinning,
            pin_fn: self.pin_fn,
            init_hook: self.init_hook,
            teardown_hook: self.teardown_hook,
        });

        tracing::debug!(
            target: "tachyon::exec",
            exec = %core.name,
            workers = width,
            bands = prio_count,
            "executor starting"
        );

        let mut joins = Vec::with_capacity(width);
        for (index, (local_q, parker)) in locals.into_iter().zip(parkers).enumerate() {
            let core = Arc::clone(&core);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", core.name, index))
                .spawn(move || worker_main(&core, index, local_q, &parker))
                .expect("failed to spawn worker thread");
            joins.push(handle);
        }

        Arc::new(CpuExecutor {
            core,
            joins: Mutex::new(joins),
            torn_down: AtomicBool::new(false),
        })
    }
}

impl Default for CpuBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn wait_for(cond: impl Fn() -> bool, what: &str) {
        let start = std::time::Instant::now();
        while !cond() {
            assert!(
                start.elapsed() < Duration::from_secs(10),
                "timed out waiting for {what}"
            );
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn runs_posted_callables() {
        let ex = CpuExecutor::builder().name("t-basic").thread_count(2).build();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = Arc::clone(&counter);
            ex.submit(
                WorkItem::from_fn(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
                Priority::HIGHEST,
                None,
            );
        }
        wait_for(|| counter.load(Ordering::SeqCst) == 100, "all callables");
        ex.teardown();
    }

    #[test]
    fn teardown_is_idempotent() {
        let ex = CpuExecutor::builder().name("t-teardown").thread_count(1).build();
        ex.teardown();
        ex.teardown();
        assert!(!ex.is_running());
    }

    #[test]
    fn hinted_submissions_run_on_hinted_worker() {
        let ex = CpuExecutor::builder().name("t-hint").thread_count(3).build();
        let hits = Arc::new(AtomicUsize::new(0));
        let misses = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let hits = Arc::clone(&hits);
            let misses = Arc::clone(&misses);
            ex.submit(
                WorkItem::from_fn(move || {
                    let here = context::with_worker(|w| w.index);
                    if here == Some(1) {
                        hits.fetch_add(1, Ordering::SeqCst);
                    } else {
                        misses.fetch_add(1, Ordering::SeqCst);
                    }
                }),
                Priority::HIGHEST,
                Some(WorkerId::new(1)),
            );
        }
        wait_for(
            || hits.load(Ordering::SeqCst) + misses.load(Ordering::SeqCst) == 50,
            "hinted items",
        );
        // Inbox items are never stolen, so every one ran on worker 1.
        assert_eq!(misses.load(Ordering::SeqCst), 0);
        ex.teardown();
    }

    #[test]
    fn work_distributes_across_workers() {
        let ex = CpuExecutor::builder().name("t-spread").thread_count(4).build();
        let per_worker: Arc<Vec<AtomicUsize>> =
            Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect());
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..2000 {
            let per_worker = Arc::clone(&per_worker);
            let total = Arc::clone(&total);
            ex.submit(
                WorkItem::from_fn(move || {
                    if let Some(i) = context::with_worker(|w| w.index) {
                        per_worker[i].fetch_add(1, Ordering::SeqCst);
                    }
                    // A little work so stealing has a reason to happen.
                    std::hint::black_box((0..100).sum::<u64>());
                    total.fetch_add(1, Ordering::SeqCst);
                }),
                Priority::HIGHEST,
                None,
            );
        }
        wait_for(|| total.load(Ordering::SeqCst) == 2000, "all items");
        let busy = per_worker
            .iter()
            .filter(|c| c.load(Ordering::SeqCst) > 0)
            .count();
        assert!(busy > 1, "work should spread beyond one worker");
        ex.teardown();
    }

    #[test]
    fn thread_hooks_run_per_worker() {
        let inits = Arc::new(AtomicUsize::new(0));
        let exits = Arc::new(AtomicUsize::new(0));
        let i2 = Arc::clone(&inits);
        let e2 = Arc::clone(&exits);
        let ex = CpuExecutor::builder()
            .name("t-hooks")
            .thread_count(3)
            .thread_init_hook(move |info| {
                assert!(info.index < 3);
                i2.fetch_add(1, Ordering::SeqCst);
            })
            .thread_teardown_hook(move |_| {
                e2.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        wait_for(|| inits.load(Ordering::SeqCst) == 3, "init hooks");
        ex.teardown();
        assert_eq!(exits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn partition_restricts_band_to_matching_workers() {
        let topo = Topology {
            groups: vec![
                crate::topology::CacheGroup {
                    kind: CpuKind::Performance,
                    smt_level: 1,
                    cores: vec![0, 1],
                },
                crate::topology::CacheGroup {
                    kind: CpuKind::Efficiency1,
                    smt_level: 1,
                    cores: vec![2, 3],
                },
            ],
            quota: None,
        };
        let ex = CpuExecutor::builder()
            .name("t-part")
            .topology(topo)
            .thread_count(4)
            .priority_count(2)
            .add_partition(CpuKind::Performance, 0, 0)
            .add_partition(CpuKind::Efficiency1, 1, 1)
            .build();

        // Band 0 only on performance workers (0, 1); band 1 only on
        // efficiency workers (2, 3).
        assert!(ex.core.serves(0, 0));
        assert!(ex.core.serves(1, 0));
        assert!(!ex.core.serves(2, 0));
        assert!(!ex.core.serves(0, 1));
        assert!(ex.core.serves(2, 1));
        assert!(ex.core.serves(3, 1));

        let ran_on = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let ran_on = Arc::clone(&ran_on);
            let done = Arc::clone(&done);
            ex.submit(
                WorkItem::from_fn(move || {
                    if let Some(i) = context::with_worker(|w| w.index) {
                        ran_on.lock().push(i);
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                }),
                Priority::new(1),
                None,
            );
        }
        wait_for(|| done.load(Ordering::SeqCst) == 20, "partitioned items");
        for &w in ran_on.lock().iter() {
            assert!(w >= 2, "band-1 item ran on performance worker {w}");
        }
        ex.teardown();
    }

    #[test]
    fn yield_bit_set_by_higher_priority_arrival() {
        let shared = WorkerShared::new();
        shared.current_prio.store(3, Ordering::SeqCst);
        assert!(!shared.yield_requested());
        shared.yield_bits.fetch_or(1 << 1, Ordering::SeqCst);
        assert!(shared.yield_requested());
        // Equal or lower bands never request a yield.
        shared.yield_bits.store(1 << 3, Ordering::SeqCst);
        assert!(!shared.yield_requested());
        shared.yield_bits.store(1 << 5, Ordering::SeqCst);
        assert!(!shared.yield_requested());
    }

    #[test]
    fn bulk_submit_runs_everything() {
        let ex = CpuExecutor::builder().name("t-bulk").thread_count(2).build();
        let counter = Arc::new(AtomicUsize::new(0));
        let items: Vec<WorkItem> = (0..500)
            .map(|_| {
                let c = Arc::clone(&counter);
                WorkItem::from_fn(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        ex.submit_bulk(items, Priority::HIGHEST);
        wait_for(|| counter.load(Ordering::SeqCst) == 500, "bulk items");
        ex.teardown();
    }

    #[test]
    fn hierarchy_strategy_with_pinning_and_spread_packing() {
        let topo = Topology {
            groups: vec![
                crate::topology::CacheGroup {
                    kind: CpuKind::Performance,
                    smt_level: 2,
                    cores: vec![0, 1],
                },
                crate::topology::CacheGroup {
                    kind: CpuKind::Efficiency1,
                    smt_level: 1,
                    cores: vec![2, 3],
                },
            ],
            quota: None,
        };
        let pinned = Arc::new(AtomicUsize::new(0));
        let p2 = Arc::clone(&pinned);
        let ex = CpuExecutor::builder()
            .name("t-topo")
            .topology(topo)
            .thread_count(4)
            .work_stealing_strategy(StealStrategy::Hierarchy)
            .thread_packing_strategy(PackingStrategy::Spread)
            .thread_pinning(
                PinningLevel::Group,
                Arc::new(move |info: &ThreadInfo| {
                    assert_eq!(info.pinning, PinningLevel::Group);
                    p2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .build();
        wait_for(|| pinned.load(Ordering::SeqCst) == 4, "pin callbacks");

        // Spread packing alternates groups across workers.
        assert_eq!(ex.core.workers[0].info.group, 0);
        assert_eq!(ex.core.workers[1].info.group, 1);
        assert_eq!(ex.core.workers[2].info.group, 0);
        assert_eq!(ex.core.workers[3].info.group, 1);

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let d = Arc::clone(&done);
            ex.submit(
                WorkItem::from_fn(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                }),
                Priority::HIGHEST,
                None,
            );
        }
        wait_for(|| done.load(Ordering::SeqCst) == 100, "items on hierarchy");
        ex.teardown();
    }

    #[test]
    fn quota_clamps_default_thread_count() {
        let mut topo = Topology::single_group(8);
        topo.quota = Some(2);
        let ex = CpuExecutor::builder().name("t-quota").topology(topo).build();
        assert_eq!(ex.thread_count(), 2);
        ex.teardown();
    }
}
