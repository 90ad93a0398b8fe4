//! Spawn operators.
//!
//! [`spawn`] submits one child task and hands back a joinable handle;
//! [`spawn_many`] submits a homogeneous batch behind a shared done-counter;
//! [`spawn_tuple`] does the same for a heterogeneous fixed-size group;
//! [`spawn_group`]/[`fork_group`] accumulate children incrementally. Every
//! builder supports `run_on` (where children execute), `resume_on` (where
//! the awaiting task resumes), and `with_priority`.
//!
//! A child panic is captured and rethrown at the join point; a detached
//! child's panic terminates the process.

use std::collections::VecDeque;
use std::future::{Future, IntoFuture};
use std::panic::resume_unwind;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::exec::{ExecutorRef, context};
use crate::task::{
    CatchUnwind, DoneGroup, JoinState, PanicPayload, Priority, TaskCore, WorkItem, WorkerId,
    payload_message,
};

/// Options shared by every spawn builder.
#[derive(Default)]
struct SpawnOpts {
    exec: Option<ExecutorRef>,
    resume: Option<ExecutorRef>,
    prio: Option<Priority>,
    hint: Option<WorkerId>,
}

impl SpawnOpts {
    /// Resolves the target executor and priority: explicit choice, else the
    /// submitter's context, else the process default.
    ///
    /// # Panics
    ///
    /// Panics when no executor can be resolved.
    fn resolve(&self) -> (ExecutorRef, Priority, Option<WorkerId>) {
        let exec = self
            .exec
            .clone()
            .or_else(crate::exec::current_executor)
            .expect("spawn requires a current or default executor");
        let prio = self
            .prio
            .or_else(|| context::current_task().map(|t| t.priority()))
            .unwrap_or_default();
        (exec, prio, self.hint)
    }
}

// ---------------------------------------------------------------------------
// spawn (single child)
// ---------------------------------------------------------------------------

/// Builds a child task from `fut`.
///
/// Awaiting the builder submits the child and suspends until it completes;
/// [`fork`](Spawn::fork) submits immediately and returns a handle;
/// [`detach`](Spawn::detach) submits with no join point.
pub fn spawn<F>(fut: F) -> Spawn<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Spawn {
        fut,
        opts: SpawnOpts::default(),
    }
}

/// Builder returned by [`spawn`].
#[must_use = "a spawn builder does nothing until awaited, forked, or detached"]
pub struct Spawn<F> {
    fut: F,
    opts: SpawnOpts,
}

impl<F> Spawn<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    /// Runs the child on `exec` instead of the submitter's executor.
    pub fn run_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.exec = Some(exec);
        self
    }

    /// Resumes the awaiting task on `exec` once the child completes.
    pub fn resume_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.resume = Some(exec);
        self
    }

    /// Submits the child at priority `band` instead of inheriting the
    /// submitter's priority.
    pub fn with_priority(mut self, band: usize) -> Self {
        self.opts.prio = Some(Priority::new(band));
        self
    }

    /// Prefers a specific destination worker.
    pub fn with_hint(mut self, worker: WorkerId) -> Self {
        self.opts.hint = Some(worker);
        self
    }

    /// Submits the child now and returns a handle awaitable later.
    pub fn fork(self) -> JoinHandle<F::Output> {
        let (exec, prio, hint) = self.opts.resolve();
        let state = JoinState::new();
        if let Some(resume) = self.opts.resume {
            if let Some(parent) = context::current_task() {
                state.set_resume(parent, resume);
            }
        }
        let st = Arc::clone(&state);
        let fut = self.fut;
        let wrapper = async move {
            st.complete(CatchUnwind::new(fut).await);
        };
        TaskCore::new(wrapper, exec, prio, hint).schedule();
        JoinHandle { state, done: false }
    }

    /// Submits the child with no continuation; it runs to completion and
    /// its frame is destroyed.
    pub fn detach(self) {
        let (exec, prio, hint) = self.opts.resolve();
        let fut = self.fut;
        let wrapper = async move {
            if let Err(payload) = CatchUnwind::new(fut).await {
                let msg = payload_message(&payload);
                tracing::error!(target: "tachyon::spawn", %msg, "detached task panicked");
                std::process::abort();
            }
        };
        TaskCore::new(wrapper, exec, prio, hint).schedule();
    }
}

impl<F> IntoFuture for Spawn<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    type Output = F::Output;
    type IntoFuture = JoinHandle<F::Output>;

    fn into_future(self) -> JoinHandle<F::Output> {
        self.fork()
    }
}

/// Awaitable handle to a spawned child.
///
/// Dropping the handle without awaiting it detaches the child. A child
/// panic is rethrown here.
pub struct JoinHandle<T> {
    state: Arc<JoinState<T>>,
    done: bool,
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        debug_assert!(!self.done, "join handle polled after completion");
        match self.state.poll_take(cx) {
            Poll::Ready(Ok(v)) => {
                self.done = true;
                Poll::Ready(v)
            }
            Poll::Ready(Err(payload)) => resume_unwind(payload),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// spawn_many (homogeneous batch)
// ---------------------------------------------------------------------------

/// Builds a batch of child tasks from an iterator of futures.
///
/// Awaiting submits every child (bounded by
/// [`max_tasks`](SpawnMany::max_tasks), if set) and resolves to a `Vec` of
/// results in submission order once the shared done-counter reaches zero.
pub fn spawn_many<I>(futs: I) -> SpawnMany<I>
where
    I: IntoIterator,
    I::Item: Future + Send + 'static,
    <I::Item as Future>::Output: Send + 'static,
{
    SpawnMany {
        futs,
        opts: SpawnOpts::default(),
        max: None,
    }
}

/// Builder returned by [`spawn_many`].
#[must_use = "a spawn builder does nothing until awaited, forked, or detached"]
pub struct SpawnMany<I> {
    futs: I,
    opts: SpawnOpts,
    max: Option<usize>,
}

type ResultSlots<T> = Arc<[Mutex<Option<T>>]>;

impl<I> SpawnMany<I>
where
    I: IntoIterator,
    I::Item: Future + Send + 'static,
    <I::Item as Future>::Output: Send + 'static,
{
    /// Runs the children on `exec` instead of the submitter's executor.
    pub fn run_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.exec = Some(exec);
        self
    }

    /// Resumes the awaiting task on `exec` once the last child completes.
    pub fn resume_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.resume = Some(exec);
        self
    }

    /// Submits the children at priority `band`.
    pub fn with_priority(mut self, band: usize) -> Self {
        self.opts.prio = Some(Priority::new(band));
        self
    }

    /// Spawns at most `max` children even if the iterator yields more.
    pub fn max_tasks(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    fn collect_futs(self) -> (Vec<I::Item>, SpawnOpts) {
        let futs: Vec<I::Item> = match self.max {
            Some(max) => self.futs.into_iter().take(max).collect(),
            None => self.futs.into_iter().collect(),
        };
        (futs, self.opts)
    }

    /// Submits every child now and returns a joinable handle.
    pub fn fork(self) -> ManyHandle<<I::Item as Future>::Output> {
        let (futs, opts) = self.collect_futs();
        let (exec, prio, _hint) = opts.resolve();
        let n = futs.len();
        let done = DoneGroup::new(n);
        if let Some(resume) = opts.resume {
            if let Some(parent) = context::current_task() {
                done.set_resume(parent, resume);
            }
        }
        let slots: ResultSlots<<I::Item as Future>::Output> =
            (0..n).map(|_| Mutex::new(None)).collect();

        let items: Vec<WorkItem> = futs
            .into_iter()
            .enumerate()
            .map(|(i, fut)| {
                let done = Arc::clone(&done);
                let slots = Arc::clone(&slots);
                let wrapper = async move {
                    match CatchUnwind::new(fut).await {
                        Ok(v) => *slots[i].lock() = Some(v),
                        Err(payload) => done.record_panic(payload),
                    }
                    done.decrement();
                };
                WorkItem::Task(TaskCore::new(wrapper, exec.clone(), prio, None))
            })
            .collect();
        // Batch placement: one destination, one wake fan-out.
        schedule_batch(&exec, items, prio);

        ManyHandle {
            slots,
            done,
            taken: false,
        }
    }

    /// Submits every child with no join point.
    pub fn detach(self) {
        let (futs, opts) = self.collect_futs();
        let (exec, prio, _hint) = opts.resolve();
        let items: Vec<WorkItem> = futs
            .into_iter()
            .map(|fut| {
                let wrapper = async move {
                    if let Err(payload) = CatchUnwind::new(fut).await {
                        let msg = payload_message(&payload);
                        tracing::error!(target: "tachyon::spawn", %msg, "detached task panicked");
                        std::process::abort();
                    }
                };
                WorkItem::Task(TaskCore::new(wrapper, exec.clone(), prio, None))
            })
            .collect();
        schedule_batch(&exec, items, prio);
    }

    /// Submits every child and returns an as-completed consumer.
    pub fn each(self) -> EachHandle<<I::Item as Future>::Output> {
        let (futs, opts) = self.collect_futs();
        let (exec, prio, _hint) = opts.resolve();
        let n = futs.len();
        let state = Arc::new(EachState {
            ready: Mutex::new(VecDeque::with_capacity(n)),
            slots: (0..n).map(|_| Mutex::new(None)).collect(),
            waker: Mutex::new(None),
        });

        let items: Vec<WorkItem> = futs
            .into_iter()
            .enumerate()
            .map(|(i, fut)| {
                let state = Arc::clone(&state);
                let wrapper = async move {
                    let out = CatchUnwind::new(fut).await;
                    state.push(i, out);
                };
                WorkItem::Task(TaskCore::new(wrapper, exec.clone(), prio, None))
            })
            .collect();
        schedule_batch(&exec, items, prio);

        EachHandle {
            state,
            yielded: 0,
            total: n,
        }
    }
}

impl<I> IntoFuture for SpawnMany<I>
where
    I: IntoIterator,
    I::Item: Future + Send + 'static,
    <I::Item as Future>::Output: Send + 'static,
{
    type Output = Vec<<I::Item as Future>::Output>;
    type IntoFuture = ManyHandle<<I::Item as Future>::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.fork()
    }
}

fn schedule_batch(exec: &ExecutorRef, items: Vec<WorkItem>, prio: Priority) {
    if items.len() == 1 {
        let mut items = items;
        exec.submit(items.pop().expect("one item"), prio, None);
    } else {
        exec.submit_bulk(items, prio);
    }
}

/// Awaitable handle to a [`spawn_many`] batch.
pub struct ManyHandle<T> {
    slots: ResultSlots<T>,
    done: Arc<DoneGroup>,
    taken: bool,
}

impl<T> Future for ManyHandle<T> {
    type Output = Vec<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Vec<T>> {
        debug_assert!(!self.taken, "spawn_many handle polled after completion");
        match self.done.poll_ready(cx) {
            Poll::Ready(()) => {
                if let Some(payload) = self.done.take_panic() {
                    resume_unwind(payload);
                }
                self.taken = true;
                let out = self
                    .slots
                    .iter()
                    .map(|s| s.lock().take().expect("child result missing"))
                    .collect();
                Poll::Ready(out)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// As-completed state shared between children and the consumer.
struct EachState<T> {
    ready: Mutex<VecDeque<usize>>,
    slots: Box<[Mutex<Option<Result<T, PanicPayload>>>]>,
    waker: Mutex<Option<Waker>>,
}

impl<T> EachState<T> {
    fn push(&self, index: usize, out: Result<T, PanicPayload>) {
        *self.slots[index].lock() = Some(out);
        self.ready.lock().push_back(index);
        if let Some(w) = self.waker.lock().take() {
            w.wake();
        }
    }
}

/// As-completed consumer for a [`spawn_many`] batch.
///
/// Yields `(index, result)` pairs in completion order, which is generally
/// not submission order.
pub struct EachHandle<T> {
    state: Arc<EachState<T>>,
    yielded: usize,
    total: usize,
}

impl<T> EachHandle<T> {
    /// Number of children in the batch.
    pub fn len(&self) -> usize {
        self.total
    }

    /// `true` when the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Resolves to the next completed child, or `None` once every child
    /// has been yielded.
    pub fn next(&mut self) -> EachNext<'_, T> {
        EachNext { handle: self }
    }
}

/// Future returned by [`EachHandle::next`].
pub struct EachNext<'a, T> {
    handle: &'a mut EachHandle<T>,
}

impl<T> Future for EachNext<'_, T> {
    type Output = Option<(usize, T)>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let handle = &mut *self.handle;
        if handle.yielded == handle.total {
            return Poll::Ready(None);
        }
        loop {
            let next = handle.state.ready.lock().pop_front();
            match next {
                Some(i) => {
                    let out = handle.state.slots[i]
                        .lock()
                        .take()
                        .expect("completed child has no result");
                    handle.yielded += 1;
                    match out {
                        Ok(v) => return Poll::Ready(Some((i, v))),
                        Err(payload) => resume_unwind(payload),
                    }
                }
                None => {
                    *handle.state.waker.lock() = Some(cx.waker().clone());
                    // Recheck: a child may have completed between the pop
                    // and the registration.
                    if handle.state.ready.lock().is_empty() {
                        return Poll::Pending;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// spawn_tuple (heterogeneous fixed-size group)
// ---------------------------------------------------------------------------

/// Builds a heterogeneous group of child tasks from a tuple of futures
/// (arity 1 through 6).
///
/// Awaiting resolves to the tuple of results; [`each`](SpawnTuple::each)
/// yields indices in completion order, with the results available once the
/// stream ends.
pub fn spawn_tuple<T: TupleSpawn>(futs: T) -> SpawnTuple<T> {
    SpawnTuple {
        futs,
        opts: SpawnOpts::default(),
    }
}

/// Builder returned by [`spawn_tuple`].
#[must_use = "a spawn builder does nothing until awaited, forked, or detached"]
pub struct SpawnTuple<T> {
    futs: T,
    opts: SpawnOpts,
}

impl<T: TupleSpawn> SpawnTuple<T> {
    /// Runs the children on `exec` instead of the submitter's executor.
    pub fn run_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.exec = Some(exec);
        self
    }

    /// Submits the children at priority `band`.
    pub fn with_priority(mut self, band: usize) -> Self {
        self.opts.prio = Some(Priority::new(band));
        self
    }

    /// Submits every child now and returns a joinable handle.
    pub fn fork(self) -> JoinTuple<T> {
        let (exec, prio, _hint) = self.opts.resolve();
        let done = DoneGroup::new(T::ARITY);
        let slots = self.futs.submit_all(&exec, prio, &done);
        JoinTuple {
            slots,
            done,
            taken: false,
        }
    }

    /// Submits every child and returns an as-completed index stream.
    pub fn each(self) -> TupleEach<T> {
        let (exec, prio, _hint) = self.opts.resolve();
        let each = Arc::new(IndexEach {
            ready: Mutex::new(VecDeque::with_capacity(T::ARITY)),
            waker: Mutex::new(None),
            panic: Mutex::new(None),
        });
        let slots = self.futs.submit_all_each(&exec, prio, &each);
        TupleEach {
            each,
            slots,
            yielded: 0,
        }
    }
}

impl<T: TupleSpawn> IntoFuture for SpawnTuple<T> {
    type Output = T::Outputs;
    type IntoFuture = JoinTuple<T>;

    fn into_future(self) -> JoinTuple<T> {
        self.fork()
    }
}

/// Awaitable handle to a [`spawn_tuple`] group.
pub struct JoinTuple<T: TupleSpawn> {
    slots: T::Slots,
    done: Arc<DoneGroup>,
    taken: bool,
}

impl<T: TupleSpawn> Future for JoinTuple<T> {
    type Output = T::Outputs;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T::Outputs> {
        debug_assert!(!self.taken, "spawn_tuple handle polled after completion");
        match self.done.poll_ready(cx) {
            Poll::Ready(()) => {
                if let Some(payload) = self.done.take_panic() {
                    resume_unwind(payload);
                }
                self.taken = true;
                Poll::Ready(T::take(&self.slots))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Completion-index stream shared by tuple children.
#[doc(hidden)]
pub struct IndexEach {
    ready: Mutex<VecDeque<usize>>,
    waker: Mutex<Option<Waker>>,
    panic: Mutex<Option<PanicPayload>>,
}

impl IndexEach {
    fn push(&self, index: usize) {
        self.ready.lock().push_back(index);
        if let Some(w) = self.waker.lock().take() {
            w.wake();
        }
    }
}

/// As-completed consumer for a [`spawn_tuple`] group.
pub struct TupleEach<T: TupleSpawn> {
    each: Arc<IndexEach>,
    slots: T::Slots,
    yielded: usize,
}

impl<T: TupleSpawn> TupleEach<T> {
    /// Resolves to the index of the next completed child, or `None` once
    /// every child has been yielded.
    pub fn next(&mut self) -> TupleEachNext<'_, T> {
        TupleEachNext { each: self }
    }

    /// Takes the results after every index has been yielded.
    ///
    /// # Panics
    ///
    /// Panics if some child has not completed yet.
    pub fn results(self) -> T::Outputs {
        debug_assert!(self.yielded == T::ARITY, "results taken before completion");
        T::take(&self.slots)
    }
}

/// Future returned by [`TupleEach::next`].
pub struct TupleEachNext<'a, T: TupleSpawn> {
    each: &'a mut TupleEach<T>,
}

impl<T: TupleSpawn> Future for TupleEachNext<'_, T> {
    type Output = Option<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        let this = &mut *self.each;
        if let Some(payload) = this.each.panic.lock().take() {
            resume_unwind(payload);
        }
        if this.yielded == T::ARITY {
            return Poll::Ready(None);
        }
        loop {
            let next = this.each.ready.lock().pop_front();
            match next {
                Some(i) => {
                    this.yielded += 1;
                    return Poll::Ready(Some(i));
                }
                None => {
                    *this.each.waker.lock() = Some(cx.waker().clone());
                    if this.each.ready.lock().is_empty() {
                        return Poll::Pending;
                    }
                }
            }
        }
    }
}

/// Tuples of futures spawnable as a group. Implemented for arities 1–6.
pub trait TupleSpawn: Send + 'static {
    /// Tuple of child outputs.
    type Outputs;
    /// Tuple of shared result slots.
    type Slots: Send + Sync + Unpin + 'static;
    /// Number of children.
    const ARITY: usize;

    #[doc(hidden)]
    fn submit_all(self, exec: &ExecutorRef, prio: Priority, done: &Arc<DoneGroup>) -> Self::Slots;

    #[doc(hidden)]
    fn submit_all_each(
        self,
        exec: &ExecutorRef,
        prio: Priority,
        each: &Arc<IndexEach>,
    ) -> Self::Slots;

    #[doc(hidden)]
    fn take(slots: &Self::Slots) -> Self::Outputs;
}

macro_rules! impl_tuple_spawn {
    ($(($F:ident, $i:tt)),+) => {
        impl<$($F),+> TupleSpawn for ($($F,)+)
        where
            $($F: Future + Send + 'static, $F::Output: Send + 'static,)+
        {
            type Outputs = ($($F::Output,)+);
            type Slots = ($(Arc<Mutex<Option<$F::Output>>>,)+);
            const ARITY: usize = [$(stringify!($F)),+].len();

            fn submit_all(
                self,
                exec: &ExecutorRef,
                prio: Priority,
                done: &Arc<DoneGroup>,
            ) -> Self::Slots {
                let slots: Self::Slots = ($({
                    let _ = stringify!($F);
                    Arc::new(Mutex::new(None))
                },)+);
                $({
                    let fut = self.$i;
                    let slot = Arc::clone(&slots.$i);
                    let done = Arc::clone(done);
                    let wrapper = async move {
                        match CatchUnwind::new(fut).await {
                            Ok(v) => *slot.lock() = Some(v),
                            Err(payload) => done.record_panic(payload),
                        }
                        done.decrement();
                    };
                    TaskCore::new(wrapper, exec.clone(), prio, None).schedule();
                })+
                slots
            }

            fn submit_all_each(
                self,
                exec: &ExecutorRef,
                prio: Priority,
                each: &Arc<IndexEach>,
            ) -> Self::Slots {
                let slots: Self::Slots = ($({
                    let _ = stringify!($F);
                    Arc::new(Mutex::new(None))
                },)+);
                $({
                    let fut = self.$i;
                    let slot = Arc::clone(&slots.$i);
                    let each = Arc::clone(each);
                    let wrapper = async move {
                        match CatchUnwind::new(fut).await {
                            Ok(v) => *slot.lock() = Some(v),
                            Err(payload) => {
                                let mut p = each.panic.lock();
                                if p.is_none() {
                                    *p = Some(payload);
                                }
                            }
                        }
                        each.push($i);
                    };
                    TaskCore::new(wrapper, exec.clone(), prio, None).schedule();
                })+
                slots
            }

            fn take(slots: &Self::Slots) -> Self::Outputs {
                ($(slots.$i.lock().take().expect("child result missing"),)+)
            }
        }
    };
}

impl_tuple_spawn!((A, 0));
impl_tuple_spawn!((A, 0), (B, 1));
impl_tuple_spawn!((A, 0), (B, 1), (C, 2));
impl_tuple_spawn!((A, 0), (B, 1), (C, 2), (D, 3));
impl_tuple_spawn!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_tuple_spawn!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (G, 5));

// ---------------------------------------------------------------------------
// spawn_group / fork_group (incremental accumulation)
// ---------------------------------------------------------------------------

type BoxedChild = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A group builder that accumulates unit children before being awaited.
pub fn spawn_group() -> SpawnGroup {
    SpawnGroup {
        children: Vec::new(),
        opts: SpawnOpts::default(),
    }
}

/// Builder returned by [`spawn_group`]. Children are submitted together
/// when the group is awaited.
#[must_use = "a spawn group does nothing until awaited"]
pub struct SpawnGroup {
    children: Vec<BoxedChild>,
    opts: SpawnOpts,
}

impl SpawnGroup {
    /// Adds a child to the group.
    pub fn add(&mut self, fut: impl Future<Output = ()> + Send + 'static) {
        self.children.push(Box::pin(fut));
    }

    /// Number of accumulated children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// `true` when no children have been added.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Runs the children on `exec` instead of the submitter's executor.
    pub fn run_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.exec = Some(exec);
        self
    }

    /// Submits the children at priority `band`.
    pub fn with_priority(mut self, band: usize) -> Self {
        self.opts.prio = Some(Priority::new(band));
        self
    }
}

impl IntoFuture for SpawnGroup {
    type Output = ();
    type IntoFuture = GroupJoin;

    fn into_future(self) -> GroupJoin {
        let (exec, prio, _hint) = self.opts.resolve();
        let done = DoneGroup::new(self.children.len());
        let items: Vec<WorkItem> = self
            .children
            .into_iter()
            .map(|fut| {
                let done = Arc::clone(&done);
                let wrapper = async move {
                    if let Err(payload) = CatchUnwind::new(fut).await {
                        done.record_panic(payload);
                    }
                    done.decrement();
                };
                WorkItem::Task(TaskCore::new(wrapper, exec.clone(), prio, None))
            })
            .collect();
        schedule_batch(&exec, items, prio);
        GroupJoin { done }
    }
}

/// A group whose children start as soon as they are added.
pub fn fork_group() -> ForkGroup {
    ForkGroup {
        done: DoneGroup::new(0),
        count: AtomicUsize::new(0),
        opts: SpawnOpts::default(),
    }
}

/// Builder returned by [`fork_group`]. Call [`join`](ForkGroup::join) after
/// the last [`add`](ForkGroup::add).
pub struct ForkGroup {
    done: Arc<DoneGroup>,
    count: AtomicUsize,
    opts: SpawnOpts,
}

impl ForkGroup {
    /// Runs subsequently added children on `exec`.
    #[must_use]
    pub fn run_on(mut self, exec: ExecutorRef) -> Self {
        self.opts.exec = Some(exec);
        self
    }

    /// Submits subsequently added children at priority `band`.
    #[must_use]
    pub fn with_priority(mut self, band: usize) -> Self {
        self.opts.prio = Some(Priority::new(band));
        self
    }

    /// Submits a child immediately.
    pub fn add(&self, fut: impl Future<Output = ()> + Send + 'static) {
        let (exec, prio, _hint) = self.opts.resolve();
        self.done.add(1);
        self.count.fetch_add(1, Ordering::Relaxed);
        let done = Arc::clone(&self.done);
        let wrapper = async move {
            if let Err(payload) = CatchUnwind::new(fut).await {
                done.record_panic(payload);
            }
            done.decrement();
        };
        TaskCore::new(wrapper, exec, prio, None).schedule();
    }

    /// Number of children added so far.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// `true` when no children have been added.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once every added child has completed.
    pub fn join(self) -> GroupJoin {
        GroupJoin { done: self.done }
    }
}

/// Future joining a [`SpawnGroup`] or [`ForkGroup`].
pub struct GroupJoin {
    done: Arc<DoneGroup>,
}

impl Future for GroupJoin {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.done.poll_ready(cx) {
            Poll::Ready(()) => {
                if let Some(payload) = self.done.take_panic() {
                    resume_unwind(payload);
                }
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
