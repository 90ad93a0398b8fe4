//! Panic propagation: a child's panic is rethrown at the join point, and
//! only there.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tachyon::{CpuExecutor, ExecutorRef, Priority, post_waitable, spawn, spawn_many, spawn_tuple};

#[test]
fn child_panic_rethrown_at_await() {
    let ex = CpuExecutor::builder().name("exc-await").thread_count(2).build();
    let exec: ExecutorRef = Arc::clone(&ex) as ExecutorRef;
    let caught = post_waitable(
        &exec,
        async {
            // The panic crosses from the child task to this await.
            let handle = spawn(async { panic!("child exploded") }).fork();
            handle.await
        },
        Priority::HIGHEST,
    );
    let err = catch_unwind(AssertUnwindSafe(|| caught.wait())).expect_err("panic must surface");
    assert_eq!(err.downcast_ref::<&str>(), Some(&"child exploded"));
    ex.teardown();
}

#[test]
fn sibling_results_unaffected_until_join() {
    let ex = CpuExecutor::builder().name("exc-sibling").thread_count(2).build();
    let exec: ExecutorRef = Arc::clone(&ex) as ExecutorRef;
    let completed = Arc::new(AtomicUsize::new(0));

    let c2 = Arc::clone(&completed);
    let handle = post_waitable(
        &exec,
        async move {
            spawn_many((0..4u32).map(|i| {
                let c = Arc::clone(&c2);
                async move {
                    if i == 2 {
                        panic!("one of many failed");
                    }
                    c.fetch_add(1, Ordering::SeqCst);
                    i
                }
            }))
            .await
        },
        Priority::HIGHEST,
    );
    let err = catch_unwind(AssertUnwindSafe(|| handle.wait())).expect_err("panic must surface");
    assert_eq!(err.downcast_ref::<&str>(), Some(&"one of many failed"));
    // The healthy siblings still ran to completion.
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    ex.teardown();
}

#[test]
fn tuple_panic_rethrown_at_join() {
    let ex = CpuExecutor::builder().name("exc-tuple").thread_count(2).build();
    let exec: ExecutorRef = Arc::clone(&ex) as ExecutorRef;
    let handle = post_waitable(
        &exec,
        async {
            let (a, b) = spawn_tuple((async { 1u32 }, async { panic!("tuple half") })).await;
            let _: u32 = a;
            let _: () = b;
        },
        Priority::HIGHEST,
    );
    let err = catch_unwind(AssertUnwindSafe(|| handle.wait())).expect_err("panic must surface");
    assert_eq!(err.downcast_ref::<&str>(), Some(&"tuple half"));
    ex.teardown();
}

#[test]
fn panic_does_not_kill_the_worker() {
    let ex = CpuExecutor::builder().name("exc-alive").thread_count(1).build();
    let exec: ExecutorRef = Arc::clone(&ex) as ExecutorRef;

    let failing = post_waitable(&exec, async { panic!("transient") }, Priority::HIGHEST);
    let _ = catch_unwind(AssertUnwindSafe(|| failing.wait()));

    // The sole worker survived the panic and still serves work.
    let ok = post_waitable(&exec, async { 11u32 }, Priority::HIGHEST).wait();
    assert_eq!(ok, 11);
    ex.teardown();
}
