//! Process-wide default executor: `spawn` from a non-worker thread lands
//! on it. Kept in its own test binary because the default is global.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tachyon::{CpuExecutor, ExecutorRef, default_executor, set_default_executor, spawn};

#[test]
fn spawn_from_host_thread_uses_default() {
    let ex = CpuExecutor::builder().name("default").thread_count(2).build();
    set_default_executor(Arc::clone(&ex) as ExecutorRef);
    assert!(default_executor().is_some());

    // No current executor on this thread: the default carries the spawn.
    let handle = spawn(async {
        std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_default()
    })
    .fork();

    // Block on the fork from the host side.
    let name = tachyon::block_on(handle);
    assert!(name.starts_with("default-"), "ran on {name:?}");

    // Detached spawns from the host work the same way.
    let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let f2 = Arc::clone(&flag);
    spawn(async move {
        f2.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .detach();
    let start = Instant::now();
    while !flag.load(std::sync::atomic::Ordering::SeqCst) {
        assert!(start.elapsed() < Duration::from_secs(10), "detached spawn lost");
        std::thread::sleep(Duration::from_millis(1));
    }
    ex.teardown();
}
