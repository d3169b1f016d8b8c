// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred resource release across threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strato::{ResourceContext, SoftwareContext, TaskRunner, UnrefQueue};
use strato_tests::init_logging;

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(deadline_msg: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting: {deadline_msg}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn objects_from_many_threads_drop_exactly_once() {
    init_logging();
    let runner = TaskRunner::new("io.runner");
    let context = Arc::new(SoftwareContext::new());
    let queue = UnrefQueue::new(
        runner.handle(),
        Duration::from_millis(5),
        Some(context.clone() as Arc<dyn ResourceContext>),
    );
    let drops = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            let drops = drops.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    queue.unref(Box::new(DropCounter(drops.clone())));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // The scheduled drain picks up everything; a manual drain sweeps any
    // stragglers queued after it ran. Either way the count ends exact.
    queue.drain();
    wait_until("all drops", || drops.load(Ordering::SeqCst) == 800);
    assert_eq!(drops.load(Ordering::SeqCst), 800);
    assert!(context.cleanup_count() >= 1);
}

#[test]
fn drain_before_teardown_releases_everything_inline() {
    init_logging();
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let runner = TaskRunner::new("io.runner");
        let queue = UnrefQueue::new(runner.handle(), Duration::from_secs(60), None);
        queue.unref(Box::new(DropCounter(drops.clone())));
        queue.unref(Box::new(DropCounter(drops.clone())));
        queue.drain();
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}
