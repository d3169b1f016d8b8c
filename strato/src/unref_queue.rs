// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred destruction of device-bound resources.
//!
//! Device resources must die on the thread that owns the device context.
//! Any thread may hand an object to an [`UnrefQueue`]; the queue batches
//! them and schedules a single drain on the owning thread's
//! [`TaskRunner`](crate::task_runner::TaskRunner) after a short delay, so a
//! burst of releases costs one task rather than many.

use std::any::Any;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::canvas::ResourceContext;
use crate::task_runner::TaskRunnerHandle;

type DeferredObject = Box<dyn Any + Send>;

struct State {
    objects: Vec<DeferredObject>,
    drain_pending: bool,
}

struct Inner {
    state: Mutex<State>,
    task_runner: TaskRunnerHandle,
    drain_delay: Duration,
    context: Option<Arc<dyn ResourceContext>>,
}

/// Collects objects for destruction on the context-owning thread.
#[derive(Clone)]
pub struct UnrefQueue {
    inner: Arc<Inner>,
}

impl UnrefQueue {
    /// Creates a queue draining on `task_runner` after `drain_delay`.
    ///
    /// When `context` is given, every drain ends with
    /// [`ResourceContext::perform_deferred_cleanup`] so the context can
    /// reclaim whatever the drops released.
    pub fn new(
        task_runner: TaskRunnerHandle,
        drain_delay: Duration,
        context: Option<Arc<dyn ResourceContext>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    objects: Vec::new(),
                    drain_pending: false,
                }),
                task_runner,
                drain_delay,
                context,
            }),
        }
    }

    /// Queues `object` for destruction and schedules a drain if none is
    /// already pending.
    pub fn unref(&self, object: DeferredObject) {
        let schedule = {
            let mut state = self.inner.state.lock().unwrap();
            state.objects.push(object);
            !mem::replace(&mut state.drain_pending, true)
        };
        if schedule {
            let queue = self.clone();
            let posted = self
                .inner
                .task_runner
                .post_delayed(self.inner.drain_delay, move || queue.drain());
            if posted.is_err() {
                // Runner gone during teardown; drop in place instead of
                // leaking.
                log::warn!("unref queue task runner is gone, draining inline");
                self.drain();
            }
        }
    }

    /// Drops every queued object, then lets the context clean up.
    ///
    /// Normally runs as the scheduled task but may be called directly, e.g.
    /// right before the context is torn down. Each object is dropped exactly
    /// once regardless of how drains interleave.
    pub fn drain(&self) {
        let objects = {
            let mut state = self.inner.state.lock().unwrap();
            state.drain_pending = false;
            mem::take(&mut state.objects)
        };
        if objects.is_empty() {
            return;
        }
        log::trace!("draining {} deferred objects", objects.len());
        drop(objects);
        if let Some(context) = &self.inner.context {
            context.perform_deferred_cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareContext;
    use crate::task_runner::TaskRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drain_drops_everything_exactly_once() {
        let runner = TaskRunner::new("test.io");
        let queue = UnrefQueue::new(runner.handle(), Duration::from_secs(10), None);
        let drops = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            queue.unref(Box::new(DropCounter(drops.clone())));
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        queue.drain();
        assert_eq!(drops.load(Ordering::SeqCst), 5);
        queue.drain();
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn scheduled_drain_runs_on_the_task_runner() {
        let runner = TaskRunner::new("test.io");
        let queue = UnrefQueue::new(runner.handle(), Duration::from_millis(10), None);
        let drops = Arc::new(AtomicUsize::new(0));
        queue.unref(Box::new(DropCounter(drops.clone())));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while drops.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "drain never ran");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_unrefs_all_drop_once() {
        let runner = TaskRunner::new("test.io");
        let queue = UnrefQueue::new(runner.handle(), Duration::from_millis(1), None);
        let drops = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let drops = drops.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        queue.unref(Box::new(DropCounter(drops.clone())));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        queue.drain();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while drops.load(Ordering::SeqCst) < 200 {
            assert!(std::time::Instant::now() < deadline, "missing drops");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(drops.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn drain_notifies_the_resource_context() {
        let runner = TaskRunner::new("test.io");
        let context = Arc::new(SoftwareContext::new());
        let queue = UnrefQueue::new(
            runner.handle(),
            Duration::from_secs(10),
            Some(context.clone() as Arc<dyn ResourceContext>),
        );
        queue.unref(Box::new(42_u32));
        queue.drain();
        assert_eq!(context.cleanup_count(), 1);
    }
}
