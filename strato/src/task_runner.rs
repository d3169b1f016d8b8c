// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named single-thread task runners.
//!
//! The compositor's threading model is a small set of fixed, named threads
//! (UI, raster, IO) rather than a pool. A [`TaskRunner`] owns one such
//! thread and executes posted closures on it in order; delayed posts run no
//! earlier than their deadline. Cheap [`TaskRunnerHandle`]s can be cloned
//! onto any thread to post work.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::Error;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    RunAt(Instant, Task),
    Shutdown,
}

struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the BinaryHeap pops the earliest deadline first;
        // the sequence number keeps equal deadlines in post order.
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

/// A clonable, thread-safe posting endpoint for a [`TaskRunner`].
#[derive(Clone)]
pub struct TaskRunnerHandle {
    tx: mpsc::Sender<Message>,
}

impl TaskRunnerHandle {
    /// Posts `task` for execution as soon as possible.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.tx
            .send(Message::Run(Box::new(task)))
            .map_err(|_| Error::TaskRunnerShutDown)
    }

    /// Posts `task` to run once `delay` has elapsed.
    pub fn post_delayed(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), Error> {
        self.tx
            .send(Message::RunAt(Instant::now() + delay, Box::new(task)))
            .map_err(|_| Error::TaskRunnerShutDown)
    }
}

/// A dedicated thread that runs posted tasks in order.
///
/// Dropping the runner shuts the thread down after the tasks already
/// received have run; pending delayed tasks are discarded.
pub struct TaskRunner {
    handle: TaskRunnerHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl TaskRunner {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Message>();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run_loop(&rx))
            .expect("failed to spawn task runner thread");
        Self {
            handle: TaskRunnerHandle { tx },
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> TaskRunnerHandle {
        self.handle.clone()
    }

    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        self.handle.post(task)
    }

    pub fn post_delayed(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), Error> {
        self.handle.post_delayed(delay, task)
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

const IDLE_WAIT: Duration = Duration::from_millis(100);

fn run_loop(rx: &mpsc::Receiver<Message>) {
    let mut delayed: BinaryHeap<DelayedTask> = BinaryHeap::new();
    let mut seq = 0_u64;
    loop {
        let now = Instant::now();
        while delayed.peek().is_some_and(|t| t.deadline <= now) {
            let due = delayed.pop().unwrap();
            (due.task)();
        }
        let timeout = delayed
            .peek()
            .map_or(IDLE_WAIT, |t| t.deadline.saturating_duration_since(now));
        match rx.recv_timeout(timeout) {
            Ok(Message::Run(task)) => task(),
            Ok(Message::RunAt(deadline, task)) => {
                seq += 1;
                delayed.push(DelayedTask {
                    deadline,
                    seq,
                    task,
                });
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn posted_tasks_run_in_order() {
        let runner = TaskRunner::new("test.runner");
        let (tx, rx) = channel();
        for i in 0..4 {
            let tx = tx.clone();
            runner.post(move || tx.send(i).unwrap()).unwrap();
        }
        let received: Vec<_> = rx.iter().take(4).collect();
        assert_eq!(received, vec![0, 1, 2, 3]);
    }

    #[test]
    fn delayed_task_runs_after_immediate_ones() {
        let runner = TaskRunner::new("test.runner");
        let (tx, rx) = channel();
        let tx2 = tx.clone();
        runner
            .post_delayed(Duration::from_millis(30), move || tx2.send("late").unwrap())
            .unwrap();
        runner.post(move || tx.send("now").unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), "now");
        assert_eq!(rx.recv().unwrap(), "late");
    }

    #[test]
    fn handle_posts_from_another_thread() {
        let runner = TaskRunner::new("test.runner");
        let handle = runner.handle();
        let (tx, rx) = channel();
        thread::spawn(move || {
            handle.post(move || tx.send(7_u32).unwrap()).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn post_after_shutdown_errors() {
        let runner = TaskRunner::new("test.runner");
        let handle = runner.handle();
        drop(runner);
        assert!(handle.post(|| {}).is_err());
    }
}
