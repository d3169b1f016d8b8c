// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The depth-limited queue between frame production and rasterization.
//!
//! A [`Pipeline`] lets the UI side build at most `depth` frames ahead of
//! the raster side. Production is a two-step handshake: [`Pipeline::produce`]
//! reserves a slot (or refuses, which is how frames get dropped under
//! backpressure), and the returned [`ProducerContinuation`] delivers the
//! finished item. Consumption never blocks; an optional frame notifier wakes
//! the consumer when an item arrives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Default number of frames the UI side may run ahead of the raster side.
pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

type FrameNotifier = Box<dyn Fn() + Send + Sync>;

struct Shared<T> {
    depth: usize,
    empty_slots: AtomicUsize,
    // Slots owed by front requeues; each one cancels a release in `consume`.
    requeues: AtomicUsize,
    queue: Mutex<VecDeque<T>>,
    notifier: Mutex<Option<FrameNotifier>>,
}

/// Outcome of a [`Pipeline::consume`] call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PipelineConsumeResult {
    /// No item was queued.
    NoneAvailable,
    /// One item was consumed and the queue is now empty.
    Done,
    /// One item was consumed and at least one more is waiting.
    MoreAvailable,
}

/// A reserved slot waiting for its item.
///
/// Completing delivers the item to the consumer side. Dropping an
/// uncompleted continuation returns the slot to the pipeline so the next
/// frame is not starved by an abandoned one.
pub struct ProducerContinuation<T> {
    shared: Option<Arc<Shared<T>>>,
    to_front: bool,
}

impl<T> ProducerContinuation<T> {
    /// Delivers `item` and wakes the consumer. Returns whether the item was
    /// enqueued.
    pub fn complete(mut self, item: T) -> bool {
        let Some(shared) = self.shared.take() else {
            return false;
        };
        {
            let mut queue = shared.queue.lock().unwrap();
            if self.to_front {
                queue.push_front(item);
            } else {
                queue.push_back(item);
            }
        }
        if let Some(notify) = shared.notifier.lock().unwrap().as_ref() {
            notify();
        }
        true
    }
}

impl<T> Drop for ProducerContinuation<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            log::warn!("frame slot abandoned without a frame; recycling it");
            if self.to_front {
                shared.requeues.fetch_sub(1, Ordering::AcqRel);
            } else {
                shared.empty_slots.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

/// A bounded FIFO handing produced items to a consumer, cloneable across
/// threads.
pub struct Pipeline<T> {
    shared: Arc<Shared<T>>,
}

// The frame queue is the UI/raster thread boundary.
static_assertions::assert_impl_all!(Pipeline<crate::layer::LayerTree>: Send, Sync);

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Pipeline<T> {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "pipeline depth must be at least 1");
        Self {
            shared: Arc::new(Shared {
                depth,
                empty_slots: AtomicUsize::new(depth),
                requeues: AtomicUsize::new(0),
                queue: Mutex::new(VecDeque::with_capacity(depth)),
                notifier: Mutex::new(None),
            }),
        }
    }

    pub fn depth(&self) -> usize {
        self.shared.depth
    }

    /// Installs the callback invoked whenever an item is completed.
    pub fn set_frame_notifier(&self, notifier: FrameNotifier) {
        *self.shared.notifier.lock().unwrap() = Some(notifier);
    }

    /// Reserves a slot at the back of the queue.
    ///
    /// Returns `None` when the pipeline is full; the caller should drop the
    /// frame rather than wait.
    pub fn produce(&self) -> Option<ProducerContinuation<T>> {
        let slots = &self.shared.empty_slots;
        let mut available = slots.load(Ordering::Acquire);
        loop {
            if available == 0 {
                log::trace!("pipeline full ({} deep), dropping frame", self.shared.depth);
                return None;
            }
            match slots.compare_exchange_weak(
                available,
                available - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ProducerContinuation {
                        shared: Some(self.shared.clone()),
                        to_front: false,
                    });
                }
                Err(seen) => available = seen,
            }
        }
    }

    /// Reserves a slot at the front of the queue, bypassing the depth limit.
    ///
    /// Used to requeue an item the consumer could not finish; it must run
    /// before anything produced later, and refusing it would lose the frame.
    /// The slot the consumed item held funds the requeue: `consume` skips one
    /// release per outstanding requeue, so `empty_slots` never moves here and
    /// cannot underflow when the pipeline is already full.
    pub fn produce_to_front(&self) -> ProducerContinuation<T> {
        self.shared.requeues.fetch_add(1, Ordering::AcqRel);
        ProducerContinuation {
            shared: Some(self.shared.clone()),
            to_front: true,
        }
    }

    /// Pops the oldest item, if any, and hands it to `consumer`.
    ///
    /// After `consumer` returns, the item's slot is either released or, when
    /// the consumer requeued via [`Self::produce_to_front`], kept to back the
    /// requeued item so the depth limit holds across requeues.
    pub fn consume<R>(&self, consumer: impl FnOnce(T) -> R) -> PipelineConsumeResult {
        let item = self.shared.queue.lock().unwrap().pop_front();
        let Some(item) = item else {
            return PipelineConsumeResult::NoneAvailable;
        };
        consumer(item);
        self.release_consumed_slot();
        if self.shared.queue.lock().unwrap().is_empty() {
            PipelineConsumeResult::Done
        } else {
            PipelineConsumeResult::MoreAvailable
        }
    }

    fn release_consumed_slot(&self) {
        let requeues = &self.shared.requeues;
        let mut owed = requeues.load(Ordering::Acquire);
        loop {
            if owed == 0 {
                self.shared.empty_slots.fetch_add(1, Ordering::AcqRel);
                return;
            }
            match requeues.compare_exchange_weak(
                owed,
                owed - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(seen) => owed = seen,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::thread;

    #[test]
    fn third_produce_is_refused_at_depth_two() {
        let pipeline = Pipeline::<u32>::new(2);
        let a = pipeline.produce().unwrap();
        let b = pipeline.produce().unwrap();
        assert!(pipeline.produce().is_none());
        a.complete(1);
        b.complete(2);
        assert!(pipeline.produce().is_none());
    }

    #[test]
    fn consuming_frees_a_slot() {
        let pipeline = Pipeline::<u32>::new(1);
        pipeline.produce().unwrap().complete(5);
        assert!(pipeline.produce().is_none());
        let mut seen = None;
        assert_eq!(
            pipeline.consume(|v| seen = Some(v)),
            PipelineConsumeResult::Done
        );
        assert_eq!(seen, Some(5));
        assert!(pipeline.produce().is_some());
    }

    #[test]
    fn items_come_out_in_fifo_order() {
        let pipeline = Pipeline::<u32>::new(2);
        pipeline.produce().unwrap().complete(1);
        pipeline.produce().unwrap().complete(2);
        let mut out = Vec::new();
        assert_eq!(
            pipeline.consume(|v| out.push(v)),
            PipelineConsumeResult::MoreAvailable
        );
        assert_eq!(
            pipeline.consume(|v| out.push(v)),
            PipelineConsumeResult::Done
        );
        assert_eq!(out, vec![1, 2]);
        assert_eq!(
            pipeline.consume(|_| ()),
            PipelineConsumeResult::NoneAvailable
        );
    }

    #[test]
    fn dropped_continuation_recycles_its_slot() {
        let pipeline = Pipeline::<u32>::new(1);
        drop(pipeline.produce().unwrap());
        assert!(pipeline.produce().is_some());
    }

    #[test]
    fn produce_to_front_jumps_the_queue() {
        let pipeline = Pipeline::<u32>::new(2);
        pipeline.produce().unwrap().complete(1);
        pipeline.produce_to_front().complete(9);
        let mut out = Vec::new();
        pipeline.consume(|v| out.push(v));
        pipeline.consume(|v| out.push(v));
        assert_eq!(out, vec![9, 1]);
    }

    #[test]
    fn requeue_while_full_keeps_backpressure() {
        let pipeline = Pipeline::<u32>::new(2);
        pipeline.produce().unwrap().complete(1);
        pipeline.produce().unwrap().complete(2);
        pipeline.consume(|v| {
            assert_eq!(v, 1);
            pipeline.produce_to_front().complete(9);
            assert!(pipeline.produce().is_none());
        });
        assert!(pipeline.produce().is_none());
        let mut out = Vec::new();
        while pipeline.consume(|v| out.push(v)) != PipelineConsumeResult::NoneAvailable {}
        assert_eq!(out, vec![9, 2]);
        let a = pipeline.produce();
        assert!(a.is_some());
        let b = pipeline.produce();
        assert!(b.is_some());
        assert!(pipeline.produce().is_none());
    }

    #[test]
    fn notifier_fires_on_completion() {
        let pipeline = Pipeline::<u32>::new(2);
        let (tx, rx) = channel();
        pipeline.set_frame_notifier(Box::new(move || tx.send(()).unwrap()));
        pipeline.produce().unwrap().complete(1);
        rx.recv().unwrap();
    }

    #[test]
    fn produce_and_consume_across_threads() {
        let pipeline = Pipeline::<u32>::new(2);
        let producer = pipeline.clone();
        let (tx, rx) = channel();
        pipeline.set_frame_notifier(Box::new(move || tx.send(()).unwrap()));

        let handle = thread::spawn(move || {
            let mut produced = 0;
            for i in 0..100_u32 {
                if let Some(cont) = producer.produce() {
                    cont.complete(i);
                    produced += 1;
                }
                thread::yield_now();
            }
            produced
        });

        let mut consumed = 0;
        loop {
            match pipeline.consume(|_| ()) {
                PipelineConsumeResult::NoneAvailable => {
                    if handle.is_finished() {
                        break;
                    }
                    let _ = rx.recv_timeout(std::time::Duration::from_millis(10));
                }
                _ => consumed += 1,
            }
        }
        let produced = handle.join().unwrap();
        // Drain anything completed after the last check.
        while pipeline.consume(|_| ()) != PipelineConsumeResult::NoneAvailable {
            consumed += 1;
        }
        assert_eq!(consumed, produced);
    }
}
