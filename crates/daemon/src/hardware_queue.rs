// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-consumer FIFO of closures targeting process-wide hardware
//! resources (§4.D), e.g. the s3g driver's shared file writer that isn't
//! safe to invoke from multiple [`crate::device_worker::DeviceWorker`]s
//! concurrently. Mirrors [`conveyor_core::EventBus`]'s deferred-queue shape,
//! minus the per-event handler snapshot — here there's exactly one
//! consumer and each closure runs to completion before the next starts.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

type Job = Box<dyn FnOnce() + Send>;

pub struct HardwareQueue {
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    stopped: AtomicBool,
}

impl HardwareQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Append a closure, preserving submission order (§5 "Hardware Queue
    /// preserves producer-submission FIFO").
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.queue.lock().push_back(Box::new(job));
        self.notify.notify_one();
    }

    fn run_once(&self) -> bool {
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("hardware queue closure panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Drive the queue until [`HardwareQueue::stop`]. Queued-but-unstarted
    /// closures after stop are discarded (§4.D).
    pub async fn run_forever(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                self.queue.lock().clear();
                return;
            }
            if !self.run_once() {
                if self.stopped.load(Ordering::Acquire) {
                    self.queue.lock().clear();
                    return;
                }
                self.notify.notified().await;
            }
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Run every job currently queued without blocking for more. Used by
    /// tests that drive the queue synchronously instead of spawning
    /// `run_forever`.
    pub(crate) fn drain(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;

    #[test]
    fn submissions_run_in_fifo_order() {
        let queue = HardwareQueue::new();
        let order = Arc::new(PMutex::new(Vec::new()));
        let (o1, o2) = (Arc::clone(&order), Arc::clone(&order));
        queue.submit(move || o1.lock().push("a"));
        queue.submit(move || o2.lock().push("b"));
        queue.drain();
        assert_eq!(*order.lock(), vec!["a", "b"]);
    }

    #[test]
    fn a_panicking_closure_does_not_abort_the_consumer() {
        let queue = HardwareQueue::new();
        let ran = Arc::new(PMutex::new(false));
        queue.submit(|| panic!("boom"));
        let ran2 = Arc::clone(&ran);
        queue.submit(move || *ran2.lock() = true);
        queue.drain();
        assert!(*ran.lock());
    }
}
