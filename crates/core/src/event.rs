// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deferred, serialized event bus.
//!
//! Grounded in `conveyor.event.EventQueue`/`Event` from the original
//! implementation: firing an event never invokes callbacks inline — it
//! enqueues `(event, args)` on a FIFO owned by a single consumer, which
//! delivers to every handler still attached *at delivery time*. A handler
//! detached between fire and delivery is skipped; one attached after fire
//! but before delivery is invoked. Shutdown is itself an enqueued closure
//! that flips a stop flag, so events queued ahead of it still get a chance
//! to deliver, and anything queued behind it does not.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Opaque attach handle. Never reused after [`Event::detach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

type Job = Box<dyn FnOnce() + Send>;

/// Single-consumer FIFO queue of deferred deliveries.
///
/// One bus per server instance (no process-wide singleton, unlike the
/// original's `geteventqueue()`); every [`Event`] is constructed against a
/// specific bus and passed it explicitly.
pub struct EventBus {
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    stopped: AtomicBool,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, job: Job) {
        self.queue.lock().push_back(job);
        self.notify.notify_one();
    }

    /// Pop and run one deferred delivery. Returns `false` if the bus is
    /// stopped or the queue is currently empty.
    pub fn run_once(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run every delivery currently queued (or until shutdown is observed),
    /// without blocking for new work. Used by tests that drive the bus
    /// synchronously ("run once", "run" in the seed scenarios).
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        ran
    }

    /// Drive the bus until [`EventBus::shutdown`] has been delivered,
    /// blocking between deliveries instead of busy-polling. Intended to run
    /// as the bus's single logical consumer task for the life of the
    /// process.
    pub async fn run_forever(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            if !self.run_once() {
                if self.stopped.load(Ordering::Acquire) {
                    return;
                }
                self.notify.notified().await;
            }
        }
    }

    /// Enqueue the synthetic shutdown event. Anything already queued ahead
    /// of it is still delivered; the consumer exits on its next iteration,
    /// leaving anything queued behind it undelivered.
    pub fn shutdown(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.enqueue(Box::new(move || {
            this.stopped.store(true, Ordering::Release);
        }));
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

struct Inner<T> {
    name: String,
    next_handle: AtomicU64,
    handlers: Mutex<HashMap<u64, Arc<dyn Fn(&T) + Send + Sync>>>,
}

/// A named, attachable notification point. Firing enqueues delivery on the
/// owning [`EventBus`]; it never invokes handlers synchronously.
pub struct Event<T> {
    inner: Arc<Inner<T>>,
    bus: Arc<EventBus>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            bus: Arc::clone(&self.bus),
        }
    }
}

impl<T: Send + 'static> Event<T> {
    pub fn new(name: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                next_handle: AtomicU64::new(1),
                handlers: Mutex::new(HashMap::new()),
            }),
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attach a callback, returning a handle usable with [`Event::detach`].
    pub fn attach(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Handle {
        let handle = self.inner.next_handle.fetch_add(1, Ordering::SeqCst);
        self.inner.handlers.lock().insert(handle, Arc::new(handler));
        Handle(handle)
    }

    /// Detach a previously attached callback. A no-op if already detached.
    pub fn detach(&self, handle: Handle) {
        self.inner.handlers.lock().remove(&handle.0);
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

impl<T: Send + 'static> Event<T> {
    /// Enqueue delivery of `args` to this event's bus. Returns immediately;
    /// the handler snapshot is taken when the bus actually delivers, not
    /// now.
    pub fn fire(&self, args: T) {
        let inner = Arc::clone(&self.inner);
        let name = inner.name.clone();
        self.bus.enqueue(Box::new(move || {
            // Snapshot under lock, then release before invoking — mirrors
            // the Server Core's broadcast discipline (§5): never hold a
            // lock across an arbitrary callback.
            let handlers: Vec<_> = inner.handlers.lock().values().cloned().collect();
            for handler in handlers {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&args)));
                if let Err(_panic) = result {
                    tracing::error!(event = %name, "event handler panicked");
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fire_deliver_detach_seed_scenario() {
        let bus = EventBus::new();
        let event: Event<()> = Event::new("e", Arc::clone(&bus));

        let c1 = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::new(AtomicUsize::new(0));
        let (c1h, c2h) = (Arc::clone(&c1), Arc::clone(&c2));
        let h1 = event.attach(move |_| {
            c1h.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = event.attach(move |_| {
            c2h.fetch_add(1, Ordering::SeqCst);
        });

        event.fire(());
        bus.drain();
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);

        event.detach(h1);
        event.fire(());
        bus.drain();
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 2);

        event.detach(h2);
        event.fire(());
        bus.drain();
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_attached_after_fire_but_before_deliver_is_invoked() {
        let bus = EventBus::new();
        let event: Event<()> = Event::new("e", Arc::clone(&bus));
        let fired = Arc::new(AtomicUsize::new(0));

        event.fire(()); // enqueued, not yet delivered

        let fired2 = Arc::clone(&fired);
        event.attach(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        bus.drain();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_detached_after_fire_but_before_deliver_is_skipped() {
        let bus = EventBus::new();
        let event: Event<()> = Event::new("e", Arc::clone(&bus));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let handle = event.attach(move |_| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        event.fire(());
        event.detach(handle);
        bus.drain();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bus_shutdown_ordering_seed_scenario() {
        let bus = EventBus::new();
        let x: Event<()> = Event::new("x", Arc::clone(&bus));
        let y: Event<()> = Event::new("y", Arc::clone(&bus));
        let x_delivered = Arc::new(AtomicUsize::new(0));
        let y_delivered = Arc::new(AtomicUsize::new(0));
        let (xd, yd) = (Arc::clone(&x_delivered), Arc::clone(&y_delivered));
        x.attach(move |_| {
            xd.fetch_add(1, Ordering::SeqCst);
        });
        y.attach(move |_| {
            yd.fetch_add(1, Ordering::SeqCst);
        });

        x.fire(());
        bus.shutdown();
        y.fire(());
        bus.drain();

        assert_eq!(x_delivered.load(Ordering::SeqCst), 1);
        assert_eq!(y_delivered.load(Ordering::SeqCst), 0);
        assert!(bus.is_stopped());
    }

    #[test]
    fn panicking_handler_does_not_abort_delivery_to_siblings() {
        let bus = EventBus::new();
        let event: Event<()> = Event::new("e", Arc::clone(&bus));
        let ok = Arc::new(AtomicUsize::new(0));
        event.attach(|_| panic!("boom"));
        let ok2 = Arc::clone(&ok);
        event.attach(move |_| {
            ok2.fetch_add(1, Ordering::SeqCst);
        });

        event.fire(());
        bus.drain();
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }
}
