// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The [`Task`] state machine: the primitive used to model every
//! asynchronous unit of work (slice, print, firmware upload, EEPROM
//! read, …) and its composition into pipelines.
//!
//! Grounded in spec §3/§4.B; no literal Python `task.py` survived in the
//! original source tree, so the event names (`startevent`, `runningevent`,
//! `heartbeatevent`, `stoppedevent`) are inferred from their call sites in
//! `conveyor/server/__init__.py` (e.g. `task.runningevent.attach(...)`) and
//! the state/conclusion contract is taken directly from the specification.

use crate::error::Failure;
use crate::event::{Event, EventBus, Handle};
use crate::simple_display;
use parking_lot::Mutex;
use std::sync::Arc;

/// A task's lifecycle state. Transitions are monotonic on the partial order
/// `PENDING -> RUNNING -> STOPPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Pending,
    Running,
    Stopped,
}

simple_display! {
    State {
        Pending => "PENDING",
        Running => "RUNNING",
        Stopped => "STOPPED",
    }
}

/// Terminal classification of a stopped task. `None` until `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conclusion {
    None,
    Ended,
    Failed,
    Canceled,
}

simple_display! {
    Conclusion {
        None => "NONE",
        Ended => "ENDED",
        Failed => "FAILED",
        Canceled => "CANCELED",
    }
}

/// A task's progress payload: either a bare numeric percentage, or — for a
/// parent driving a pipeline — the currently active child task, whose own
/// progress is numeric. This is what lets a pipeline's `heartbeatevent`
/// carry "the child" as `task.progress` per §4.B/§4.I.
pub enum Progress<R> {
    Percent(f64),
    Child(Task<R>),
}

impl<R> Clone for Progress<R> {
    fn clone(&self) -> Self {
        match self {
            Progress::Percent(p) => Progress::Percent(*p),
            Progress::Child(t) => Progress::Child(t.clone()),
        }
    }
}

struct Shared<R> {
    state: Mutex<State>,
    conclusion: Mutex<Conclusion>,
    progress: Mutex<Option<Progress<R>>>,
    result: Mutex<Option<R>>,
    failure: Mutex<Option<Failure>>,
    /// Guards against firing `runningevent` more than once.
    running_fired: Mutex<bool>,
}

/// A cheaply-cloned handle onto one asynchronous unit of work.
///
/// Every clone shares the same underlying state and events — a `Task` is
/// passed around (including as the payload of its own events) the way an Id
/// would be, except it also carries behavior.
pub struct Task<R> {
    inner: Arc<Shared<R>>,
    pub startevent: Event<Task<R>>,
    pub runningevent: Event<Task<R>>,
    pub heartbeatevent: Event<Task<R>>,
    pub stoppedevent: Event<Task<R>>,
    cancelevent: Event<Task<R>>,
}

impl<R: Clone + Send + 'static> std::fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.startevent.name().trim_end_matches(".start"))
            .field("state", &self.state())
            .field("conclusion", &self.conclusion())
            .finish()
    }
}

impl<R> Clone for Task<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            startevent: self.startevent.clone(),
            runningevent: self.runningevent.clone(),
            heartbeatevent: self.heartbeatevent.clone(),
            stoppedevent: self.stoppedevent.clone(),
            cancelevent: self.cancelevent.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> Task<R> {
    pub fn new(name: impl Into<String>, bus: Arc<EventBus>) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State::Pending),
                conclusion: Mutex::new(Conclusion::None),
                progress: Mutex::new(None),
                result: Mutex::new(None),
                failure: Mutex::new(None),
                running_fired: Mutex::new(false),
            }),
            startevent: Event::new(format!("{name}.start"), Arc::clone(&bus)),
            runningevent: Event::new(format!("{name}.running"), Arc::clone(&bus)),
            heartbeatevent: Event::new(format!("{name}.heartbeat"), Arc::clone(&bus)),
            stoppedevent: Event::new(format!("{name}.stopped"), Arc::clone(&bus)),
            cancelevent: Event::new(format!("{name}.cancel"), bus),
        }
    }

    pub fn state(&self) -> State {
        *self.inner.state.lock()
    }

    pub fn conclusion(&self) -> Conclusion {
        *self.inner.conclusion.lock()
    }

    pub fn progress(&self) -> Option<Progress<R>> {
        self.inner.progress.lock().clone()
    }

    pub fn result(&self) -> Option<R> {
        self.inner.result.lock().clone()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.failure.lock().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state() == State::Stopped
    }

    /// Observe the internal cancel signal. Producers (pipeline steps,
    /// device drivers, slicer wrappers) attach here to unwind their
    /// external resource when the task is canceled.
    pub fn on_cancel(&self, handler: impl Fn(&Task<R>) + Send + Sync + 'static) -> Handle {
        self.cancelevent.attach(handler)
    }

    /// `PENDING -> RUNNING`; fires `startevent`. Illegal-state calls are
    /// logged and silently ignored (never raise), per §4.B.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if *state != State::Pending {
            tracing::warn!(task = self.startevent.name(), ?state, "start on non-pending task");
            return;
        }
        *state = State::Running;
        drop(state);
        self.startevent.fire(self.clone());
        self.fire_running_once();
    }

    /// Fires `runningevent` exactly once, immediately after `startevent`,
    /// so observers attached between start and the first heartbeat still
    /// see it.
    fn fire_running_once(&self) {
        let mut fired = self.inner.running_fired.lock();
        if *fired {
            return;
        }
        *fired = true;
        drop(fired);
        self.runningevent.fire(self.clone());
    }

    /// Requires `RUNNING`; stores `progress`; fires `heartbeatevent`.
    pub fn heartbeat(&self, progress: Progress<R>) {
        if self.state() != State::Running {
            tracing::warn!(task = self.heartbeatevent.name(), "heartbeat on non-running task");
            return;
        }
        *self.inner.progress.lock() = Some(progress);
        self.heartbeatevent.fire(self.clone());
    }

    /// `RUNNING -> STOPPED` with conclusion `ENDED`; stores `result`; fires
    /// `stoppedevent`.
    pub fn end(&self, result: R) {
        if !self.stop(Conclusion::Ended) {
            return;
        }
        *self.inner.result.lock() = Some(result);
        self.stoppedevent.fire(self.clone());
    }

    /// `{PENDING, RUNNING} -> STOPPED` with conclusion `FAILED`; stores the
    /// structured failure; fires `stoppedevent`.
    pub fn fail(&self, failure: Failure) {
        if !self.stop(Conclusion::Failed) {
            return;
        }
        *self.inner.failure.lock() = Some(failure);
        self.stoppedevent.fire(self.clone());
    }

    /// Any non-terminal state -> fires `cancelevent`, then transitions to
    /// `STOPPED` with conclusion `CANCELED`, then fires `stoppedevent`.
    /// Idempotent: a second `cancel()` after the task is already stopped is
    /// a silent no-op.
    pub fn cancel(&self) {
        if self.is_terminal() {
            return;
        }
        self.cancelevent.fire(self.clone());
        if !self.stop(Conclusion::Canceled) {
            return;
        }
        self.stoppedevent.fire(self.clone());
    }

    /// Transition to `STOPPED` with the given conclusion if not already
    /// terminal. Returns whether the transition happened.
    fn stop(&self, conclusion: Conclusion) -> bool {
        let mut state = self.inner.state.lock();
        if *state == State::Stopped {
            return false;
        }
        *state = State::Stopped;
        drop(state);
        *self.inner.conclusion.lock() = conclusion;
        true
    }
}

/// Compose a sequence of child tasks into a single parent [`Task`].
///
/// Starting the parent starts the first child; each child's `ENDED`
/// `stoppedevent` starts the next; the last child's `ENDED` ends the
/// parent with that child's result. A child's `FAILED`/`CANCELED`
/// propagates the same conclusion and failure to the parent. Canceling the
/// parent forwards cancel to whichever child is currently active.
pub fn pipeline<R: Clone + Send + 'static>(
    name: impl Into<String>,
    bus: Arc<EventBus>,
    steps: Vec<Task<R>>,
) -> Task<R> {
    let parent = Task::new(name, Arc::clone(&bus));
    assert!(!steps.is_empty(), "pipeline requires at least one step");

    let active = Arc::new(Mutex::new(0usize));

    // Wire every step's heartbeat to the parent's, and every step's
    // stoppedevent to advance/finish/fail/cancel the parent.
    for (i, step) in steps.iter().enumerate() {
        let parent_for_heartbeat = parent.clone();
        let step_for_heartbeat = step.clone();
        step.heartbeatevent.attach(move |_| {
            parent_for_heartbeat.heartbeat(Progress::Child(step_for_heartbeat.clone()));
        });

        let parent_for_stop = parent.clone();
        let steps_for_stop = steps.clone();
        let active_for_stop = Arc::clone(&active);
        step.stoppedevent.attach(move |stopped_step| {
            match stopped_step.conclusion() {
                Conclusion::Ended => {
                    let next = i + 1;
                    if next < steps_for_stop.len() {
                        *active_for_stop.lock() = next;
                        steps_for_stop[next].start();
                    } else if let Some(result) = stopped_step.result() {
                        parent_for_stop.end(result);
                    }
                }
                Conclusion::Failed => {
                    if let Some(failure) = stopped_step.failure() {
                        parent_for_stop.fail(failure);
                    }
                }
                Conclusion::Canceled => {
                    // Parent-initiated cancel already drives its own
                    // transition; this covers a child canceling itself.
                    if parent_for_stop.state() != State::Stopped {
                        parent_for_stop.cancel();
                    }
                }
                Conclusion::None => unreachable!("stoppedevent implies a terminal conclusion"),
            }
        });
    }

    let first = steps[0].clone();
    parent.startevent.attach(move |_| {
        first.start();
    });

    let steps_for_cancel = steps.clone();
    let active_for_cancel = active;
    parent.on_cancel(move |_| {
        let idx = *active_for_cancel.lock();
        steps_for_cancel[idx].cancel();
    });

    parent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Arc<EventBus> {
        EventBus::new()
    }

    #[yare::parameterized(
        pending = { State::Pending, "PENDING" },
        running = { State::Running, "RUNNING" },
        stopped = { State::Stopped, "STOPPED" },
    )]
    fn state_display_matches_wire_form(state: State, expected: &str) {
        assert_eq!(state.to_string(), expected);
    }

    #[yare::parameterized(
        none = { Conclusion::None, "NONE" },
        ended = { Conclusion::Ended, "ENDED" },
        failed = { Conclusion::Failed, "FAILED" },
        canceled = { Conclusion::Canceled, "CANCELED" },
    )]
    fn conclusion_display_matches_wire_form(conclusion: Conclusion, expected: &str) {
        assert_eq!(conclusion.to_string(), expected);
    }

    proptest::proptest! {
        #[test]
        fn state_serde_roundtrips(state in proptest::prop_oneof![
            proptest::prelude::Just(State::Pending),
            proptest::prelude::Just(State::Running),
            proptest::prelude::Just(State::Stopped),
        ]) {
            let json = serde_json::to_string(&state).unwrap();
            let parsed: State = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(state, parsed);
        }

        #[test]
        fn conclusion_serde_roundtrips(conclusion in proptest::prop_oneof![
            proptest::prelude::Just(Conclusion::None),
            proptest::prelude::Just(Conclusion::Ended),
            proptest::prelude::Just(Conclusion::Failed),
            proptest::prelude::Just(Conclusion::Canceled),
        ]) {
            let json = serde_json::to_string(&conclusion).unwrap();
            let parsed: Conclusion = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(conclusion, parsed);
        }
    }

    #[test]
    fn start_fires_start_then_running_once() {
        let bus = bus();
        let task: Task<()> = Task::new("t", Arc::clone(&bus));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2) = (Arc::clone(&order), Arc::clone(&order));
        task.startevent.attach(move |_| o1.lock().push("start"));
        task.runningevent.attach(move |_| o2.lock().push("running"));

        task.start();
        bus.drain();

        assert_eq!(*order.lock(), vec!["start", "running"]);
        assert_eq!(task.state(), State::Running);
    }

    #[test]
    fn heartbeat_requires_running() {
        let bus = bus();
        let task: Task<()> = Task::new("t", Arc::clone(&bus));
        let fired = Arc::new(Mutex::new(false));
        let f2 = Arc::clone(&fired);
        task.heartbeatevent.attach(move |_| *f2.lock() = true);

        task.heartbeat(Progress::Percent(0.5)); // PENDING: ignored
        bus.drain();
        assert!(!*fired.lock());

        task.start();
        bus.drain();
        task.heartbeat(Progress::Percent(0.5));
        bus.drain();
        assert!(*fired.lock());
    }

    #[test]
    fn end_is_idempotent_and_emits_exactly_one_stoppedevent() {
        let bus = bus();
        let task: Task<u32> = Task::new("t", Arc::clone(&bus));
        let count = Arc::new(Mutex::new(0));
        let c2 = Arc::clone(&count);
        task.stoppedevent.attach(move |_| *c2.lock() += 1);

        task.start();
        bus.drain();
        task.end(7);
        bus.drain();
        task.end(9); // already stopped: no-op
        bus.drain();
        task.cancel(); // already stopped: no-op
        bus.drain();

        assert_eq!(*count.lock(), 1);
        assert_eq!(task.conclusion(), Conclusion::Ended);
        assert_eq!(task.result(), Some(7));
    }

    #[test]
    fn cancel_is_idempotent() {
        let bus = bus();
        let task: Task<()> = Task::new("t", Arc::clone(&bus));
        let count = Arc::new(Mutex::new(0));
        let c2 = Arc::clone(&count);
        task.stoppedevent.attach(move |_| *c2.lock() += 1);

        task.start();
        bus.drain();
        task.cancel();
        bus.drain();
        task.cancel();
        bus.drain();

        assert_eq!(*count.lock(), 1);
        assert_eq!(task.conclusion(), Conclusion::Canceled);
    }

    #[test]
    fn pipeline_advances_sequentially_and_ends_on_last_child() {
        let bus = bus();
        let steps: Vec<Task<u32>> = vec![
            Task::new("step1", Arc::clone(&bus)),
            Task::new("step2", Arc::clone(&bus)),
        ];
        let parent = pipeline("parent", Arc::clone(&bus), steps.clone());

        parent.start();
        bus.drain();
        assert_eq!(steps[0].state(), State::Running);

        steps[0].end(1);
        bus.drain();
        assert_eq!(steps[1].state(), State::Running);
        assert_eq!(parent.state(), State::Running);

        steps[1].end(2);
        bus.drain();
        assert_eq!(parent.state(), State::Stopped);
        assert_eq!(parent.conclusion(), Conclusion::Ended);
        assert_eq!(parent.result(), Some(2));
    }

    #[test]
    fn pipeline_propagates_child_failure_to_parent() {
        let bus = bus();
        let steps: Vec<Task<u32>> = vec![
            Task::new("step1", Arc::clone(&bus)),
            Task::new("step2", Arc::clone(&bus)),
        ];
        let parent = pipeline("parent", Arc::clone(&bus), steps.clone());

        parent.start();
        bus.drain();
        steps[0].fail(Failure::new("SlicerFailure", "bad gcode"));
        bus.drain();

        assert_eq!(parent.conclusion(), Conclusion::Failed);
        assert_eq!(parent.failure().unwrap().name, "SlicerFailure");
        assert_eq!(steps[1].state(), State::Pending); // never started
    }

    #[test]
    fn pipeline_cancel_forwards_to_active_child() {
        let bus = bus();
        let steps: Vec<Task<u32>> = vec![
            Task::new("step1", Arc::clone(&bus)),
            Task::new("step2", Arc::clone(&bus)),
        ];
        let parent = pipeline("parent", Arc::clone(&bus), steps.clone());

        parent.start();
        bus.drain();
        parent.cancel();
        bus.drain();

        assert_eq!(steps[0].conclusion(), Conclusion::Canceled);
        assert_eq!(parent.conclusion(), Conclusion::Canceled);
    }
}
