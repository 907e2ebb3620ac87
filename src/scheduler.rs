// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler core: task storage, the timed queue, the paused table, and
//! the run loop that ties them to a [`Driver`].

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet, BinaryHeap};
#[cfg(feature = "debug")]
use alloc::collections::VecDeque;
use core::time::Duration;

use crate::clock::{Clock, Ticks};
use crate::driver::Driver;
use crate::error::{Fault, SchedulerError};
use crate::syscall::{Cancel, InterfaceId};
use crate::task::{Arena, Resumption, Step, Task, TaskId};

const DEFAULT_IDLE_CAP: Duration = Duration::from_secs(1);

/// Interfaces with at least one task blocked on them.
///
/// Exposed read-only to [`Driver`] implementations so they know which
/// hardware sources are worth listening for.
#[derive(Default)]
pub struct PausedTable {
    table: BTreeMap<InterfaceId, BTreeSet<TaskId>>,
}

impl PausedTable {
    fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, interface: InterfaceId, task: TaskId) {
        self.table.entry(interface).or_default().insert(task);
    }

    fn remove(&mut self, interface: InterfaceId, task: TaskId) -> bool {
        let Some(set) = self.table.get_mut(&interface) else {
            return false;
        };
        let removed = set.remove(&task);
        if set.is_empty() {
            self.table.remove(&interface);
        }
        removed
    }

    fn take(&mut self, interface: InterfaceId) -> BTreeSet<TaskId> {
        self.table.remove(&interface).unwrap_or_default()
    }

    /// Every interface currently blocking at least one task.
    pub fn interfaces(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.table.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

struct TimedEntry<M> {
    deadline: Ticks,
    seq: u64,
    task: TaskId,
    resumption: Resumption<M>,
}

impl<M> PartialEq for TimedEntry<M> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl<M> Eq for TimedEntry<M> {}

impl<M> PartialOrd for TimedEntry<M> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for TimedEntry<M> {
    // Reversed so `BinaryHeap`, a max-heap, pops the earliest deadline
    // (ties broken by insertion order) first.
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded, deadline-ordered queue of pending resumptions.
///
/// Assumes the span between the earliest and latest deadline held at once
/// never exceeds half the `u32` tick range, the same assumption wrap-safe
/// tick arithmetic itself rests on.
struct TimedQueue<M> {
    heap: BinaryHeap<TimedEntry<M>>,
    next_seq: u64,
    cap: usize,
}

impl<M> TimedQueue<M> {
    fn new(cap: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            cap,
        }
    }

    fn push(
        &mut self,
        deadline: Ticks,
        task: TaskId,
        resumption: Resumption<M>,
    ) -> Result<(), SchedulerError> {
        if self.heap.len() >= self.cap {
            return Err(SchedulerError::QueueFull);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimedEntry {
            deadline,
            seq,
            task,
            resumption,
        });
        Ok(())
    }

    fn peek_deadline(&self) -> Option<Ticks> {
        self.heap.peek().map(|e| e.deadline)
    }

    fn pop(&mut self) -> Option<(TaskId, Resumption<M>)> {
        self.heap.pop().map(|e| (e.task, e.resumption))
    }

    fn remove(&mut self, task: TaskId) -> bool {
        let before = self.heap.len();
        // `BinaryHeap` has no targeted removal; rebuild without the entry.
        let remaining: alloc::vec::Vec<TimedEntry<M>> =
            self.heap.drain().filter(|e| e.task != task).collect();
        self.heap.extend(remaining);
        self.heap.len() != before
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

type Finalizer<M> = Box<dyn FnOnce(TaskId, Resumption<M>, &mut Scheduler<M>)>;

const DEFAULT_QUEUE_CAP: usize = 64;

/// The cooperative scheduler core.
pub struct Scheduler<M: 'static> {
    clock: Box<dyn Clock>,
    arena: Arena<Box<dyn Task<M>>>,
    timed: TimedQueue<M>,
    paused: PausedTable,
    finalizers: BTreeMap<TaskId, Finalizer<M>>,
    pending: BTreeMap<TaskId, Box<dyn Cancel<M>>>,
    after_step_hook: Option<Box<dyn FnMut()>>,
    idle_cap: Duration,
    #[cfg(feature = "debug")]
    synthetic: VecDeque<(InterfaceId, M)>,
}

impl<M: 'static> Scheduler<M> {
    /// Builds a scheduler whose timed queue holds at most 64 entries at
    /// once, matching typical embedded firmware sizing. Use
    /// [`with_capacity`](Self::with_capacity) to tighten or loosen this.
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self::with_capacity(clock, DEFAULT_QUEUE_CAP)
    }

    /// Builds a scheduler whose timed queue holds at most `cap` entries at
    /// once; a `spawn` or `schedule` call beyond that returns
    /// [`SchedulerError::QueueFull`].
    pub fn with_capacity(clock: impl Clock + 'static, cap: usize) -> Self {
        Self {
            clock: Box::new(clock),
            arena: Arena::new(),
            timed: TimedQueue::new(cap),
            paused: PausedTable::new(),
            finalizers: BTreeMap::new(),
            pending: BTreeMap::new(),
            after_step_hook: None,
            idle_cap: DEFAULT_IDLE_CAP,
            #[cfg(feature = "debug")]
            synthetic: VecDeque::new(),
        }
    }

    /// Overrides how long [`run`](Self::run) will ask the driver to block
    /// when the timed queue is empty. Defaults to one second.
    pub fn with_idle_cap(mut self, cap: Duration) -> Self {
        self.idle_cap = cap;
        self
    }

    /// Installs a callback run once after every step, regardless of whether
    /// the stepped task returned, faulted, or suspended again. A second call
    /// replaces the first.
    pub fn set_after_step_hook(&mut self, hook: impl FnMut() + 'static) {
        self.after_step_hook = Some(Box::new(hook));
    }

    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    pub fn paused_table(&self) -> &PausedTable {
        &self.paused
    }

    /// Queues an event on `interface` that the run loop delivers before the
    /// next real driver poll, as if the hardware had produced it. Intended
    /// for tests and interactive debugging.
    #[cfg(feature = "debug")]
    pub fn inject(&mut self, interface: InterfaceId, value: M) {
        self.synthetic.push_back((interface, value));
    }

    /// Allocates a new task and schedules it to run with `value` at
    /// `deadline`.
    pub fn spawn(
        &mut self,
        task: Box<dyn Task<M>>,
        value: M,
        deadline: Ticks,
        finalizer: Option<Finalizer<M>>,
    ) -> Result<TaskId, SchedulerError> {
        let id = self.arena.insert(task);
        if let Err(e) = self.timed.push(deadline, id, Resumption::Value(value)) {
            self.arena.remove(id);
            return Err(e);
        }
        if let Some(f) = finalizer {
            self.finalizers.insert(id, f);
        }
        Ok(id)
    }

    /// Re-enqueues an already-allocated task. A given `finalizer`
    /// overwrites any previously registered one for `id`.
    pub fn schedule(
        &mut self,
        id: TaskId,
        resumption: Resumption<M>,
        deadline: Ticks,
        finalizer: Option<Finalizer<M>>,
    ) -> Result<(), SchedulerError> {
        self.timed.push(deadline, id, resumption)?;
        if let Some(f) = finalizer {
            self.finalizers.insert(id, f);
        }
        Ok(())
    }

    /// Blocks `id` on `interface`. Idempotent.
    pub fn pause(&mut self, id: TaskId, interface: InterfaceId) {
        self.paused.insert(interface, id);
    }

    /// Allocates an arena slot for `task` without enqueuing any resumption
    /// for it. Used by syscalls (namely [`Wait`](crate::wait::Wait)) that
    /// impersonate the calling task to receive a wakeup on its behalf.
    pub(crate) fn insert_task(&mut self, task: Box<dyn Task<M>>) -> TaskId {
        self.arena.insert(task)
    }

    /// Registers syscall-private cleanup for `id`, replacing any prior hook.
    pub fn set_pending_cancel(&mut self, id: TaskId, hook: Box<dyn Cancel<M>>) {
        self.pending.insert(id, hook);
    }

    /// Frees `id`'s arena slot without running its `close` or its finalizer.
    /// Used by impersonating syscalls ([`Wait`](crate::wait::Wait)) to
    /// discard their own bookkeeping task once they have delegated their
    /// result to the real caller.
    pub(crate) fn discard_slot(&mut self, id: TaskId) {
        self.arena.remove(id);
        self.finalizers.remove(&id);
        self.pending.remove(&id);
    }

    /// Removes `id` from the timed queue and the paused table, wherever it
    /// currently sits.
    pub fn unschedule(&mut self, id: TaskId, interface: Option<InterfaceId>) {
        self.timed.remove(id);
        if let Some(interface) = interface {
            self.paused.remove(interface, id);
        }
    }

    /// Cancels `id`: strips it from the generic tables, runs any pending
    /// cancel hook, runs the task's own `close`, then finalizes it with
    /// [`Fault::Cancelled`]. A no-op if `id` is already gone.
    pub fn close(&mut self, id: TaskId) {
        if !self.arena.contains(id) {
            return;
        }
        self.timed.remove(id);
        let interfaces: alloc::vec::Vec<_> = self.paused.interfaces().collect();
        for interface in interfaces {
            self.paused.remove(interface, id);
        }
        if let Some(hook) = self.pending.remove(&id) {
            hook.cancel(self);
        }
        if let Some(task) = self.arena.get_mut(id) {
            task.close();
        }
        self.arena.remove(id);
        self.finalize(id, Resumption::Fault(Fault::Cancelled));
    }

    /// Runs `id`'s finalizer, if any, exactly once.
    pub fn finalize(&mut self, id: TaskId, result: Resumption<M>) {
        if let Some(f) = self.finalizers.remove(&id) {
            f(id, result, self);
        }
    }

    /// Empties every table without running finalizers. Test teardown only.
    pub fn clear(&mut self) {
        let cap = self.timed.cap;
        self.arena = Arena::new();
        self.timed = TimedQueue::new(cap);
        self.paused = PausedTable::new();
        self.finalizers.clear();
        self.pending.clear();
        #[cfg(feature = "debug")]
        self.synthetic.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.timed.is_empty() && self.paused.is_empty()
    }

    /// Resumes `id` with `resumption`, dispatching whatever it yields.
    fn step(&mut self, id: TaskId, resumption: Resumption<M>) {
        self.pending.remove(&id);
        let Some(task) = self.arena.get_mut(id) else {
            return;
        };
        let step = match resumption {
            Resumption::Value(v) => task.resume(v),
            Resumption::Fault(f) => task.resume_err(f),
        };
        match step {
            Step::Returned(v) => {
                tracing::trace!(?id, "task returned");
                self.arena.remove(id);
                self.finalize(id, Resumption::Value(v));
            }
            Step::Faulted(f) => {
                tracing::error!(?id, "task faulted");
                self.arena.remove(id);
                self.finalize(id, Resumption::Fault(f));
            }
            Step::Suspended(syscall) => {
                // The task stays parked at `id` in the arena; `handle` only
                // arranges for a future call to `step` to reach it again
                // (or, for an impersonator that is done, discards it via
                // `NoReschedule`).
                if let Err(e) = syscall.handle(id, self) {
                    tracing::error!(?id, error = ?e, "syscall handling failed");
                }
            }
        }
        if let Some(hook) = self.after_step_hook.as_mut() {
            hook();
        }
    }

    /// Runs until both the timed queue and the paused table are empty.
    pub fn run(&mut self, driver: &mut impl Driver<M>)
    where
        M: Clone,
    {
        while !self.is_idle() {
            self.run_one(driver);
        }
    }

    /// Drives a single iteration of the loop: deliver a synthetic event if
    /// one is queued for a live interface, otherwise poll the driver for at
    /// most the time until the next deadline (or the idle cap if none is
    /// pending), then dispatch whatever fired.
    pub fn run_one(&mut self, driver: &mut impl Driver<M>)
    where
        M: Clone,
    {
        let budget = match self.timed.peek_deadline() {
            Some(deadline) => {
                let now = self.clock.now();
                let remaining = crate::clock::ticks_diff(deadline, now).max(0) as u64;
                Duration::from_micros(remaining)
            }
            None => self.idle_cap,
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "debug")] {
                let synthetic_ready = self
                    .synthetic
                    .front()
                    .map(|(i, _)| self.paused.table.contains_key(i))
                    .unwrap_or(false);
                if synthetic_ready {
                    let (interface, value) = self.synthetic.pop_front().unwrap();
                    self.deliver(interface, value);
                    return;
                }
            }
        }

        match driver.poll(&self.paused, budget) {
            Some((interface, value)) => self.deliver(interface, value),
            None => {
                if let Some((id, resumption)) = self.timed.pop() {
                    tracing::trace!(?id, "timer fired");
                    self.step(id, resumption);
                }
            }
        }
    }

    fn deliver(&mut self, interface: InterfaceId, value: M)
    where
        M: Clone,
    {
        let tasks = self.paused.take(interface);
        for id in tasks {
            tracing::trace!(?id, ?interface, "interface fired");
            self.step(id, Resumption::Value(value.clone()));
        }
    }
}

impl<M: 'static> Scheduler<M> {
    /// Enqueues `id` to resume with `resumption` on the very next turn of
    /// the run loop.
    ///
    /// Used by syscalls and combinators (`Wait` delegating to its real
    /// caller, `Race` delivering its winner, `chan` rendezvous) to hand a
    /// resolved value to another task. Going through the timed queue rather
    /// than stepping `id` synchronously keeps the call stack flat no matter
    /// how deep a chain of combinators resolves at once, which matters on
    /// the small stacks embedded deployments run with.
    pub(crate) fn resume_soon(&mut self, id: TaskId, resumption: Resumption<M>) {
        let now = self.clock.now();
        if let Err(e) = self.timed.push(now, id, resumption) {
            tracing::error!(?id, error = ?e, "failed to reschedule task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimDriver};

    /// Surfaces `tracing` output under `cargo test -- --nocapture` without
    /// panicking when a later test has already installed the subscriber.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    struct Noop;
    impl Task<u32> for Noop {
        fn resume(&mut self, value: u32) -> Step<u32> {
            Step::Returned(value)
        }
        fn resume_err(&mut self, fault: Fault<u32>) -> Step<u32> {
            Step::Faulted(fault)
        }
        fn close(&mut self) {}
    }

    #[test]
    fn spawn_and_run_fires_finalizer() {
        init_tracing();
        let ran = alloc::rc::Rc::new(core::cell::Cell::new(false));
        let ran2 = ran.clone();
        let clock = SimClock::new();
        let mut sched: Scheduler<u32> = Scheduler::new(clock.clone());
        sched
            .spawn(
                Box::new(Noop),
                7,
                sched.now(),
                Some(Box::new(move |_, result, _| {
                    if let Resumption::Value(v) = result {
                        assert_eq!(v, 7);
                    }
                    ran2.set(true);
                })),
            )
            .unwrap();
        let mut driver = SimDriver::new(clock);
        sched.run(&mut driver);
        assert!(ran.get());
        assert!(sched.is_idle());
    }

    #[test]
    fn queue_full_is_reported() {
        let clock = SimClock::new();
        let mut sched: Scheduler<u32> = Scheduler::with_capacity(clock, 1);
        sched.spawn(Box::new(Noop), 1, 0, None).unwrap();
        let err = sched.spawn(Box::new(Noop), 2, 0, None).unwrap_err();
        assert_eq!(err, SchedulerError::QueueFull);
    }
}
