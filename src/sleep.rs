// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The simplest syscall: park until a deadline, no cancellation bookkeeping
//! needed beyond the generic timed-queue scrub `close` already does.

use alloc::boxed::Box;

use crate::clock::{Ticks, ticks_add};
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::syscall::Syscall;
use crate::task::{Resumption, TaskId};

/// Park the calling task until `delay` microseconds have elapsed, then
/// resume it with whatever `make_value` produces from the computed
/// deadline (callers typically just hand back the deadline itself, to
/// measure jitter).
///
/// `delay == 0` is legal and means "resume as soon as possible", not
/// "resume synchronously": the task still yields control to the scheduler
/// for one turn.
pub struct Sleep<M> {
    delay: u32,
    make_value: Box<dyn FnOnce(Ticks) -> M>,
}

impl<M> Sleep<M> {
    pub fn new(delay: u32, make_value: impl FnOnce(Ticks) -> M + 'static) -> Self {
        Self {
            delay,
            make_value: Box::new(make_value),
        }
    }
}

impl Sleep<Ticks> {
    /// Convenience for schedulers whose event type doubles as a deadline
    /// stamp: resumes with the computed deadline directly.
    pub fn for_deadline(delay: u32) -> Self {
        Self::new(delay, |deadline| deadline)
    }
}

impl<M: 'static> Syscall<M> for Sleep<M> {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        let deadline = ticks_add(sched.now(), self.delay);
        let value = (self.make_value)(deadline);
        sched.schedule(caller, Resumption::Value(value), deadline, None)
    }
}
