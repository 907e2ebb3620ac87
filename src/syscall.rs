// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The syscall and cancel-hook traits a task's [`Suspended`](crate::task::Step::Suspended)
//! yield carries, plus the opaque interface identifier used by [`Wait`](crate::wait::Wait).

use alloc::boxed::Box;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::task::TaskId;

/// An opaque I/O source identifier (a USB endpoint, the touch panel, ...).
/// The scheduler never interprets its value, only uses it as a table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(pub u16);

/// A request a task makes to the scheduler by yielding it.
///
/// `handle` must be non-blocking: its only job is to install `caller` into
/// whatever tables (timed queue, paused set, channel queue, ...) will later
/// cause it to be resumed. It never runs the task itself.
pub trait Syscall<M: 'static> {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError>;
}

/// Syscall-private cleanup registered alongside a suspended caller so that
/// [`Scheduler::close`](crate::scheduler::Scheduler::close) can undo
/// bookkeeping the generic paused/timed-queue scrub cannot reach, because it
/// lives under a different task id (an impersonator) or inside syscall-owned
/// shared state (a race, a channel's parked queue entry).
pub trait Cancel<M: 'static> {
    fn cancel(self: Box<Self>, sched: &mut Scheduler<M>);
}

static_assertions::assert_obj_safe!(Syscall<u32>, Cancel<u32>);

/// An inert syscall returned by impersonating tasks (see
/// [`Wait`](crate::wait::Wait)) after they have already delegated their
/// result to the real caller. Discards the yielding task's own arena slot
/// immediately, since nothing will ever resume it again.
pub struct NoReschedule;

impl<M: 'static> Syscall<M> for NoReschedule {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        sched.discard_slot(caller);
        Ok(())
    }
}
