// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blocking wait on an interface, with an optional timeout.
//!
//! `Wait` impersonates the calling task: it inserts a bookkeeping task of
//! its own into the arena to receive whichever of the two wakeup sources
//! (the interface firing, the timeout elapsing) happens first, discards the
//! other, and only then delivers a single resumption to the real caller.

use alloc::boxed::Box;

use crate::clock::ticks_add;
use crate::error::{Fault, SchedulerError};
use crate::scheduler::Scheduler;
use crate::syscall::{Cancel, InterfaceId, Syscall};
use crate::task::{Resumption, Step, Task, TaskId};

/// Block the calling task on `interface`, optionally with a timeout.
pub struct Wait {
    interface: InterfaceId,
    timeout: Option<u32>,
}

impl Wait {
    pub fn new(interface: InterfaceId) -> Self {
        Self {
            interface,
            timeout: None,
        }
    }

    pub fn with_timeout(interface: InterfaceId, timeout: u32) -> Self {
        Self {
            interface,
            timeout: Some(timeout),
        }
    }
}

impl<M: 'static> Syscall<M> for Wait {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        let self_id = sched.insert_task(Box::new(Impersonator {
            caller,
            interface: self.interface,
        }));
        sched.pause(self_id, self.interface);

        let mut timeout_failed = None;
        if let Some(timeout) = self.timeout {
            let deadline = ticks_add(sched.now(), timeout);
            if let Err(e) = sched.schedule(self_id, Resumption::Fault(Fault::Timeout), deadline, None) {
                // Queue is full: leave the caller waiting on the interface
                // only (no timeout). The impersonator stays paused and its
                // cancel hook still gets registered below, so `close(caller)`
                // can unwind it later; only the timeout attempt is dropped.
                timeout_failed = Some(e);
            }
        }

        sched.set_pending_cancel(
            caller,
            Box::new(Cleanup {
                self_id,
                interface: self.interface,
            }),
        );

        match timeout_failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The bookkeeping task occupying `self_id`'s arena slot while a `Wait` is
/// outstanding. Whichever wakeup source resumes it, it hands off to
/// [`Deliver`] to do the actual table cleanup and caller resumption, since
/// `Task` methods have no scheduler access of their own.
struct Impersonator {
    caller: TaskId,
    interface: InterfaceId,
}

impl<M: 'static> Task<M> for Impersonator {
    fn resume(&mut self, value: M) -> Step<M> {
        Step::Suspended(Box::new(Deliver {
            caller: self.caller,
            interface: self.interface,
            via_timeout: false,
            outcome: Resumption::Value(value),
        }))
    }

    fn resume_err(&mut self, fault: Fault<M>) -> Step<M> {
        Step::Suspended(Box::new(Deliver {
            caller: self.caller,
            interface: self.interface,
            via_timeout: true,
            outcome: Resumption::Fault(fault),
        }))
    }

    fn close(&mut self) {
        // Unreachable in practice: external cancellation always targets the
        // real caller's id, which is undone via `Cleanup` instead.
    }
}

struct Deliver<M> {
    caller: TaskId,
    interface: InterfaceId,
    via_timeout: bool,
    outcome: Resumption<M>,
}

impl<M: 'static> Syscall<M> for Deliver<M> {
    fn handle(
        self: Box<Self>,
        self_id: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        if self.via_timeout {
            // The I/O event never fired; drop our paused-table entry.
            sched.unschedule(self_id, Some(self.interface));
        } else {
            // `deliver` already removed every waiter on `interface`,
            // including us; only a timeout entry (if any) can remain.
            sched.unschedule(self_id, None);
        }
        sched.discard_slot(self_id);
        sched.resume_soon(self.caller, self.outcome);
        Ok(())
    }
}

/// Cancel hook registered under the real caller's id so `close` can tear
/// down the impersonator's bookkeeping.
struct Cleanup {
    self_id: TaskId,
    interface: InterfaceId,
}

impl<M: 'static> Cancel<M> for Cleanup {
    fn cancel(self: Box<Self>, sched: &mut Scheduler<M>) {
        sched.unschedule(self.self_id, Some(self.interface));
        sched.discard_slot(self.self_id);
    }
}
