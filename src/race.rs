// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! First-of-N combinator: spawn every child, resume the caller with
//! whichever finishes first, cancel the rest.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::error::{Fault, SchedulerError};
use crate::scheduler::Scheduler;
use crate::syscall::{Cancel, Syscall};
use crate::task::{Resumption, Step, Task, TaskId};

/// Races a set of children, each either a full [`Task`] or a one-shot
/// [`Syscall`]. Every child needs a seed value, exactly like any other
/// [`Scheduler::spawn`]: well-behaved tasks ignore it on their very first
/// `resume` and treat it purely as a "go" signal, mirroring how a freshly
/// created generator's first `send` argument is conventionally `None`.
pub struct Race<M> {
    children: Vec<(Box<dyn Task<M>>, M)>,
}

impl<M: 'static> Race<M> {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: Box<dyn Task<M>>, seed: M) -> Self {
        self.children.push((task, seed));
        self
    }

    pub fn with_syscall(mut self, syscall: Box<dyn Syscall<M>>, seed: M) -> Self {
        self.children.push((Box::new(SyscallTask::new(syscall)), seed));
        self
    }
}

impl<M: 'static> Default for Race<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a bare [`Syscall`] into a one-shot [`Task`]: yield it immediately,
/// then whatever it resolves to becomes this task's own result.
struct SyscallTask<M> {
    syscall: Option<Box<dyn Syscall<M>>>,
}

impl<M> SyscallTask<M> {
    fn new(syscall: Box<dyn Syscall<M>>) -> Self {
        Self {
            syscall: Some(syscall),
        }
    }
}

impl<M: 'static> Task<M> for SyscallTask<M> {
    fn resume(&mut self, value: M) -> Step<M> {
        match self.syscall.take() {
            Some(syscall) => Step::Suspended(syscall),
            None => Step::Returned(value),
        }
    }

    fn resume_err(&mut self, fault: Fault<M>) -> Step<M> {
        match self.syscall.take() {
            Some(syscall) => Step::Suspended(syscall),
            None => Step::Faulted(fault),
        }
    }

    fn close(&mut self) {}
}

struct RaceState {
    caller: TaskId,
    scheduled: Vec<TaskId>,
    finished: bool,
}

impl<M: 'static> Syscall<M> for Race<M> {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        let state = Rc::new(RefCell::new(RaceState {
            caller,
            scheduled: Vec::new(),
            finished: false,
        }));
        let now = sched.now();
        let mut ids = Vec::new();
        for (task, seed) in self.children {
            let state_for_finalizer = state.clone();
            let spawned = sched.spawn(
                task,
                seed,
                now,
                Some(Box::new(move |id, result, sched| {
                    finish(&state_for_finalizer, id, result, sched)
                })),
            );
            match spawned {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        sched.close(id);
                    }
                    return Err(e);
                }
            }
        }
        state.borrow_mut().scheduled = ids;
        sched.set_pending_cancel(caller, Box::new(RaceCancel { state }));
        Ok(())
    }
}

/// Shared finalizer for every child: the first one to terminate or fault
/// wins the race.
fn finish<M: 'static>(
    state: &Rc<RefCell<RaceState>>,
    id: TaskId,
    result: Resumption<M>,
    sched: &mut Scheduler<M>,
) {
    let (caller, losers) = {
        let mut s = state.borrow_mut();
        if s.finished {
            return;
        }
        s.finished = true;
        let losers: Vec<TaskId> = s.scheduled.iter().copied().filter(|&c| c != id).collect();
        (s.caller, losers)
    };
    for loser in losers {
        sched.close(loser);
    }
    sched.resume_soon(caller, result);
}

/// Cancel hook registered under the caller's id: if the caller is closed
/// while the race is still pending, mark it finished *before* closing the
/// children, so the first child's own finalizer doesn't spuriously
/// reschedule a caller that is itself mid-close.
struct RaceCancel {
    state: Rc<RefCell<RaceState>>,
}

impl<M: 'static> Cancel<M> for RaceCancel {
    fn cancel(self: Box<Self>, sched: &mut Scheduler<M>) {
        let scheduled = {
            let mut s = self.state.borrow_mut();
            s.finished = true;
            core::mem::take(&mut s.scheduled)
        };
        for id in scheduled {
            sched.close(id);
        }
    }
}
