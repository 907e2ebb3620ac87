// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A cooperative, single-threaded task scheduler for embedded event loops.
//!
//! Tasks are resumable computations ([`task::Task`]) that suspend by
//! yielding a boxed [`syscall::Syscall`]; the [`scheduler::Scheduler`]
//! interprets each one and resumes the task later, in response to a
//! deadline elapsing or an I/O [`Driver`](driver::Driver) event. Five
//! syscalls are built in: [`sleep::Sleep`], [`wait::Wait`], [`race::Race`],
//! and the two ends of [`chan::Chan`].
//!
//! There is exactly one execution thread and no preemption: a task only
//! ever gives up control at a syscall boundary, so every scheduler table is
//! a plain field behind `&mut self` with no locking.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod chan;
pub mod clock;
pub mod driver;
pub mod error;
pub mod race;
pub mod scheduler;
pub mod sim;
pub mod sleep;
pub mod syscall;
pub mod task;
pub mod wait;

pub use clock::{Clock, Ticks, ticks_add, ticks_diff};
pub use driver::Driver;
pub use error::{Fault, SchedulerError};
pub use scheduler::{PausedTable, Scheduler};
pub use syscall::{Cancel, InterfaceId, NoReschedule, Syscall};
pub use task::{Resumption, Step, Task, TaskId};
