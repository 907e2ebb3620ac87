// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Rendezvous channel: `put`/`take` syscalls plus a non-blocking `publish`.
//!
//! Single-threaded, so the shared queue is a plain `Rc<RefCell<_>>` rather
//! than anything atomic. Delivering a value to a waiter requires cloning it
//! (a putter resuming with an "ack" and a taker resuming with the payload
//! both need their own copy), hence the `M: Clone` bound on every channel
//! operation; the rest of the crate has no such requirement.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::syscall::{Cancel, Syscall};
use crate::task::{Resumption, TaskId};

struct Inner<M> {
    // Invariant: at most one of `putters` and `takers` is ever non-empty.
    putters: VecDeque<(Option<TaskId>, M)>,
    takers: VecDeque<TaskId>,
}

/// A cheaply-cloneable handle to a rendezvous channel.
pub struct Chan<M> {
    inner: Rc<RefCell<Inner<M>>>,
}

impl<M> Clone for Chan<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: 'static + Clone> Chan<M> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                putters: VecDeque::new(),
                takers: VecDeque::new(),
            })),
        }
    }

    /// Syscall: block until a value is available.
    pub fn take(&self) -> Take<M> {
        Take {
            inner: self.inner.clone(),
        }
    }

    /// Syscall: block until a taker is ready to receive `value`.
    pub fn put(&self, value: M) -> Put<M> {
        Put {
            inner: self.inner.clone(),
            value,
        }
    }

    /// Non-blocking publish: delivers to a waiting taker immediately, or
    /// parks the value for the next `take` if nobody is waiting.
    pub fn publish(&self, value: M, sched: &mut Scheduler<M>) {
        let taker = self.inner.borrow_mut().takers.pop_front();
        match taker {
            Some(taker) => sched.resume_soon(taker, Resumption::Value(value)),
            None => self.inner.borrow_mut().putters.push_back((None, value)),
        }
    }
}

impl<M: 'static + Clone> Default for Chan<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Take<M> {
    inner: Rc<RefCell<Inner<M>>>,
}

impl<M: 'static + Clone> Syscall<M> for Take<M> {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        let popped = self.inner.borrow_mut().putters.pop_front();
        match popped {
            Some((putter, value)) => {
                if let Some(putter) = putter {
                    sched.resume_soon(caller, Resumption::Value(value.clone()));
                    sched.resume_soon(putter, Resumption::Value(value));
                } else {
                    sched.resume_soon(caller, Resumption::Value(value));
                }
            }
            None => {
                self.inner.borrow_mut().takers.push_back(caller);
                sched.set_pending_cancel(
                    caller,
                    Box::new(TakeCancel {
                        inner: self.inner.clone(),
                        who: caller,
                    }),
                );
            }
        }
        Ok(())
    }
}

struct TakeCancel<M> {
    inner: Rc<RefCell<Inner<M>>>,
    who: TaskId,
}

impl<M: 'static + Clone> Cancel<M> for TakeCancel<M> {
    fn cancel(self: Box<Self>, _sched: &mut Scheduler<M>) {
        self.inner.borrow_mut().takers.retain(|id| *id != self.who);
    }
}

pub struct Put<M> {
    inner: Rc<RefCell<Inner<M>>>,
    value: M,
}

impl<M: 'static + Clone> Syscall<M> for Put<M> {
    fn handle(
        self: Box<Self>,
        caller: TaskId,
        sched: &mut Scheduler<M>,
    ) -> Result<(), SchedulerError> {
        let taker = self.inner.borrow_mut().takers.pop_front();
        match taker {
            Some(taker) => {
                sched.resume_soon(taker, Resumption::Value(self.value.clone()));
                sched.resume_soon(caller, Resumption::Value(self.value));
            }
            None => {
                self.inner
                    .borrow_mut()
                    .putters
                    .push_back((Some(caller), self.value));
                sched.set_pending_cancel(
                    caller,
                    Box::new(PutCancel {
                        inner: self.inner.clone(),
                        who: caller,
                    }),
                );
            }
        }
        Ok(())
    }
}

struct PutCancel<M> {
    inner: Rc<RefCell<Inner<M>>>,
    who: TaskId,
}

impl<M: 'static + Clone> Cancel<M> for PutCancel<M> {
    fn cancel(self: Box<Self>, _sched: &mut Scheduler<M>) {
        self.inner
            .borrow_mut()
            .putters
            .retain(|(id, _)| *id != Some(self.who));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;
    use crate::sim::{SimClock, SimDriver};
    use crate::task::{Step, Task};
    use alloc::rc::Rc as StdRc;
    use core::cell::{Cell, RefCell};

    struct Taker {
        chan: Chan<&'static str>,
        asked: bool,
    }

    impl Task<&'static str> for Taker {
        fn resume(&mut self, value: &'static str) -> Step<&'static str> {
            if !self.asked {
                self.asked = true;
                Step::Suspended(Box::new(self.chan.take()))
            } else {
                Step::Returned(value)
            }
        }
        fn resume_err(&mut self, fault: Fault<&'static str>) -> Step<&'static str> {
            Step::Faulted(fault)
        }
        fn close(&mut self) {}
    }

    #[test]
    fn publish_then_take_round_trips() {
        let clock = SimClock::new();
        let mut sched: Scheduler<&'static str> = Scheduler::new(clock.clone());
        let chan = Chan::new();
        chan.publish("a", &mut sched);
        chan.publish("b", &mut sched);

        let got = StdRc::new(Cell::new(alloc::vec::Vec::new()));
        for _ in 0..2 {
            let got2 = got.clone();
            sched
                .spawn(
                    Box::new(Taker {
                        chan: chan.clone(),
                        asked: false,
                    }),
                    "",
                    sched.now(),
                    Some(Box::new(move |_, r, _| {
                        if let Resumption::Value(v) = r {
                            let mut vec = got2.take();
                            vec.push(v);
                            got2.set(vec);
                        }
                    })),
                )
                .unwrap();
        }
        let mut driver = SimDriver::new(clock);
        sched.run(&mut driver);
        assert_eq!(got.take(), alloc::vec!["a", "b"]);
    }

    #[test]
    fn put_waits_for_taker() {
        let clock = SimClock::new();
        let mut sched: Scheduler<&'static str> = Scheduler::new(clock.clone());
        let chan = Chan::new();

        struct Putter {
            chan: Chan<&'static str>,
            asked: bool,
        }
        impl Task<&'static str> for Putter {
            fn resume(&mut self, value: &'static str) -> Step<&'static str> {
                if !self.asked {
                    self.asked = true;
                    Step::Suspended(Box::new(self.chan.put("x")))
                } else {
                    Step::Returned(value)
                }
            }
            fn resume_err(&mut self, fault: Fault<&'static str>) -> Step<&'static str> {
                Step::Faulted(fault)
            }
            fn close(&mut self) {}
        }

        sched
            .spawn(
                Box::new(Putter {
                    chan: chan.clone(),
                    asked: false,
                }),
                "",
                sched.now(),
                None,
            )
            .unwrap();

        let got = StdRc::new(Cell::new(None));
        let got2 = got.clone();
        sched
            .spawn(
                Box::new(Taker {
                    chan,
                    asked: false,
                }),
                "",
                sched.now(),
                Some(Box::new(move |_, r, _| {
                    if let Resumption::Value(v) = r {
                        got2.set(Some(v));
                    }
                })),
            )
            .unwrap();

        let mut driver = SimDriver::new(clock);
        sched.run(&mut driver);
        assert_eq!(got.get(), Some("x"));
    }

    /// spec.md §8 scenario 5: when a `take` finds a putter already waiting,
    /// the taker must resume before the putter, not after.
    #[test]
    fn take_resumes_taker_before_waiting_putter() {
        let clock = SimClock::new();
        let mut sched: Scheduler<&'static str> = Scheduler::new(clock.clone());
        let chan = Chan::new();

        struct Putter {
            chan: Chan<&'static str>,
            asked: bool,
        }
        impl Task<&'static str> for Putter {
            fn resume(&mut self, value: &'static str) -> Step<&'static str> {
                if !self.asked {
                    self.asked = true;
                    Step::Suspended(Box::new(self.chan.put("x")))
                } else {
                    Step::Returned(value)
                }
            }
            fn resume_err(&mut self, fault: Fault<&'static str>) -> Step<&'static str> {
                Step::Faulted(fault)
            }
            fn close(&mut self) {}
        }

        let order = StdRc::new(RefCell::new(alloc::vec::Vec::new()));

        let putter_order = order.clone();
        sched
            .spawn(
                Box::new(Putter {
                    chan: chan.clone(),
                    asked: false,
                }),
                "",
                sched.now(),
                Some(Box::new(move |_, _, _| putter_order.borrow_mut().push("P"))),
            )
            .unwrap();

        // Let the putter run first and park in `putters`, so the taker below
        // finds it already waiting instead of racing it.
        let mut driver = SimDriver::new(clock.clone());
        sched.run_one(&mut driver);

        let taker_order = order.clone();
        sched
            .spawn(
                Box::new(Taker {
                    chan,
                    asked: false,
                }),
                "",
                sched.now(),
                Some(Box::new(move |_, _, _| taker_order.borrow_mut().push("T"))),
            )
            .unwrap();

        sched.run(&mut driver);
        assert_eq!(*order.borrow(), alloc::vec!["T", "P"]);
    }
}
