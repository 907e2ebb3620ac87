// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Deterministic clock and driver for tests, so scheduling order can be
//! asserted without sleeping in wall-clock time.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::Cell;
use core::time::Duration;

use crate::clock::{Clock, Ticks};
use crate::driver::Driver;
use crate::scheduler::PausedTable;
use crate::syscall::InterfaceId;

/// A [`Clock`] backed by a shared counter that only [`SimDriver`] advances.
#[derive(Clone)]
pub struct SimClock {
    ticks: Rc<Cell<Ticks>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            ticks: Rc::new(Cell::new(0)),
        }
    }

    fn advance(&self, micros: u64) {
        let micros = micros.min(u32::MAX as u64) as u32;
        self.ticks.set(self.ticks.get().wrapping_add(micros));
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Ticks {
        self.ticks.get()
    }
}

/// A [`Driver`] that advances a [`SimClock`] by exactly the budget it is
/// asked to wait for, optionally resolving with a scripted event partway
/// through that budget.
pub struct SimDriver<M> {
    clock: SimClock,
    scripted: VecDeque<(InterfaceId, M, u64)>,
}

impl<M> SimDriver<M> {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            scripted: VecDeque::new(),
        }
    }

    /// Arranges for `(interface, value)` to fire after `after_micros` of
    /// simulated waiting, the next time the driver is polled with a budget
    /// that reaches that far.
    pub fn script(&mut self, interface: InterfaceId, value: M, after_micros: u64) {
        self.scripted.push_back((interface, value, after_micros));
    }
}

impl<M> Driver<M> for SimDriver<M> {
    fn poll(&mut self, _paused: &PausedTable, budget: Duration) -> Option<(InterfaceId, M)> {
        let budget_micros = budget.as_micros().min(u64::MAX as u128) as u64;
        if let Some((_, _, after)) = self.scripted.front() {
            if *after <= budget_micros {
                let (interface, value, after) = self.scripted.pop_front().unwrap();
                self.clock.advance(after);
                return Some((interface, value));
            }
        }
        self.clock.advance(budget_micros);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_advances_clock_by_budget_on_timeout() {
        let clock = SimClock::new();
        let mut driver: SimDriver<()> = SimDriver::new(clock.clone());
        assert_eq!(
            driver.poll(&PausedTable::default(), Duration::from_micros(42)),
            None
        );
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn scripted_event_fires_within_budget() {
        let clock = SimClock::new();
        let mut driver = SimDriver::new(clock.clone());
        driver.script(InterfaceId(3), "hi", 100);
        let event = driver.poll(&PausedTable::default(), Duration::from_micros(1_000));
        assert_eq!(event, Some((InterfaceId(3), "hi")));
        assert_eq!(clock.now(), 100);
    }
}
