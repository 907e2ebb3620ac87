// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Monotonic tick source and wrap-safe tick arithmetic.
//!
//! The scheduler never assumes an unbounded, unwrapping clock: a `u32`
//! microsecond counter wraps roughly every 71 minutes on real hardware, and
//! every deadline comparison in this crate goes through [`ticks_diff`]
//! rather than a naive `a - b`.

/// An absolute point in time, expressed in microsecond ticks since some
/// unspecified epoch chosen by the [`Clock`] implementation.
pub type Ticks = u32;

/// A source of monotonic ticks.
///
/// Implementations must never go backwards and must wrap according to
/// ordinary `u32` overflow semantics; the scheduler compensates for wrapping
/// via [`ticks_diff`] and [`ticks_add`].
pub trait Clock {
    /// Returns the current tick count.
    fn now(&self) -> Ticks;
}

/// Signed difference `a - b`, correct across a single wraparound of the tick
/// counter.
///
/// This is the "serial number arithmetic" technique (RFC 1982): as long as
/// the true difference between `a` and `b` is less than half the range of
/// `Ticks`, `ticks_diff` returns the correct signed distance even if one of
/// them has wrapped and the other hasn't.
pub fn ticks_diff(a: Ticks, b: Ticks) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Adds a (non-negative) delay to a tick count, wrapping on overflow.
pub fn ticks_add(a: Ticks, delay: u32) -> Ticks {
    a.wrapping_add(delay)
}

/// Returns `true` if `a` is strictly before `b`, accounting for wraparound.
pub fn ticks_before(a: Ticks, b: Ticks) -> bool {
    ticks_diff(a, b) < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_handles_wraparound() {
        let before = u32::MAX - 10;
        let after = 5u32; // wrapped past zero
        assert_eq!(ticks_diff(after, before), 16);
        assert!(ticks_before(before, after));
    }

    #[test]
    fn add_wraps() {
        assert_eq!(ticks_add(u32::MAX, 5), 4);
    }
}
