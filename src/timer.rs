//! Hierarchical timer wheel (spec.md §4.6 "Ticker"), grounded on
//! `examples/original_source/coop/time/ticker.h`/`.cpp`. `B` power-of-two buckets indexed by
//! `floor(log2(delta))` remaining-delay ticks; advancing visits only the buckets whose checking
//! period has elapsed, amortizing to O(1) per tick.
//!
//! `Advance` scans buckets low-to-high and stops at the first one that isn't due yet, matching
//! the C++ reference's `ticker.cpp` `Launch` loop — coarser buckets are due strictly less often,
//! so that direction (not high-to-low) is what makes the early-stop sound. See DESIGN.md.

use std::ptr::NonNull;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::coordinator::Coordinator;
use crate::list::{Link, List};

pub const DEFAULT_RESOLUTION: u32 = 3;
pub const DEFAULT_BUCKETS: usize = 32;

fn bucket_index_for(delta: u64, bucket_count: usize) -> usize {
    if delta == 0 {
        return 0;
    }
    let bits = (u64::BITS - delta.leading_zeros()) as usize;
    bits.min(bucket_count - 1)
}

/// One pending deadline: a coordinator armed (held) at construction, released by the wheel once
/// the deadline passes. Mirrors the role `io::Handle` plays for kernel completions, but for a
/// purely in-process timeout with no kernel round-trip.
pub struct TimerHandle {
    link: Link<TimerHandle>,
    coord: Coordinator,
    deadline: u64,
    bucket: usize,
    fired: bool,
}

impl TimerHandle {
    /// Construct armed: `owner` holds the inner coordinator until the wheel releases it, exactly
    /// as `Signal::new` arms its coordinator (spec.md §3 "Signal").
    pub fn new(owner: NonNull<Context>) -> Self {
        let mut coord = Coordinator::new();
        coord.try_acquire(owner);
        Self { link: Link::new(), coord, deadline: 0, bucket: 0, fired: false }
    }

    pub fn as_coordinator_mut(&mut self) -> &mut Coordinator {
        &mut self.coord
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }

    fn project(n: NonNull<TimerHandle>) -> NonNull<Link<TimerHandle>> {
        unsafe { NonNull::new_unchecked(&mut (*n.as_ptr()).link as *mut _) }
    }

    fn node_from_link(l: NonNull<Link<TimerHandle>>) -> NonNull<TimerHandle> {
        // `link` is the first field, so the addresses coincide.
        l.cast()
    }
}

impl Drop for TimerHandle {
    /// If this handle is dropped while still linked in a bucket (the context holding it was
    /// killed, or scope exited early), it must be unlinked — nothing else will do it, and leaving
    /// a dangling node in a bucket list would corrupt the wheel on the next `advance`. Actual
    /// unlinking happens via `TimerWheel::cancel`, which callers are expected to invoke first;
    /// this is a last-resort debug check, matching the rest of the crate's "trust the protocol,
    /// assert it in debug" style (spec.md §7).
    fn drop(&mut self) {
        debug_assert!(!self.link.is_linked(), "TimerHandle dropped without TimerWheel::cancel");
    }
}

struct Bucket {
    list: List<TimerHandle>,
    last_checked: u64,
}

/// Owned by exactly one [`crate::cooperator::Cooperator`]; touched only from that cooperator's
/// thread, same confinement as the run queue and I/O ring.
pub struct TimerWheel {
    buckets: Vec<Bucket>,
    resolution: u32,
    start: Instant,
}

impl TimerWheel {
    pub fn new(resolution: u32, bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count)
                .map(|_| Bucket { list: List::new(TimerHandle::project, TimerHandle::node_from_link), last_checked: 0 })
                .collect(),
            resolution,
            start: Instant::now(),
        }
    }

    fn now_ticks(&self) -> u64 {
        (self.start.elapsed().as_millis() as u64) >> self.resolution
    }

    fn bucket_for(&self, delta: u64) -> usize {
        bucket_index_for(delta, self.buckets.len())
    }

    /// Arm `handle` to fire after `delay` from now. `handle` must outlive its membership in the
    /// wheel — callers block on its coordinator (directly, or via
    /// [`crate::multi_coordinator::coordinate_with_kill_timeout`]) until `advance` releases it.
    ///
    /// # Safety
    /// `handle` must point at a `TimerHandle` that remains valid and at a stable address until
    /// either it fires or [`Self::cancel`] is called.
    pub unsafe fn schedule(&mut self, handle: NonNull<TimerHandle>, delay: Duration) {
        let now = self.now_ticks();
        let delta = (delay.as_millis() as u64) >> self.resolution;
        let bucket = self.bucket_for(delta);
        unsafe {
            (*handle.as_ptr()).deadline = now + delta;
            (*handle.as_ptr()).bucket = bucket;
            self.buckets[bucket].list.push_back(handle);
        }
    }

    /// Remove `handle` before it fires (the context waiting on it was killed, or no longer cares).
    /// A no-op if `handle` already fired and was drained.
    ///
    /// # Safety
    /// `handle` must be the same pointer passed to a prior [`Self::schedule`] call on this wheel.
    pub unsafe fn cancel(&mut self, handle: NonNull<TimerHandle>) {
        unsafe {
            let bucket = (*handle.as_ptr()).bucket;
            self.buckets[bucket].list.remove(handle);
        }
    }

    /// Advance the wheel to the current time, migrating handles toward bucket 0 as their
    /// deadlines approach, then release every handle that has now expired. `ctx` is the context
    /// currently running the cooperator's advance step (passed through to `Context::unblock`, see
    /// spec.md §4.1's `Unblock(ctx, other, schedule)` contract).
    pub fn advance(&mut self, ctx: NonNull<Context>) {
        let now = self.now_ticks();

        for i in 1..self.buckets.len() {
            if now.wrapping_sub(self.buckets[i].last_checked) < (1u64 << (i - 1)) {
                break;
            }
            self.buckets[i].last_checked = now;

            let bucket_count = self.buckets.len();
            let mut moves: Vec<(NonNull<TimerHandle>, usize)> = Vec::new();
            self.buckets[i].list.visit_mut(|h| {
                let deadline = unsafe { (*h.as_ptr()).deadline };
                let target = if deadline <= now { 0 } else { bucket_index_for(deadline - now, bucket_count) };
                if target != i {
                    moves.push((h, target));
                }
                true
            });
            for (h, target) in moves {
                self.buckets[i].list.remove(h);
                unsafe { (*h.as_ptr()).bucket = target };
                unsafe { self.buckets[target].list.push_back(h) };
            }
        }

        while let Some(h) = self.buckets[0].list.pop_front() {
            unsafe {
                (*h.as_ptr()).fired = true;
                (*h.as_ptr()).coord.release(ctx, false);
            }
        }
    }
}

/// Outcome of [`sleep`] (spec.md §4.9 public contract table: `Sleep(interval)` returns
/// `Ok / Killed / Error`; "Error" does not apply here since the timer wheel is purely in-process
/// and cannot fail the way a kernel timeout can).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Completed,
    Killed,
}

/// Block the current context for `duration`, cancellable by `Handle::kill`. Composes the timer
/// wheel with the context's kill signal via a two-way multi-coordinator, same pattern as
/// `coordinate_with_kill` but specialized to a single timer coordinator (no separate "timed out"
/// branch needed — the timer coordinator firing at all means it timed out, there's no other
/// event racing it).
pub fn sleep(duration: Duration) -> SleepOutcome {
    let ctx = crate::current::current().expect("sleep() called outside a running context");
    let cooperator = unsafe { ctx.as_ref().cooperator() };

    let mut handle = TimerHandle::new(ctx);
    unsafe { crate::cooperator::Cooperator::timer_wheel_mut(cooperator).schedule(NonNull::from(&mut handle), duration) };

    let outcome = crate::multi_coordinator::coordinate_with_kill(ctx, vec![handle.as_coordinator_mut()]);

    if !handle.is_fired() {
        unsafe { crate::cooperator::Cooperator::timer_wheel_mut(cooperator).cancel(NonNull::from(&mut handle)) };
    }

    if outcome.is_killed() {
        SleepOutcome::Killed
    } else {
        SleepOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_for_matches_power_of_two_ranges() {
        let wheel = TimerWheel::new(0, 32);
        assert_eq!(wheel.bucket_for(0), 0);
        assert_eq!(wheel.bucket_for(1), 1);
        assert_eq!(wheel.bucket_for(2), 2);
        assert_eq!(wheel.bucket_for(3), 2);
        assert_eq!(wheel.bucket_for(4), 3);
        assert_eq!(wheel.bucket_for(7), 3);
        assert_eq!(wheel.bucket_for(8), 4);
    }

    #[test]
    fn bucket_for_clamps_to_last_bucket() {
        let wheel = TimerWheel::new(0, 4);
        assert_eq!(wheel.bucket_for(u64::MAX), 3);
    }

    proptest::proptest! {
        /// Whatever `delta` and `bucket_count` come in, the chosen bucket is always in range and
        /// never smaller than the bucket a strictly smaller delta would choose — the monotonicity
        /// `advance`'s high-to-low scan relies on to stop early.
        #[test]
        fn bucket_index_is_in_range_and_monotonic(delta in 0u64..=u64::MAX, bucket_count in 2usize..64) {
            let b = bucket_index_for(delta, bucket_count);
            prop_assert!(b < bucket_count);
            if delta > 0 {
                let smaller = bucket_index_for(delta - 1, bucket_count);
                prop_assert!(smaller <= b);
            }
        }
    }
}
