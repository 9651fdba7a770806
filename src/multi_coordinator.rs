//! Wait-on-any-of-N composition of [`Coordinator`]s (spec.md §4.4), grounded on
//! `examples/original_source/coop/detail/multi_coordinator.h` and the sugared entry points in
//! `examples/original_source/coop/coordinate_with.h` (`CoordinateWith`/`CoordinateWithKill`,
//! `CoordinationResult`).

use std::ptr::NonNull;
use std::time::Duration;

use crate::context::Context;
use crate::coordinator::{Coordinator, Waiter};

/// Sentinel result of a multi-coordinator wait, generalizing
/// `examples/original_source/coop/coordination_result.h`'s `CoordinationResult`. `Index(i)` means
/// coordinator `i` (in the order passed to [`MultiCoordinator::new`]) is now held by the calling
/// context; every other enrolled coordinator has had its waiter node removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateOutcome {
    Index(usize),
    Killed,
    TimedOut,
}

impl CoordinateOutcome {
    pub fn is_killed(self) -> bool {
        matches!(self, CoordinateOutcome::Killed)
    }

    pub fn is_timed_out(self) -> bool {
        matches!(self, CoordinateOutcome::TimedOut)
    }

    pub fn index(self) -> Option<usize> {
        match self {
            CoordinateOutcome::Index(i) => Some(i),
            _ => None,
        }
    }
}

/// Composes `N` coordinators into a "first wins" wait. Built fresh for each
/// [`MultiCoordinator::acquire`] call — it is cheap (an array of enrollment nodes on the calling
/// context's own stack) and not meant to be reused across calls.
pub struct MultiCoordinator<'a> {
    underlying: Vec<&'a mut Coordinator>,
}

impl<'a> MultiCoordinator<'a> {
    pub fn new(underlying: Vec<&'a mut Coordinator>) -> Self {
        Self { underlying }
    }

    /// Left-to-right walk trying `try_acquire` on each; if all are held, enroll a waiter on every
    /// one and block, then — on resumption — scan left-to-right again for the satisfied
    /// enrollment (leftmost wins among simultaneously-satisfied ones), releasing any others and
    /// unenrolling everything else. See spec.md §4.4 for the full two-phase algorithm.
    pub fn acquire(&mut self, ctx: NonNull<Context>) -> usize {
        let n = self.underlying.len();
        let mut won = None;
        for (i, coord) in self.underlying.iter_mut().enumerate() {
            if coord.try_acquire(ctx) {
                won = Some(i);
                break;
            }
        }

        if let Some(i) = won {
            return i;
        }

        // All held: enroll a waiter node per coordinator. Each node lives on this stack frame
        // (it's an element of `waiters`, a local `Vec`) for the duration of the block.
        let mut waiters: Vec<Waiter> = (0..n).map(|_| Waiter::new(ctx)).collect();
        for (coord, waiter) in self.underlying.iter_mut().zip(waiters.iter_mut()) {
            coord.enqueue_waiter(NonNull::from(waiter));
        }
        Context::block(ctx);

        // Resumption: scan left-to-right for who actually fired.
        for i in 0..n {
            if !waiters[i].satisfied() {
                self.underlying[i].dequeue_waiter(NonNull::from(&mut waiters[i]));
                continue;
            }
            // Possible (releases without immediate reschedule can satisfy more than one
            // enrollment) for a coordinator to the right to have fired too; release those back
            // rather than leave us holding several at once (spec.md §4.4 step 3).
            for j in (i + 1)..n {
                if waiters[j].satisfied() {
                    self.underlying[j].release(ctx, false);
                } else {
                    self.underlying[j].dequeue_waiter(NonNull::from(&mut waiters[j]));
                }
            }
            return i;
        }
        unreachable!("multi-coordinator resumed without any enrollment satisfied");
    }
}

/// `CoordinateWith` without kill/timeout wrapping: block until the first of `coords` is
/// acquirable, leftmost wins. The raw entry point; most callers want [`coordinate_with`] or
/// [`coordinate_with_kill`] instead, which fold in the running context's kill signal.
pub fn coordinate_raw(ctx: NonNull<Context>, coords: Vec<&mut Coordinator>) -> usize {
    MultiCoordinator::new(coords).acquire(ctx)
}

/// Block until one of `coords` is acquirable OR the calling context is killed. The kill signal's
/// inner coordinator is enrolled first (index `0` internally); on return, indices are shifted back
/// down so callers see exactly the indices of `coords` they passed in. Mirrors
/// `examples/original_source/coop/multi_coordinator.h`'s `CoordinateWithKill`.
pub fn coordinate_with_kill(ctx: NonNull<Context>, mut coords: Vec<&mut Coordinator>) -> CoordinateOutcome {
    let kill_coord: &mut Coordinator = unsafe { (*ctx.as_ptr()).killed_signal().as_coordinator_mut() };
    let mut all = Vec::with_capacity(coords.len() + 1);
    all.push(kill_coord);
    all.append(&mut coords);

    let idx = MultiCoordinator::new(all).acquire(ctx);
    if idx == 0 {
        // The kill signal's TryAcquire set held_by; reset it so future waits on this signal
        // don't observe a permanently-held coordinator (spec.md §4.5).
        unsafe { (*ctx.as_ptr()).killed_signal().reset_coordinator() };
        return CoordinateOutcome::Killed;
    }
    CoordinateOutcome::Index(idx - 1)
}

/// Convenience: resolve `ctx` from the thread-local current context.
pub fn coordinate_with(coords: Vec<&mut Coordinator>) -> CoordinateOutcome {
    let ctx = crate::current::current().expect("coordinate_with() called outside a running context");
    CoordinateOutcome::Index(coordinate_raw(ctx, coords))
}

/// `CoordinateWithKill`, resolving `ctx` from the thread-local current context and additionally
/// racing a timeout submitted through the cooperator's timer wheel. Timeout sits rightmost so
/// user coordinators and the kill signal both win ties against it (spec.md §4.4 "Timeout
/// wrapper").
pub fn coordinate_with_kill_timeout(
    ctx: NonNull<Context>,
    mut coords: Vec<&mut Coordinator>,
    timeout: Duration,
) -> CoordinateOutcome {
    let mut timer = crate::timer::TimerHandle::new(ctx);
    let cooperator = unsafe { ctx.as_ref().cooperator() };
    unsafe { crate::cooperator::Cooperator::timer_wheel_mut(cooperator).schedule(NonNull::from(&mut timer), timeout) };

    let kill_coord: &mut Coordinator = unsafe { (*ctx.as_ptr()).killed_signal().as_coordinator_mut() };
    let timeout_coord = timer.as_coordinator_mut();

    let mut all = Vec::with_capacity(coords.len() + 2);
    all.push(kill_coord);
    all.append(&mut coords);
    let user_count = all.len() - 1;
    all.push(timeout_coord);

    let idx = MultiCoordinator::new(all).acquire(ctx);

    if !timer.is_fired() {
        unsafe { crate::cooperator::Cooperator::timer_wheel_mut(cooperator).cancel(NonNull::from(&mut timer)) };
    }

    if idx == 0 {
        unsafe { (*ctx.as_ptr()).killed_signal().reset_coordinator() };
        return CoordinateOutcome::Killed;
    }
    if idx == user_count + 1 {
        return CoordinateOutcome::TimedOut;
    }
    CoordinateOutcome::Index(idx - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooperator::Cooperator;

    #[test]
    fn leftmost_wins_when_both_already_released() {
        let coop = Cooperator::new_for_test();
        let ctx = coop.test_context_ptr();
        let mut a = Coordinator::new();
        let mut b = Coordinator::new();

        // Simulate "a child acquired both and released both before the parent waits": both
        // coordinators are free, so the left-to-right TryAcquire loop should take index 0.
        let idx = MultiCoordinator::new(vec![&mut a, &mut b]).acquire(ctx);
        assert_eq!(idx, 0);
        assert!(a.held_by(ctx));
        assert!(!b.is_held());
    }
}
