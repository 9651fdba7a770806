//! One-shot broadcast notification built on a [`Coordinator`] (spec.md §4.5), grounded on
//! `examples/original_source/coop/signal.h`. Used for every context's kill signal and available
//! standalone for manual notifications.

use std::ptr::NonNull;

use crate::context::Context;
use crate::coordinator::Coordinator;

/// `{ signaled, coord }`. Armed on construction (held by the owner, so any `Wait` blocks);
/// fired exactly once (`signaled` only ever transitions `false -> true`).
pub struct Signal {
    signaled: bool,
    coord: Coordinator,
}

impl Signal {
    /// Construct a signal armed by `owner` — `owner` holds the inner coordinator until `notify`.
    pub fn new(owner: NonNull<Context>) -> Self {
        let mut coord = Coordinator::new();
        coord.try_acquire(owner);
        Self { signaled: false, coord }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    pub(crate) fn as_coordinator_mut(&mut self) -> &mut Coordinator {
        &mut self.coord
    }

    /// Reset the inner coordinator's holder after a `MultiCoordinator` consumes it via
    /// `try_acquire` (which would otherwise leave it permanently "held", deadlocking any future
    /// use — see `multi_coordinator.rs`'s kill-aware wrapper).
    pub(crate) fn reset_coordinator(&mut self) {
        self.coord.set_held_by(None);
    }

    /// Block `ctx` until `notify` is called. Returns immediately if already signaled.
    pub fn wait(&mut self, ctx: NonNull<Context>) {
        if self.signaled {
            return;
        }
        self.coord.acquire(ctx);
    }

    /// Fire the signal: every current and future waiter observes `is_signaled() == true`.
    /// Broadcasts to every waiter currently enrolled — this, not single-wake release, is what
    /// distinguishes a signal from a bare coordinator.
    pub fn notify(&mut self, ctx: NonNull<Context>, schedule: bool) {
        if self.signaled {
            return;
        }
        self.signaled = true;
        self.coord.set_held_by(None);
        while let Some(w) = self.coord.pop_waiter() {
            unsafe {
                crate::coordinator::mark_waiter_satisfied(w);
                let wctx = crate::coordinator::waiter_context(w);
                Context::unblock(ctx, wctx, false);
            }
        }
        if schedule {
            Context::yield_now(ctx, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooperator::Cooperator;

    #[test]
    fn notify_is_idempotent() {
        let coop = Cooperator::new_for_test();
        let owner = coop.test_context_ptr();
        let mut s = Signal::new(owner);
        assert!(!s.is_signaled());
        s.notify(owner, false);
        assert!(s.is_signaled());
        s.notify(owner, false);
        assert!(s.is_signaled());
    }

    #[test]
    fn wait_on_already_signaled_does_not_block() {
        let coop = Cooperator::new_for_test();
        let owner = coop.test_context_ptr();
        let mut s = Signal::new(owner);
        s.notify(owner, false);
        s.wait(owner);
    }
}
