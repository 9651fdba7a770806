//! One-holder, many-waiters blocking primitive (spec.md §4.3), grounded on
//! `examples/original_source/coop/coordinator.h`/`.cpp`.
//!
//! A waiter's node lives on the blocked context's own stack (a local in `Coordinator::acquire`'s
//! call frame) — it stays valid because our context switch suspends that stack rather than
//! unwinding it. `MultiCoordinator` (see `multi_coordinator.rs`) enrolls the same node type on
//! several coordinators at once.

use std::ptr::NonNull;

use crate::context::Context;
use crate::list::{Link, List};

/// A FIFO enrollment node. Embeds the `Link` the owning `Coordinator`'s waiter list threads
/// through, plus the back-pointer and one-shot satisfied flag the spec's data model calls for.
pub struct Waiter {
    link: Link<Waiter>,
    context: NonNull<Context>,
    satisfied: bool,
}

impl Waiter {
    pub(crate) fn new(context: NonNull<Context>) -> Self {
        Self { link: Link::new(), context, satisfied: false }
    }

    pub(crate) fn satisfied(&self) -> bool {
        self.satisfied
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.link.is_linked()
    }

    fn project(node: NonNull<Waiter>) -> NonNull<Link<Waiter>> {
        unsafe { NonNull::new_unchecked(&mut (*node.as_ptr()).link as *mut _) }
    }

    fn node_from_link(link: NonNull<Link<Waiter>>) -> NonNull<Waiter> {
        // `link` is the first field of `Waiter`, so the addresses coincide.
        link.cast()
    }
}

/// Mark an enrolled waiter satisfied from outside this module (used by [`crate::signal::Signal`]
/// and [`crate::multi_coordinator::MultiCoordinator`], which manipulate waiter nodes enrolled on
/// coordinators they don't own).
///
/// # Safety
/// `w` must point at a live `Waiter`.
pub(crate) unsafe fn mark_waiter_satisfied(w: NonNull<Waiter>) {
    unsafe { (*w.as_ptr()).satisfied = true };
}

/// # Safety
/// `w` must point at a live `Waiter`.
pub(crate) unsafe fn waiter_context(w: NonNull<Waiter>) -> NonNull<Context> {
    unsafe { (*w.as_ptr()).context }
}

/// `held_by == None` implies the waiter list is empty (spec.md §3 Coordinator invariant).
pub struct Coordinator {
    held_by: Option<NonNull<Context>>,
    waiters: List<Waiter>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self { held_by: None, waiters: List::new(Waiter::project, Waiter::node_from_link) }
    }

    pub fn is_held(&self) -> bool {
        self.held_by.is_some()
    }

    pub fn held_by(&self, ctx: NonNull<Context>) -> bool {
        self.held_by == Some(ctx)
    }

    /// Never suspends. Returns `true` iff the coordinator was free and is now held by `ctx`.
    pub fn try_acquire(&mut self, ctx: NonNull<Context>) -> bool {
        if self.held_by.is_none() {
            self.held_by = Some(ctx);
            true
        } else {
            false
        }
    }

    /// Block `ctx` until the coordinator is released to it. Suspends (context-switches away) if
    /// the coordinator is currently held.
    pub fn acquire(&mut self, ctx: NonNull<Context>) {
        if self.try_acquire(ctx) {
            return;
        }
        let mut waiter = Waiter::new(ctx);
        let wp = NonNull::from(&mut waiter);
        unsafe {
            self.waiters.push_back(wp);
            Context::block(ctx);
        }
        debug_assert!(waiter.satisfied, "woken without being satisfied");
    }

    /// Release the coordinator. If anyone is waiting, ownership transfers directly to the FIFO
    /// head — not released-then-re-acquired. `schedule` controls whether the unblocked waiter
    /// runs immediately (switched to directly) or is merely moved to the run queue.
    pub fn release(&mut self, ctx: NonNull<Context>, schedule: bool) {
        if self.held_by.is_none() {
            // No-op release: used by Signal::notify, which clears held_by itself before any
            // MultiCoordinator cleanup might also call release.
            return;
        }
        self.held_by = None;
        let Some(next) = self.waiters.pop_front() else { return };
        unsafe {
            (*next.as_ptr()).satisfied = true;
            let next_ctx = (*next.as_ptr()).context;
            self.held_by = Some(next_ctx);
            Context::unblock(ctx, next_ctx, schedule);
        }
    }

    /// "Wait until currently free." No-op if already unheld.
    pub fn flash(&mut self, ctx: NonNull<Context>) {
        if self.held_by.is_none() {
            return;
        }
        self.acquire(ctx);
        self.release(ctx, false);
    }

    pub(crate) fn enqueue_waiter(&mut self, w: NonNull<Waiter>) {
        unsafe { self.waiters.push_back(w) };
    }

    pub(crate) fn dequeue_waiter(&mut self, w: NonNull<Waiter>) {
        unsafe { self.waiters.remove(w) };
    }

    pub(crate) fn pop_waiter(&mut self) -> Option<NonNull<Waiter>> {
        self.waiters.pop_front()
    }

    pub(crate) fn set_held_by(&mut self, ctx: Option<NonNull<Context>>) {
        self.held_by = ctx;
    }
}

/// A counting semaphore built directly on [`Coordinator`]'s waiter queue — supplemented from
/// `examples/original_source/coop/coordinator.h`'s `CoordinatedSemaphore` (spec.md §1 treats
/// "coordinator" as the fundamental primitive; this is its natural second user, alongside
/// `MultiCoordinator`). Deliberately bypasses `Coordinator::acquire`/`release`'s single-holder
/// bookkeeping — `held_by` doesn't make sense for a resource count above one — and uses the
/// waiter queue directly instead.
pub struct CoordinatedSemaphore {
    available: i64,
    waiters: Coordinator,
}

impl CoordinatedSemaphore {
    pub fn new(initial: i64) -> Self {
        Self { available: initial, waiters: Coordinator::new() }
    }

    pub fn try_acquire(&mut self) -> bool {
        if self.available > 0 {
            self.available -= 1;
            true
        } else {
            false
        }
    }

    pub fn acquire(&mut self, ctx: NonNull<Context>) {
        if self.try_acquire() {
            return;
        }
        let mut waiter = Waiter::new(ctx);
        let wp = NonNull::from(&mut waiter);
        unsafe {
            self.waiters.enqueue_waiter(wp);
            Context::block(ctx);
        }
        debug_assert!(waiter.satisfied);
    }

    pub fn release(&mut self, ctx: NonNull<Context>) {
        self.available += 1;
        if let Some(w) = self.waiters.pop_waiter() {
            self.available -= 1;
            unsafe {
                (*w.as_ptr()).satisfied = true;
                let waiter_ctx = (*w.as_ptr()).context;
                Context::unblock(ctx, waiter_ctx, true);
            }
        }
    }
}
