//! Thread-local "current cooperator/context" accessors (spec.md §2 "Self"), grounded on
//! `examples/original_source/coop/self.h`. Populated on loop entry, cleared on exit.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::context::Context;
use crate::cooperator::Cooperator;

thread_local! {
    static CURRENT_COOPERATOR: Cell<Option<NonNull<Cooperator>>> = const { Cell::new(None) };
    static CURRENT_CONTEXT: Cell<Option<NonNull<Context>>> = const { Cell::new(None) };
}

pub(crate) fn set_current_cooperator(coop: Option<NonNull<Cooperator>>) {
    CURRENT_COOPERATOR.with(|c| c.set(coop));
}

pub(crate) fn set_current_context(ctx: Option<NonNull<Context>>) {
    CURRENT_CONTEXT.with(|c| c.set(ctx));
}

/// The context presently running on this thread, if any is scheduled.
pub fn current() -> Option<NonNull<Context>> {
    CURRENT_CONTEXT.with(|c| c.get())
}

/// The cooperator owning this thread's loop, if one has been launched here.
pub fn cooperator() -> Option<NonNull<Cooperator>> {
    CURRENT_COOPERATOR.with(|c| c.get())
}

/// Yield the current context (spec.md §6 intra-cooperator API). Panics if called outside a
/// running context — matching the contract that every `Context` API is only callable while
/// actively scheduled.
pub fn yield_now(force: bool) -> bool {
    let ctx = current().expect("yield_now() called outside a running context");
    Context::yield_now(ctx, force)
}

pub fn is_killed() -> bool {
    let ctx = current().expect("is_killed() called outside a running context");
    unsafe { ctx.as_ref().is_killed() }
}

pub fn is_shutting_down() -> bool {
    let coop = cooperator().expect("is_shutting_down() called outside a cooperator thread");
    unsafe { coop.as_ref().is_shutting_down() }
}

/// Spawn `f` as a child of the running context (spec.md §6 intra-cooperator API: `Spawn`).
pub fn spawn(f: impl FnOnce() + 'static) -> bool {
    let coop = cooperator().expect("spawn() called outside a cooperator thread");
    unsafe { (*coop.as_ptr()).spawn(f) }
}

pub fn spawn_with_config(config: crate::config::SpawnConfiguration, f: impl FnOnce() + 'static) -> bool {
    let coop = cooperator().expect("spawn_with_config() called outside a cooperator thread");
    unsafe { (*coop.as_ptr()).spawn_with_config(config, f) }
}

pub fn spawn_with_handle(handle: &crate::context::Handle, f: impl FnOnce() + 'static) -> bool {
    let coop = cooperator().expect("spawn_with_handle() called outside a cooperator thread");
    unsafe { (*coop.as_ptr()).spawn_with_handle(handle, f) }
}
