//! A submitted-and-awaited io_uring operation (spec.md §3 "I/O Handle", §4.7), grounded on the
//! richer lifecycle contract documented in `examples/original_source/coop/io/handle.h` (the
//! sibling `.cpp` in that tree implements an older, simpler version missing cancellation and
//! linked timeouts — this follows the header, since spec.md requires both).
//!
//! Lifecycle: `Submitted` (one CQE outstanding) -> optionally `CancellingOrTimed` (a second CQE
//! now also outstanding, for the `AsyncCancel`/`LinkTimeout` companion op) -> `Complete` (zero
//! outstanding). `pending_cqes` is the source of truth; [`IoHandle::flags`] just names it for
//! logging.

use std::ptr::NonNull;

use bitflags::bitflags;
use io_uring::{opcode, squeue, types};

use crate::context::Context;
use crate::coordinator::Coordinator;
use crate::io::descriptor::Descriptor;
use crate::io::ring::Ring;
use crate::list::Link;

bitflags! {
    /// Diagnostic snapshot of an [`IoHandle`]'s lifecycle, for logging — the authoritative state
    /// is `pending_cqes`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandleFlags: u8 {
        const SUBMITTED  = 0b001;
        const CANCELLING = 0b010;
        const COMPLETE   = 0b100;
    }
}

/// One submitted-and-awaited operation. Lives on the submitting context's own stack (a local in
/// whatever function calls [`IoHandle::submit`]) — its address must stay stable until
/// `pending_cqes` reaches zero, which `Drop` enforces by cancelling and draining if dropped early.
pub struct IoHandle {
    link: Link<IoHandle>,
    ring: NonNull<Ring>,
    descriptor: Option<NonNull<Descriptor>>,
    context: NonNull<Context>,
    coord: Coordinator,
    result: i32,
    pending_cqes: i32,
    timed_out: bool,
    timeout_ts: types::Timespec,
}

impl IoHandle {
    /// Construct armed (the owning context holds the inner coordinator, same convention as
    /// `Signal`/`TimerHandle`) but not yet submitted.
    pub fn new(ring: NonNull<Ring>, context: NonNull<Context>) -> Self {
        let mut coord = Coordinator::new();
        coord.try_acquire(context);
        Self {
            link: Link::new(),
            ring,
            descriptor: None,
            context,
            coord,
            result: 0,
            pending_cqes: 0,
            timed_out: false,
            timeout_ts: types::Timespec::new(),
        }
    }

    pub(crate) fn link_project(n: NonNull<IoHandle>) -> NonNull<Link<IoHandle>> {
        // `link` is the first field, so the addresses coincide.
        n.cast()
    }

    pub(crate) fn link_from_link(l: NonNull<Link<IoHandle>>) -> NonNull<IoHandle> {
        l.cast()
    }

    fn user_data(&self) -> u64 {
        (self as *const IoHandle) as u64
    }

    fn tagged_user_data(&self) -> u64 {
        self.user_data() | 1
    }

    pub fn flags(&self) -> HandleFlags {
        match self.pending_cqes {
            0 => HandleFlags::COMPLETE,
            1 => HandleFlags::SUBMITTED,
            _ => HandleFlags::CANCELLING,
        }
    }

    fn attach_descriptor(&mut self, descriptor: Option<NonNull<Descriptor>>) {
        self.descriptor = descriptor;
        if let Some(d) = descriptor {
            unsafe { (*d.as_ptr()).handles_mut().push_back(NonNull::from(&mut *self)) };
        }
    }

    /// Submit `entry` (with its user-data already owned by this call, not the caller) for
    /// completion. `descriptor`, if given, is the owning descriptor whose handle list this
    /// enrolls in so its `Drop` can find and cancel in-flight operations.
    pub fn submit(&mut self, entry: squeue::Entry, descriptor: Option<NonNull<Descriptor>>) {
        debug_assert_eq!(self.pending_cqes, 0, "IoHandle submitted while already in flight");
        self.pending_cqes = 1;
        self.attach_descriptor(descriptor);
        let tagged = entry.user_data(self.user_data());
        unsafe { (*self.ring.as_ptr()).push(tagged) };
    }

    /// Submit `entry` linked to a kernel-side timeout: two CQEs will arrive (the primary op,
    /// cancelled with `-ECANCELED` if the timeout wins; the `LinkTimeout` companion, which sets
    /// `timed_out` when it actually fires rather than being cancelled itself).
    pub fn submit_with_timeout(
        &mut self,
        entry: squeue::Entry,
        descriptor: Option<NonNull<Descriptor>>,
        timeout: std::time::Duration,
    ) {
        debug_assert_eq!(self.pending_cqes, 0, "IoHandle submitted while already in flight");
        self.pending_cqes = 2;
        self.attach_descriptor(descriptor);
        self.timeout_ts = types::Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());

        let primary = entry.user_data(self.user_data()).flags(squeue::Flags::IO_LINK);
        let companion = opcode::LinkTimeout::new(&self.timeout_ts as *const _)
            .build()
            .user_data(self.tagged_user_data());
        unsafe {
            let ring = &mut *self.ring.as_ptr();
            ring.push(primary);
            ring.push(companion);
        }
    }

    /// Request cancellation of an in-flight operation. A no-op if already complete.
    pub fn cancel(&mut self) {
        if self.pending_cqes == 0 {
            return;
        }
        self.pending_cqes += 1;
        let entry = opcode::AsyncCancel::new(self.user_data())
            .build()
            .user_data(self.tagged_user_data());
        unsafe { (*self.ring.as_ptr()).push(entry) };
    }

    fn finalize(&mut self, ctx: NonNull<Context>) {
        self.pending_cqes -= 1;
        if self.pending_cqes != 0 {
            return;
        }
        if let Some(d) = self.descriptor.take() {
            unsafe { (*d.as_ptr()).handles_mut().remove(NonNull::from(&mut *self)) };
        }
        self.coord.release(ctx, false);
    }

    /// Primary completion dispatch target (spec.md §4.7's tagged-pointer CQE routing).
    ///
    /// # Safety
    /// `handle` must point at a live `IoHandle` that has a primary completion outstanding.
    pub(crate) unsafe fn complete(handle: NonNull<IoHandle>, result: i32, ctx: NonNull<Context>) {
        unsafe {
            let this = &mut *handle.as_ptr();
            this.result = result;
            this.finalize(ctx);
        }
    }

    /// Secondary completion dispatch target: either an `AsyncCancel` or a `LinkTimeout` companion.
    ///
    /// # Safety
    /// `handle` must point at a live `IoHandle` that has a secondary completion outstanding.
    pub(crate) unsafe fn on_secondary_complete(handle: NonNull<IoHandle>, result: i32, ctx: NonNull<Context>) {
        unsafe {
            let this = &mut *handle.as_ptr();
            if result == -libc::ETIMEDOUT {
                this.timed_out = true;
            }
            this.finalize(ctx);
        }
    }

    /// Block until this handle's operation (and any companion cancel/timeout) fully completes, or
    /// the calling context is killed. Returns the raw completion result — `-ETIMEDOUT` if the
    /// linked timeout fired before the operation did, `-ECANCELED` if killed, otherwise whatever
    /// the kernel returned (spec.md §7).
    pub fn wait(&mut self) -> i32 {
        let ctx = crate::current::current().expect("IoHandle::wait() called outside a running context");
        let outcome = crate::multi_coordinator::coordinate_with_kill(ctx, vec![&mut self.coord]);
        if outcome.is_killed() {
            if self.pending_cqes != 0 {
                self.cancel();
                let ctx = self.context;
                self.coord.flash(ctx);
            }
            -libc::ECANCELED
        } else if self.timed_out {
            -libc::ETIMEDOUT
        } else {
            self.result
        }
    }
}

impl Drop for IoHandle {
    /// If still in flight, request cancellation and block (via `flash`) until the cancellation's
    /// own completion(s) arrive — an `IoHandle` must never outlive the operation it represents,
    /// or a stray completion would later write through freed memory.
    fn drop(&mut self) {
        if self.pending_cqes == 0 {
            debug_assert!(!self.link.is_linked());
            return;
        }
        self.cancel();
        let ctx = self.context;
        self.coord.flash(ctx);
    }
}
