//! The io_uring submission/completion ring (spec.md §4.7), grounded on
//! `examples/original_source/coop/io/uring.h`/`.cpp`. One `Ring` per cooperator, built lazily on
//! the cooperator's own thread (an `io_uring` instance is not `Send`-safe to move between
//! threads once its fds are in use). Wraps the `io-uring` crate rather than hand-rolling the
//! syscalls, the way `examples/original_source` wraps liburing.

use std::os::fd::RawFd;
use std::ptr::NonNull;

use io_uring::{cqueue, opcode, squeue, types, IoUring};

use crate::config::RingConfig;
use crate::context::Context;
use crate::io::descriptor::Descriptor;
use crate::io::handle::IoHandle;

/// Tag bit distinguishing a handle's primary completion (bit clear) from a secondary one — an
/// `AsyncCancel`/`LinkTimeout` companion completion for the same handle (bit set). Mirrors
/// `examples/original_source/coop/io/handle.h`'s tagged-pointer `CQE` dispatch.
const SECONDARY_TAG: u64 = 1;

/// The reserved user-data value for the fire-and-forget `close` a [`Descriptor`] submits from its
/// own destructor — nothing waits on it, so there is no handle to dispatch to.
pub(crate) const CLOSE_USER_DATA: u64 = 0;

pub struct Ring {
    uring: IoUring,
    registered: Vec<RawFd>,
    pending_ops: usize,
}

impl Ring {
    pub fn new(config: RingConfig) -> std::io::Result<Self> {
        let uring = IoUring::new(config.entries)?;
        let registered = vec![-1i32; config.registered_slots as usize];
        if !registered.is_empty() {
            // Best-effort: some kernels/cgroups refuse file registration entirely. Fixed-file
            // descriptors are an optimization (spec.md §4.8), not load-bearing, so a failure here
            // just means `Descriptor::new_registered` will never find a free slot.
            let _ = uring.submitter().register_files(&registered);
        }
        Ok(Self { uring, registered, pending_ops: 0 })
    }

    pub fn pending_ops(&self) -> usize {
        self.pending_ops
    }

    /// Push `entry` onto the submission queue, retrying the flush if it's momentarily full.
    pub(crate) fn push(&mut self, entry: squeue::Entry) {
        self.pending_ops += 1;
        loop {
            let full = unsafe { self.uring.submission().push(&entry).is_err() };
            if !full {
                break;
            }
            let _ = self.uring.submit();
        }
    }

    fn flush(&mut self) {
        let _ = self.uring.submit();
    }

    /// Drain every completion currently available, dispatching each to the `IoHandle` its
    /// (untagged) user-data encodes, and return whether any completion was actually processed —
    /// the caller (`Cooperator::main_loop`) uses that to decide whether to keep looping instead
    /// of falling through to blocking on the submission queue. `ctx` is passed through to
    /// whichever context a completion unblocks, same contract as `TimerWheel::advance`.
    pub fn poll(&mut self, ctx: NonNull<Context>) -> bool {
        self.flush();
        let mut processed = false;
        loop {
            let cqe = {
                let mut completion = self.uring.completion();
                completion.sync();
                completion.next()
            };
            let Some(cqe) = cqe else { break };
            processed = true;
            self.pending_ops = self.pending_ops.saturating_sub(1);
            Self::dispatch(cqe, ctx);
        }
        processed
    }

    fn dispatch(cqe: cqueue::Entry, ctx: NonNull<Context>) {
        let tagged = cqe.user_data();
        if tagged == CLOSE_USER_DATA {
            return;
        }
        let secondary = tagged & SECONDARY_TAG != 0;
        let handle_ptr = (tagged & !SECONDARY_TAG) as *mut IoHandle;
        let Some(handle) = NonNull::new(handle_ptr) else { return };
        unsafe {
            if secondary {
                IoHandle::on_secondary_complete(handle, cqe.result(), ctx);
            } else {
                IoHandle::complete(handle, cqe.result(), ctx);
            }
        }
    }

    /// Opt into fixed-file registration for `descriptor`, per
    /// `examples/original_source/coop/io/descriptor.h`'s documented opt-in contract (the `.cpp` in
    /// the original registers every descriptor unconditionally, which contradicts its own header
    /// comment and would exhaust the small registration table immediately under load — see
    /// DESIGN.md). Returns whether a slot was found.
    pub(crate) fn register(&mut self, descriptor: &mut Descriptor) -> bool {
        for (idx, slot) in self.registered.iter_mut().enumerate() {
            if *slot < 0 {
                *slot = descriptor.fd();
                let _ = self
                    .uring
                    .submitter()
                    .register_files_update(idx as u32, &[descriptor.fd()]);
                descriptor.set_registered_index(idx as i32);
                return true;
            }
        }
        false
    }

    pub(crate) fn unregister(&mut self, descriptor: &mut Descriptor) {
        let idx = descriptor.registered_index();
        if idx < 0 {
            return;
        }
        if let Some(slot) = self.registered.get_mut(idx as usize) {
            *slot = -1;
            let _ = self.uring.submitter().register_files_update(idx as u32, &[-1]);
        }
        descriptor.set_registered_index(-1);
    }

    pub(crate) fn submit_close(&mut self, fd: RawFd) {
        let entry = opcode::Close::new(types::Fd(fd)).build().user_data(CLOSE_USER_DATA);
        self.push(entry);
    }
}
