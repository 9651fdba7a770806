//! A file descriptor owned under the cooperator's I/O layer (spec.md §4.8), grounded on
//! `examples/original_source/coop/io/descriptor.h`/`.cpp`. Tracks every [`IoHandle`] currently
//! in flight against this fd so `Drop` can cancel them before the fd itself is closed, and
//! optionally occupies a fixed-file registration slot.

use std::os::fd::RawFd;
use std::ptr::NonNull;

use crate::io::handle::IoHandle;
use crate::io::ring::Ring;
use crate::list::List;

pub struct Descriptor {
    fd: RawFd,
    registered_index: i32,
    handles: List<IoHandle>,
    ring: NonNull<Ring>,
}

impl Descriptor {
    pub fn new(ring: NonNull<Ring>, fd: RawFd) -> Self {
        Self {
            fd,
            registered_index: -1,
            handles: List::new(IoHandle::link_project, IoHandle::link_from_link),
            ring,
        }
    }

    /// Construct and opt into the fixed-file registration table, per
    /// `examples/original_source/coop/io/descriptor.h`'s documented opt-in contract. A no-op
    /// (falls back to plain fd-based submission) if the table is full.
    pub fn new_registered(ring: NonNull<Ring>, fd: RawFd) -> Self {
        let mut d = Self::new(ring, fd);
        unsafe { (*ring.as_ptr()).register(&mut d) };
        d
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_registered(&self) -> bool {
        self.registered_index >= 0
    }

    pub(crate) fn registered_index(&self) -> i32 {
        self.registered_index
    }

    pub(crate) fn set_registered_index(&mut self, idx: i32) {
        self.registered_index = idx;
    }

    pub(crate) fn ring(&self) -> NonNull<Ring> {
        self.ring
    }

    pub(crate) fn handles_mut(&mut self) -> &mut List<IoHandle> {
        &mut self.handles
    }

    /// Close the descriptor early (before `Drop`), e.g. to observe the close's result rather than
    /// letting it fire-and-forget at teardown.
    pub fn close(&mut self) -> bool {
        if self.fd < 0 {
            return false;
        }
        self.cancel_inflight();
        if self.registered_index >= 0 {
            unsafe { (*self.ring.as_ptr()).unregister(self) };
        }
        unsafe { (*self.ring.as_ptr()).submit_close(self.fd) };
        self.fd = -1;
        true
    }

    fn cancel_inflight(&mut self) {
        let mut inflight = Vec::new();
        self.handles.visit_mut(|h| {
            inflight.push(h);
            true
        });
        for h in inflight {
            unsafe { (*h.as_ptr()).cancel() };
        }
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        self.close();
    }
}
