//! Typed taxonomy over a completion's raw result (spec.md §7: "kernel errors propagate verbatim;
//! cancellation and timeout are distinguishable from an ordinary kernel error"). The public
//! contract ([`crate::io::handle::IoHandle::wait`]) still returns a raw `i32` the way
//! `examples/original_source/coop/io/handle.h` does — this enum is a convenience for callers who
//! want to `match` instead of comparing against `-libc::ECANCELED` by hand.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("operation was cancelled")]
    Cancelled,
    #[error("operation timed out")]
    TimedOut,
    #[error("kernel error {0}")]
    Kernel(i32),
}

impl IoError {
    /// Classify a raw completion result: non-negative is `Ok`, otherwise an errno.
    pub fn from_raw(result: i32) -> Result<i32, IoError> {
        if result >= 0 {
            Ok(result)
        } else if result == -libc::ECANCELED {
            Err(IoError::Cancelled)
        } else if result == -libc::ETIMEDOUT {
            Err(IoError::TimedOut)
        } else {
            Err(IoError::Kernel(result))
        }
    }
}
