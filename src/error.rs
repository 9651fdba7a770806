//! Typed errors for the core's own resource-exhaustion and shutdown-racing failure modes
//! (spec.md §7). Cancellation/timeout/kernel-error taxonomy for the I/O layer lives in
//! `io::error` since it's shaped differently (a raw errno, not a Rust-level enum of causes).
//!
//! Uses `thiserror`, the pattern this example pack reaches for over stringly-typed errors (e.g.
//! `adamtc007-ob-poc`'s `ob-poc` crate, `r3bl_terminal_async`'s `utils` crate).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoopError {
    #[error("failed to allocate a context stack")]
    StackAllocation,

    #[error("io_uring submission ring is exhausted")]
    RingExhausted,

    #[error("cross-thread submission queue is full")]
    SubmissionQueueFull,

    #[error("cooperator has already shut down")]
    CooperatorShutDown,
}
