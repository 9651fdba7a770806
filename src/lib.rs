//! `coop` — a cooperative, single-threaded concurrency runtime.
//!
//! One OS thread runs a [`cooperator::Cooperator`] loop that multiplexes many [`context::Context`]
//! values (each with its own stack) cooperatively: a context blocks by context-switching back to
//! the loop rather than by blocking the OS thread, and the loop resumes it again once whatever it
//! was waiting on (a [`coordinator::Coordinator`], a [`signal::Signal`], a [`timer`] deadline, or
//! an [`io`] completion) is ready.
//!
//! See `DESIGN.md` at the repository root for the grounding ledger tying each module back to the
//! production repo this crate is modeled on, and `SPEC_FULL.md` for the full specification.

pub mod arch;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod cooperator;
pub mod current;
pub mod error;
pub mod io;
pub mod list;
pub mod logging;
pub mod multi_coordinator;
pub mod signal;
pub mod stack;
pub mod timer;

pub use context::{Context, ContextState, Handle};
pub use cooperator::{launch, reset_global_shutdown, shutdown_all, Cooperator, CooperatorHandle, Launchable};
pub use coordinator::{CoordinatedSemaphore, Coordinator};
pub use current::{
    cooperator as current_cooperator, current, is_killed, is_shutting_down, spawn, spawn_with_config,
    spawn_with_handle, yield_now,
};
pub use error::CoopError;
pub use multi_coordinator::{coordinate_with, coordinate_with_kill, CoordinateOutcome};
pub use signal::Signal;
pub use timer::{sleep, SleepOutcome};
