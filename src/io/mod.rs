//! Async I/O submission/completion layer (spec.md §4.7–§4.8), built on io_uring via the
//! `io-uring` crate. Grounded on `examples/original_source/coop/io/*`. Higher-level verbs (read,
//! write, accept, connect, ...) are out of scope per spec.md §1 — callers build them on top of
//! [`handle::IoHandle`]'s submit/wait contract, the same way the original's per-verb files
//! (`read.cpp`, `accept.cpp`, ...) are thin wrappers around `Handle`.

pub mod descriptor;
pub mod error;
pub mod handle;
pub mod ring;

pub use descriptor::Descriptor;
pub use error::IoError;
pub use handle::{HandleFlags, IoHandle};
pub use ring::Ring;
