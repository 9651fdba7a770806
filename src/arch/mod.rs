//! Architecture-specific half of the context switch primitive (spec.md §4.2).
//!
//! Only the register-save/restore assembly and initial-stack layout are architecture-specific;
//! everything above this module (context lifecycle, scheduling) is portable.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{context_switch, init_stack, SwitchResult};
