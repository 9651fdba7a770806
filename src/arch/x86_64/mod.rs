//! x86-64 System V ABI context switch: save/restore callee-saved registers (`rbx`, `rbp`,
//! `r12`-`r15`) and the stack pointer. Grounded on
//! `examples/original_source/coop/detail/context_switch.cpp`/`.h` — this is a direct translation
//! of that five-instruction save/restore sequence into a Rust naked function, using the same
//! `#[unsafe(naked)]` / `core::arch::naked_asm!` facility the teacher's own preemptive-switch
//! trampoline uses (`valibali-cluu`'s `scheduler/mod.rs`), just targeting a cooperative
//! save-SP/load-SP handoff instead of an interrupt return frame.

use std::arch::naked_asm;

/// Discriminator `context_switch` returns to the resumer, identifying why the switched-away-from
/// context handed control back. Mirrors spec.md §4.1's `Exited | Yielded | Blocked` (the C++
/// source's `SchedulerJumpResult` also has `DEFAULT`/`RESUMED`, dead in the cooperative design —
/// dropped here).
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchResult {
    Exited = 0,
    Yielded = 1,
    Blocked = 2,
}

/// Save the caller's callee-saved registers and stack pointer into `*from_sp`, load `to_sp` as
/// the new stack pointer, restore callee-saved registers from it, and return to whoever last
/// switched away from `to_sp` — carrying `result` as the return value they observe.
///
/// # Safety
/// `to_sp` must point at a stack prepared either by a prior `context_switch` call (saved via
/// `from_sp` on some earlier invocation) or by [`init_stack`]. `from_sp` must be valid to write
/// through.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(from_sp: *mut *mut u8, to_sp: *mut u8, result: u64) -> u64 {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "mov rax, rdx",
        "ret",
    )
}

/// First code a freshly-initialized context executes once `context_switch` restores its initial
/// frame. `r12` carries the `Context*` per [`init_stack`]'s layout; this tail-calls into the
/// portable entry trampoline.
#[unsafe(naked)]
unsafe extern "C" fn context_trampoline() {
    naked_asm!(
        "mov rdi, r12",
        "call {entry}",
        entry = sym crate::context::context_entry_trampoline,
    )
}

/// Prepare a fresh stack so `context_switch` can resume into it for the first time, as though the
/// context had previously called `context_switch` itself. Returns the stack pointer to pass as
/// `to_sp`.
///
/// Layout (growing down from `stack_top`, which must be 16-byte aligned):
/// ```text
/// [safety-net return addr = abort]
/// [return addr = context_trampoline]   <- context_switch's `ret` lands here
/// [rbp = 0]
/// [rbx = 0]
/// [r12 = ctx]                          <- trampoline reads this as Context*
/// [r13 = 0]
/// [r14 = 0]
/// [r15 = 0]                            <- returned as the initial stack pointer
/// ```
///
/// # Safety
/// `stack_top` must be the top (highest address, exclusive) of a region at least large enough
/// for this frame, 16-byte aligned, and writable.
pub unsafe fn init_stack(stack_top: *mut u8, ctx: *mut crate::context::Context) -> *mut u8 {
    unsafe {
        let mut sp = stack_top as *mut u64;

        unsafe extern "C" fn abort_trampoline() -> ! {
            std::process::abort()
        }

        sp = sp.sub(1);
        *sp = abort_trampoline as usize as u64;

        sp = sp.sub(1);
        *sp = context_trampoline as usize as u64;

        sp = sp.sub(1);
        *sp = 0; // rbp
        sp = sp.sub(1);
        *sp = 0; // rbx
        sp = sp.sub(1);
        *sp = ctx as u64; // r12 = Context*
        sp = sp.sub(1);
        *sp = 0; // r13
        sp = sp.sub(1);
        *sp = 0; // r14
        sp = sp.sub(1);
        *sp = 0; // r15

        sp as *mut u8
    }
}
