//! # Context Switching
//!
//! Every task's persisted state is a single stack pointer. Switching means
//! pushing the outgoing task's callee-saved registers, swapping `rsp`, and
//! popping the incoming task's. A timer-driven preemption is not
//! special-cased: the IRQ handler calls the same routine a cooperative
//! `yield` does, so the `iretq` that actually leaves the interrupt happens
//! naturally and later, whenever that same task is switched back to and
//! its call stack unwinds back through the handler that preempted it.

use core::arch::naked_asm;
use alloc::alloc::Layout;

/// Number of 8-byte words `prepare_initial_stack` reserves below the
/// nominal stack top: six callee-saved registers plus a return address.
const INITIAL_FRAME_WORDS: u64 = 7;

/// Build the initial stack contents for a task that has never run, so that
/// `switch_context` can bring it up for the first time exactly as it would
/// resume any other sleeping task. `rbx` is seeded with `entry_point`;
/// [`task_trampoline`] reads it back out of that register once control
/// lands there.
///
/// Returns the stack pointer to record as the task's saved SP.
pub fn prepare_initial_stack(stack_top: u64, entry_point: u64) -> u64 {
    let mut sp = stack_top & !0xF;
    unsafe {
        sp -= 8;
        (sp as *mut u64).write(task_trampoline as usize as u64); // return address
        sp -= 8;
        (sp as *mut u64).write(0); // rbp
        sp -= 8;
        (sp as *mut u64).write(entry_point); // rbx
        sp -= 8;
        (sp as *mut u64).write(0); // r12
        sp -= 8;
        (sp as *mut u64).write(0); // r13
        sp -= 8;
        (sp as *mut u64).write(0); // r14
        sp -= 8;
        (sp as *mut u64).write(0); // r15
    }
    sp
}

/// Save the outgoing task's callee-saved registers into `*old_sp`, switch
/// `rsp` to `new_sp`, and resume whatever the incoming task last switched
/// away from.
///
/// # Safety
/// `old_sp` must point at a valid, writable `u64` slot belonging to the
/// currently running task. `new_sp` must be a stack pointer previously
/// produced by this function or by [`prepare_initial_stack`].
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old_sp: *mut u64, _new_sp: u64) {
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
        "ret",
    );
}

/// One-way hand-off from the boot stack into the first task. There is no
/// outgoing context to save.
///
/// # Safety
/// Never returns; `sp` must come from [`prepare_initial_stack`].
#[unsafe(naked)]
pub unsafe extern "C" fn enter_first_task(_sp: u64) -> ! {
    naked_asm!(
        "mov rsp, rdi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// Landing pad for a task's first dispatch. `rbx` carries the entry point
/// left there by `prepare_initial_stack`.
#[unsafe(naked)]
unsafe extern "C" fn task_trampoline() -> ! {
    naked_asm!(
        "sti",
        "jmp rbx",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_initial_stack_layout() {
        let layout = Layout::from_size_align(4096, 16).unwrap();
        let base = unsafe { alloc::alloc::alloc(layout) } as u64;
        let top = base + 4096;

        let sp = prepare_initial_stack(top, 0xDEAD_BEEF);
        assert_eq!(top - sp, INITIAL_FRAME_WORDS * 8);

        unsafe {
            assert_eq!((sp as *const u64).read(), 0); // r15
            assert_eq!(((sp + 8) as *const u64).read(), 0); // r14
            assert_eq!(((sp + 16) as *const u64).read(), 0); // r13
            assert_eq!(((sp + 24) as *const u64).read(), 0); // r12
            assert_eq!(((sp + 32) as *const u64).read(), 0xDEAD_BEEF); // rbx
            assert_eq!(((sp + 40) as *const u64).read(), 0); // rbp
            assert_eq!(((sp + 48) as *const u64).read(), task_trampoline as usize as u64);
            alloc::alloc::dealloc(base as *mut u8, layout);
        }
    }
}
