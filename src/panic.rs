//! # Panic / Diagnostic Path
//!
//! Every CPU exception dispatched through `attunement::idt` and every
//! `panic!()` in kernel code funnels through [`diagnostic_panic`]. Policy
//! decides what happens after the banner is printed: halt the core for
//! good, or terminate the offending task and hand control back to the
//! scheduler.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PanicPolicy {
    Halt = 0,
    SoftRecovery = 1,
}

/// Recoveries in a row before giving up and halting regardless of policy.
const MAX_CONSECUTIVE_RECOVERIES: u32 = 8;
const HALT_BANNER_SPIN_MS: u64 = 50;

const fn default_policy() -> PanicPolicy {
    if cfg!(debug_assertions) {
        PanicPolicy::SoftRecovery
    } else {
        PanicPolicy::Halt
    }
}

static POLICY: AtomicU8 = AtomicU8::new(0);
static CONSECUTIVE_PANICS: AtomicU32 = AtomicU32::new(0);

fn policy_from_raw(raw: u8) -> PanicPolicy {
    match raw {
        1 => PanicPolicy::SoftRecovery,
        _ => PanicPolicy::Halt,
    }
}

/// Called once at boot, after the console is up, to record the policy
/// that will govern every panic for the rest of this boot.
pub fn init() {
    POLICY.store(default_policy() as u8, Ordering::SeqCst);
}

pub fn set_policy(policy: PanicPolicy) {
    POLICY.store(policy as u8, Ordering::SeqCst);
}

pub fn policy() -> PanicPolicy {
    policy_from_raw(POLICY.load(Ordering::Relaxed))
}

/// Entry point for both the exception dispatcher and the `#[panic_handler]`.
/// Masks interrupts, prints a fixed banner, then either terminates the
/// current task and returns control to the scheduler (`SoftRecovery`) or
/// halts the core forever (`Halt`, or too many recoveries in a row).
pub fn diagnostic_panic(reason: &str) -> ! {
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }

    crate::println!();
    crate::println!("================================================");
    crate::println!("  KERNEL PANIC: {}", reason);
    crate::println!("  policy={:?}", policy());
    crate::println!("================================================");
    crate::println!();

    crate::attunement::timer::delay_ms(HALT_BANNER_SPIN_MS);

    let count = CONSECUTIVE_PANICS.fetch_add(1, Ordering::SeqCst) + 1;

    if policy() == PanicPolicy::SoftRecovery && count <= MAX_CONSECUTIVE_RECOVERIES {
        crate::println!("  soft recovery: terminating the current task");
        // The interrupt frame that brought us here captured IF=0 (we just
        // cli'd); re-enable before falling through to the scheduler so the
        // task we land on doesn't resume with the timer silenced.
        unsafe {
            crate::attunement::enable_interrupts();
        }
        recover();
    } else {
        crate::println!("  halting core");
        halt_forever();
    }
}

/// Resets the run of consecutive panics. Call this once a task has run
/// a full quantum cleanly, so an old failure doesn't count against a
/// later, unrelated one.
pub fn clear_recovery_count() {
    CONSECUTIVE_PANICS.store(0, Ordering::SeqCst);
}

fn recover() -> ! {
    crate::loom_of_fate::exit()
}

fn halt_forever() -> ! {
    loop {
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_debug_assertions() {
        let expected = if cfg!(debug_assertions) {
            PanicPolicy::SoftRecovery
        } else {
            PanicPolicy::Halt
        };
        assert_eq!(default_policy(), expected);
    }

    #[test]
    fn test_set_and_read_policy() {
        set_policy(PanicPolicy::SoftRecovery);
        assert_eq!(policy(), PanicPolicy::SoftRecovery);
        set_policy(PanicPolicy::Halt);
        assert_eq!(policy(), PanicPolicy::Halt);
    }
}
