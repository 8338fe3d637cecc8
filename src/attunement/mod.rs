//! # Attunement — Arch Trap Layer
//!
//! Legacy-PIC remap, the interrupt descriptor table, the PIT/TSC timer,
//! and the keyboard ring buffer. Everything the rest of the kernel runs
//! on top of.

pub mod idt;
pub mod keyboard;
pub mod pit;
pub mod timer;

use pic8259::ChainedPics;
use crate::mana_pool::InterruptSafeLock;

/// IRQs 0-15 are remapped to land at 32-47, clear of the CPU exception range.
pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub const TIMER_IRQ: u8 = PIC_1_OFFSET;
pub const KEYBOARD_IRQ: u8 = PIC_1_OFFSET + 1;

pub static PICS: InterruptSafeLock<ChainedPics> =
    InterruptSafeLock::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) }, "PICS");

/// Remap the PICs, load the IDT, calibrate the timer, and arm the
/// keyboard — everything up through component B in the boot sequence.
/// Interrupts remain masked until the caller explicitly enables them,
/// once every later subsystem (scheduler, capabilities, queues) is ready.
pub fn init() {
    unsafe {
        PICS.lock().initialize();
    }
    idt::init();
    timer::init();
    let tick = pit::Pit::new();
    unsafe {
        tick.initialize();
    }
    keyboard::init();
}

/// # Safety
/// Must only be called once every subsystem interrupt handlers depend on
/// (scheduler, capability store, message queues) has finished initializing.
pub unsafe fn enable_interrupts() {
    core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
}
