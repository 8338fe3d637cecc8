//! # Heartwood Kernel Library
//!
//! Exports every kernel subsystem so `main.rs` and the test harness can
//! both drive them: the buddy allocator and capability store (`mana_pool`),
//! the preemptive scheduler (`loom_of_fate`), the arch trap layer
//! (`attunement`), inter-task messaging (`nexus`), and the console/panic
//! ambient stack.

#![no_std]
#![feature(abi_x86_interrupt)]

extern crate alloc;

pub mod attunement;
pub mod console;
pub mod drivers;
pub mod loom_of_fate;
pub mod mana_pool;
pub mod nexus;
pub mod panic;
pub mod stack_protection;
pub mod vga_buffer;

#[cfg(not(test))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    use alloc::string::ToString;
    let reason = info.message().to_string();
    panic::diagnostic_panic(&reason)
}
