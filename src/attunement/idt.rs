//! # Interrupt Descriptor Table
//!
//! Built entirely on the `x86_64` crate's typed `InterruptDescriptorTable`:
//! exceptions 0-31 each route through [`exception_common`] before handing
//! off to the panic path, IRQs 32-47 are the remapped legacy PIC lines,
//! and 0x80/0x81 are software gates (syscall dispatch and the forced
//! scheduler tick, respectively) registered as raw handler addresses
//! since their naked-asm bodies manage the full register save/restore
//! themselves.

use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::VirtAddr;
use core::mem::MaybeUninit;

use super::{keyboard, timer, PICS, TIMER_IRQ, KEYBOARD_IRQ};

#[link_section = ".rune"]
static mut IDT: MaybeUninit<InterruptDescriptorTable> = MaybeUninit::uninit();
static mut IDT_INITIALIZED: bool = false;

/// Lines 34-47 (legacy IRQs other than timer/keyboard) dispatch through
/// this table. Lines 0 and 1 are reserved and rejected by `install_irq`.
const MAX_OTHER_IRQS: usize = 16;
static mut OTHER_IRQ_HANDLERS: [Option<fn()>; MAX_OTHER_IRQS] = [None; MAX_OTHER_IRQS];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    ReservedLine,
    OutOfRange,
}

/// Install a handler for legacy IRQ `line` (2..=15; 0 and 1 are reserved
/// for the timer and keyboard). Overwrites any previously installed handler.
pub fn install_irq(line: u8, handler: fn()) -> Result<(), IrqError> {
    if line == 0 || line == 1 {
        return Err(IrqError::ReservedLine);
    }
    let idx = line as usize;
    if idx >= MAX_OTHER_IRQS {
        return Err(IrqError::OutOfRange);
    }
    unsafe {
        OTHER_IRQ_HANDLERS[idx] = Some(handler);
    }
    Ok(())
}

pub fn uninstall_irq(line: u8) -> Result<(), IrqError> {
    if line == 0 || line == 1 {
        return Err(IrqError::ReservedLine);
    }
    let idx = line as usize;
    if idx >= MAX_OTHER_IRQS {
        return Err(IrqError::OutOfRange);
    }
    unsafe {
        OTHER_IRQ_HANDLERS[idx] = None;
    }
    Ok(())
}

pub fn init() {
    unsafe {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_error);
        idt.debug.set_handler_fn(debug);
        idt.non_maskable_interrupt.set_handler_fn(nmi);
        idt.breakpoint.set_handler_fn(breakpoint);
        idt.overflow.set_handler_fn(overflow);
        idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded);
        idt.invalid_opcode.set_handler_fn(invalid_opcode);
        idt.device_not_available.set_handler_fn(device_not_available);
        idt.double_fault.set_handler_fn(double_fault);
        idt.invalid_tss.set_handler_fn(invalid_tss);
        idt.segment_not_present.set_handler_fn(segment_not_present);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault);
        idt.general_protection_fault.set_handler_fn(general_protection_fault);
        idt.page_fault.set_handler_fn(page_fault);
        idt.x87_floating_point.set_handler_fn(x87_floating_point);
        idt.alignment_check.set_handler_fn(alignment_check);
        idt.machine_check.set_handler_fn(machine_check);
        idt.simd_floating_point.set_handler_fn(simd_floating_point);
        idt.virtualization.set_handler_fn(virtualization);

        idt[32].set_handler_fn(timer_interrupt_handler);
        idt[33].set_handler_fn(keyboard_interrupt_handler);
        for line in 2usize..16 {
            idt[32 + line].set_handler_fn(other_irq_handlers::HANDLERS[line]);
        }

        // Raw gates: our own naked routines push/pop every GP register and
        // `iretq` themselves, so they're registered by address rather than
        // as a typed `extern "x86-interrupt" fn`.
        idt[0x80]
            .set_handler_addr(VirtAddr::new(crate::loom_of_fate::syscalls::syscall_entry as u64));
        idt[0x81].set_handler_fn(yield_interrupt_handler);

        IDT.write(idt);
        IDT_INITIALIZED = true;
        IDT.assume_init_ref().load();
    }
}

/// # Safety
/// Must only be called after `init`.
pub unsafe fn get_idt() -> &'static InterruptDescriptorTable {
    if !IDT_INITIALIZED {
        panic!("IDT not initialized");
    }
    IDT.assume_init_ref()
}

/// Prints the interrupt frame (and CR2, for page faults) then hands off
/// to the panic path. Never returns.
fn exception_common(name: &'static str, frame: &InterruptStackFrame, error_code: Option<u64>, cr2: Option<u64>) -> ! {
    crate::println!("=== CPU EXCEPTION: {} ===", name);
    crate::println!(
        "rip={:#x} cs={:#x} rflags={:#x} rsp={:#x} ss={:#x}",
        frame.instruction_pointer.as_u64(),
        frame.code_segment,
        frame.cpu_flags,
        frame.stack_pointer.as_u64(),
        frame.stack_segment
    );
    if let Some(code) = error_code {
        crate::println!("error_code={:#x}", code);
    }
    if let Some(addr) = cr2 {
        crate::println!("cr2={:#x}", addr);
    }
    crate::panic::diagnostic_panic(name)
}

macro_rules! exception_handler {
    ($name:ident, $label:expr) => {
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame) {
            exception_common($label, &frame, None, None);
        }
    };
}

macro_rules! exception_handler_with_code {
    ($name:ident, $label:expr) => {
        extern "x86-interrupt" fn $name(frame: InterruptStackFrame, error_code: u64) {
            exception_common($label, &frame, Some(error_code), None);
        }
    };
}

exception_handler!(divide_error, "Division By Zero");

extern "x86-interrupt" fn debug(frame: InterruptStackFrame) {
    crate::println!("=== CPU EXCEPTION: Debug ===");
    crate::println!("rip={:#x}", frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn nmi(_frame: InterruptStackFrame) {}

extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
    crate::println!("=== Breakpoint at {:#x} ===", frame.instruction_pointer.as_u64());
}

exception_handler!(overflow, "Overflow");
exception_handler!(bound_range_exceeded, "Bound Range Exceeded");
exception_handler!(invalid_opcode, "Invalid Opcode");
exception_handler!(device_not_available, "Device Not Available");
exception_handler_with_code!(invalid_tss, "Invalid TSS");
exception_handler_with_code!(segment_not_present, "Segment Not Present");
exception_handler_with_code!(stack_segment_fault, "Stack Segment Fault");
exception_handler_with_code!(general_protection_fault, "General Protection Fault");
exception_handler!(x87_floating_point, "x87 Floating Point");
exception_handler_with_code!(alignment_check, "Alignment Check");
exception_handler!(simd_floating_point, "SIMD Floating Point");
exception_handler!(virtualization, "Virtualization");

extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, _error_code: u64) -> ! {
    exception_common("Double Fault", &frame, None, None)
}

extern "x86-interrupt" fn machine_check(frame: InterruptStackFrame) -> ! {
    exception_common("Machine Check", &frame, None, None)
}

extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
    let cr2: u64;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    exception_common("Page Fault", &frame, Some(error_code.bits()), Some(cr2));
}

extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    timer::tick();
    unsafe {
        PICS.lock().notify_end_of_interrupt(TIMER_IRQ);
        crate::loom_of_fate::on_tick(timer::now_ms(), 1);
    }
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_frame: InterruptStackFrame) {
    keyboard::on_interrupt();
    unsafe {
        PICS.lock().notify_end_of_interrupt(KEYBOARD_IRQ);
    }
}

/// Software interrupt a voluntary `yield` raises; drives the identical
/// dispatch step a timer tick would, just with no quantum charged.
extern "x86-interrupt" fn yield_interrupt_handler(_frame: InterruptStackFrame) {
    unsafe {
        crate::loom_of_fate::on_tick(timer::now_ms(), 0);
    }
}

mod other_irq_handlers {
    use super::*;
    use x86_64::structures::idt::HandlerFunc;

    macro_rules! stub {
        ($name:ident, $line:expr) => {
            extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
                unsafe {
                    if let Some(h) = OTHER_IRQ_HANDLERS[$line] {
                        h();
                    }
                    PICS.lock().notify_end_of_interrupt(32 + $line as u8);
                }
            }
        };
    }

    stub!(irq2, 2);
    stub!(irq3, 3);
    stub!(irq4, 4);
    stub!(irq5, 5);
    stub!(irq6, 6);
    stub!(irq7, 7);
    stub!(irq8, 8);
    stub!(irq9, 9);
    stub!(irq10, 10);
    stub!(irq11, 11);
    stub!(irq12, 12);
    stub!(irq13, 13);
    stub!(irq14, 14);
    stub!(irq15, 15);

    pub static HANDLERS: [HandlerFunc; MAX_OTHER_IRQS] = [
        irq2, irq2, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13, irq14, irq15,
    ];
}
