//! # Timer — TSC calibrated against the PIT
//!
//! Provides the kernel's one canonical clock source. `now_ns`/`now_us`/
//! `now_ms`/`now_s` are all derived from the time-stamp counter; the raw
//! PIT tick count only exists as a coarse liveness counter and as the
//! reference clock used once, at boot, to learn the TSC's frequency.

use core::arch::asm;
use core::sync::atomic::{AtomicU64, Ordering};

/// Window PIT channel 2 counts down over while we sample the TSC on
/// either side of it.
const CALIBRATION_MS: u64 = 10;
const PIT_GATE_PORT: u16 = 0x61;
const PIT_CH2_PORT: u16 = 0x42;
const PIT_CMD_PORT: u16 = 0x43;
const PIT_BASE_FREQ: u64 = 1_193_182;

static TSC_KHZ: AtomicU64 = AtomicU64::new(0);
static BOOT_TSC: AtomicU64 = AtomicU64::new(0);
static PIT_TICKS: AtomicU64 = AtomicU64::new(0);

#[inline]
unsafe fn outb(port: u16, val: u8) {
    asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
}

#[inline]
unsafe fn inb(port: u16) -> u8 {
    let v: u8;
    asm!("in al, dx", out("al") v, in("dx") port, options(nomem, nostack, preserves_flags));
    v
}

#[inline]
fn rdtsc() -> u64 {
    let hi: u32;
    let lo: u32;
    unsafe {
        asm!("rdtsc", out("edx") hi, out("eax") lo, options(nomem, nostack, preserves_flags));
    }
    ((hi as u64) << 32) | lo as u64
}

/// Gate PIT channel 2 (the old PC-speaker channel) for `CALIBRATION_MS`
/// via the port-0x61 speaker gate and count TSC ticks across the window.
/// Needs no IDT entry, so it can run before the IDT exists.
unsafe fn calibrate_against_pit() -> u64 {
    let count = (PIT_BASE_FREQ * CALIBRATION_MS / 1000) as u16;

    let gate = inb(PIT_GATE_PORT);
    outb(PIT_GATE_PORT, (gate & 0xFC) | 0x01); // gate on, speaker output off

    outb(PIT_CMD_PORT, 0b10_11_0000); // channel 2, lobyte/hibyte, mode 0, binary
    outb(PIT_CH2_PORT, (count & 0xFF) as u8);
    outb(PIT_CH2_PORT, ((count >> 8) & 0xFF) as u8);

    let start = rdtsc();
    // Mode 0: the channel's OUT line (bit 5 of 0x61) rises once the count
    // reaches zero.
    while inb(PIT_GATE_PORT) & 0x20 == 0 {
        core::hint::spin_loop();
    }
    let end = rdtsc();

    outb(PIT_GATE_PORT, gate);
    (end - start) / CALIBRATION_MS
}

/// Calibrate and record the boot TSC reference. Must run once, before
/// interrupts are enabled.
pub fn init() {
    let khz = unsafe { calibrate_against_pit() };
    TSC_KHZ.store(khz, Ordering::SeqCst);
    BOOT_TSC.store(rdtsc(), Ordering::SeqCst);
}

pub fn tsc_khz() -> u64 {
    TSC_KHZ.load(Ordering::Relaxed)
}

/// Raw cycle counter, for callers that need entropy-ish bits rather than
/// calibrated time (e.g. a boot-time stack canary seed).
pub fn cycle_counter() -> u64 {
    rdtsc()
}

fn elapsed_tsc() -> u64 {
    rdtsc().saturating_sub(BOOT_TSC.load(Ordering::Relaxed))
}

/// Zero on calibration failure, per the documented failure mode, rather
/// than dividing by zero or spinning forever.
pub fn now_ns() -> u64 {
    let khz = tsc_khz();
    if khz == 0 {
        return 0;
    }
    elapsed_tsc() * 1_000_000 / khz
}

pub fn now_us() -> u64 {
    now_ns() / 1_000
}

pub fn now_ms() -> u64 {
    now_ns() / 1_000_000
}

pub fn now_s() -> u64 {
    now_ns() / 1_000_000_000
}

fn delay_ns(ns: u64) {
    let khz = tsc_khz();
    if khz == 0 {
        return;
    }
    let target = elapsed_tsc() + ns * khz / 1_000_000;
    while elapsed_tsc() < target {
        core::hint::spin_loop();
    }
}

pub fn delay_us(us: u64) {
    delay_ns(us * 1_000);
}

pub fn delay_ms(ms: u64) {
    delay_ns(ms * 1_000_000);
}

/// Called from the timer IRQ on every tick (independent of the TSC clock).
pub fn tick() {
    PIT_TICKS.fetch_add(1, Ordering::Relaxed);
}

pub fn ticks() -> u64 {
    PIT_TICKS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_khz_yields_zero_time_not_panic() {
        TSC_KHZ.store(0, Ordering::SeqCst);
        assert_eq!(now_ns(), 0);
        assert_eq!(now_ms(), 0);
    }

    #[test]
    fn test_tick_counter_monotonic() {
        let before = ticks();
        tick();
        tick();
        assert_eq!(ticks(), before + 2);
    }
}
