//! # Loom of Fate - Task Scheduler
//!
//! A preemptive, priority-ordered scheduler. One circular list of tasks,
//! one lock, and a timer tick that drives every switch — voluntary yields
//! just raise the same interrupt early.

pub mod context;
pub mod scheduler;
pub mod stack;
pub mod syscalls;
pub mod task;

pub use scheduler::{Scheduler, SchedulerError};
pub use task::{Pid, Task, TaskState, Uid};

use context::{enter_first_task, switch_context};

/// Software interrupt vector wired to the same dispatcher as the timer
/// tick, so a voluntary yield goes through identical bookkeeping to a
/// preemption.
pub const YIELD_VECTOR: u8 = 0x81;

static SCHEDULER: Scheduler = Scheduler::new();

pub fn scheduler() -> &'static Scheduler {
    &SCHEDULER
}

/// Disable interrupts for the duration of `f`, restoring the prior flag
/// state afterward. Thin wrapper kept here so callers don't need to reach
/// into `mana_pool` directly for scheduling-adjacent code.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    crate::mana_pool::interrupt_lock::without_interrupts(f)
}

/// Install the idle task (pid 0, never terminates) and return its saved
/// stack pointer for the upcoming hand-off. Must run after `mana_pool::init`.
pub fn init(idle_entry: extern "C" fn() -> !, now_ms: u64) -> u64 {
    SCHEDULER.init(idle_entry as usize as u64, now_ms)
}

/// Spawn a new task. `parent` supplies the capability pool `initial_perms`
/// is ORed into (minus the non-inheritable bits).
pub fn spawn(
    entry_point: extern "C" fn() -> !,
    priority: u8,
    uid: Uid,
    parent: Pid,
    now_ms: u64,
) -> Result<Pid, SchedulerError> {
    SCHEDULER.create_task(entry_point as usize as u64, priority, uid, parent, now_ms)
}

pub fn current_pid() -> Pid {
    SCHEDULER.current_pid()
}

/// One-way hand-off from the boot stack into the idle task. Never returns.
///
/// # Safety
/// Must be called exactly once, after `init`, with interrupts still disabled.
pub unsafe fn begin(idle_sp: u64) -> ! {
    enter_first_task(idle_sp)
}

/// Force an immediate dispatch step via software interrupt, exactly as a
/// timer tick would.
pub fn yield_now() {
    // `int` takes a literal operand, so this must match YIELD_VECTOR by hand.
    unsafe {
        core::arch::asm!("int 0x81", options(nomem, nostack));
    }
}

/// Mark the current task sleeping until `now_ms + ms`, then yield.
pub fn sleep(now_ms: u64, ms: u64) {
    SCHEDULER.mark_current_sleeping(now_ms + ms);
    yield_now();
}

/// Mark the current task waiting for a message and yield once. Callers
/// (`nexus::receive`) loop this around a check of their own queue, the
/// same way a condvar wait is re-checked after waking rather than trusted
/// on its own.
pub fn wait_for_message() {
    SCHEDULER.mark_current_waiting_msg();
    yield_now();
}

/// Move `pid` back to `Ready` if it's currently `Sleeping` or
/// `WaitingMsg`. Called by `nexus::send`/`send_pointer` after a delivery
/// that might unblock a `receive` loop.
pub fn wake(pid: Pid) {
    SCHEDULER.wake(pid);
}

/// Disable interrupts, mark the current task terminated, and never run
/// it again. The task's slot is reclaimed by a later dispatch step once
/// another task observes it while scanning the ring.
pub fn exit() -> ! {
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
    SCHEDULER.mark_current_terminated();
    loop {
        yield_now();
    }
}

/// Called from the timer IRQ (and from the yield vector) with the number
/// of milliseconds elapsed since the last tick. Performs the dispatch step
/// and, if it picked a new task, switches to it.
///
/// # Safety
/// Must be called from interrupt context with interrupts already disabled.
pub unsafe fn on_tick(now_ms: u64, tick_ms: u32) {
    let outcome = SCHEDULER.dispatch_step(now_ms, tick_ms);
    if outcome.switched {
        switch_context(outcome.old_sp_slot, outcome.new_sp);
    }
}
