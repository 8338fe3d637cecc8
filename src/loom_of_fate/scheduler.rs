//! # Scheduler
//!
//! One circular singly-linked list of tasks and a `current` pointer. The
//! timer IRQ drives every preemption through [`Scheduler::dispatch_step`];
//! `yield_now`/`sleep`/`exit` just adjust task state and then force that
//! same step to run early via a software interrupt.

use super::task::{Pid, Task, TaskState, Uid, NO_TASK};
use crate::mana_pool::capability_store::MAX_TASKS;
use crate::mana_pool::interrupt_lock::InterruptSafeLock;

/// Millisecond budget per quantum bucket, indexed by a priority's top 3
/// bits (`priority >> 5`). Smallest for real-time priorities, largest for
/// idle.
const QUANTUM_TABLE_MS: [u32; 8] = [1, 5, 10, 20, 50, 80, 120, 200];

pub fn quantum_for_priority(priority: u8) -> u32 {
    QUANTUM_TABLE_MS[(priority >> 5) as usize]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    OutOfTasks,
    NullEntryPoint,
    AllocationFailed,
}

/// What the caller must do after a dispatch step: nothing, or switch
/// stacks via `context::switch_context(old_sp_slot, new_sp)`.
pub struct DispatchOutcome {
    pub switched: bool,
    pub old_sp_slot: *mut u64,
    pub new_sp: u64,
}

impl DispatchOutcome {
    fn unchanged() -> Self {
        DispatchOutcome { switched: false, old_sp_slot: core::ptr::null_mut(), new_sp: 0 }
    }
}

struct SchedulerInner {
    tasks: [Option<Task>; MAX_TASKS],
    current: Pid,
    /// Re-entrance guard: a nested timer tick inside `dispatch_step` is a
    /// no-op, not a second dispatch.
    dispatching: bool,
}

impl SchedulerInner {
    fn find_free_slot(&self) -> Option<Pid> {
        self.tasks.iter().position(|t| t.is_none())
    }

    fn link_after(&mut self, after: Pid, pid: Pid) {
        let after_next = self.tasks[after].as_ref().unwrap().next;
        self.tasks[pid].as_mut().unwrap().next = after_next;
        self.tasks[after].as_mut().unwrap().next = pid;
    }

    fn dispatch_step(&mut self, now_ms: u64, tick_ms: u32) -> DispatchOutcome {
        if self.dispatching {
            return DispatchOutcome::unchanged();
        }
        self.dispatching = true;
        let outcome = self.dispatch_step_inner(now_ms, tick_ms);
        self.dispatching = false;
        outcome
    }

    fn dispatch_step_inner(&mut self, now_ms: u64, tick_ms: u32) -> DispatchOutcome {
        let current = self.current;

        {
            let cur = self.tasks[current].as_mut().expect("current task missing");
            cur.cpu_time_ms += tick_ms as u64;
            if !cur.stack.canary_intact() {
                panic!("stack overflow in task {}", current);
            }
            cur.quantum_remaining = cur.quantum_remaining.saturating_sub(tick_ms);
        }

        let start = self.tasks[current].as_ref().unwrap().next;
        let mut best: Option<Pid> = None;
        let mut prev = current;
        let mut scan = start;

        while scan != current && scan != NO_TASK {
            let scan_next = self.tasks[scan].as_ref().unwrap().next;
            let scan_state = self.tasks[scan].as_ref().unwrap().state;

            if scan_state == TaskState::Terminated {
                self.tasks[prev].as_mut().unwrap().next = scan_next;
                let _ = crate::mana_pool::capabilities().destroy(scan);
                self.tasks[scan] = None;
                scan = scan_next;
                continue;
            }

            if scan_state == TaskState::Sleeping {
                let t = self.tasks[scan].as_mut().unwrap();
                if t.sleep_deadline_ms <= now_ms {
                    t.state = TaskState::Ready;
                    t.quantum_remaining = t.base_quantum;
                }
            }

            if self.tasks[scan].as_ref().unwrap().is_runnable() {
                let better = match best {
                    None => true,
                    Some(b) => {
                        self.tasks[scan].as_ref().unwrap().priority
                            < self.tasks[b].as_ref().unwrap().priority
                    }
                };
                if better {
                    best = Some(scan);
                }
            }

            prev = scan;
            scan = scan_next;
        }

        let cur_state = self.tasks[current].as_ref().unwrap().state;
        let cur_priority = self.tasks[current].as_ref().unwrap().priority;
        let cur_quantum = self.tasks[current].as_ref().unwrap().quantum_remaining;

        let keep_current = cur_state == TaskState::Running
            && cur_quantum > 0
            && best.map_or(true, |b| cur_priority <= self.tasks[b].as_ref().unwrap().priority);

        if keep_current {
            return DispatchOutcome::unchanged();
        }

        let winner = best.unwrap_or(current);

        if cur_state == TaskState::Running {
            self.tasks[current].as_mut().unwrap().state = TaskState::Ready;
        }

        {
            let w = self.tasks[winner].as_mut().unwrap();
            w.state = TaskState::Running;
            w.quantum_remaining = w.base_quantum;
        }
        self.current = winner;

        if winner == current {
            return DispatchOutcome::unchanged();
        }

        DispatchOutcome {
            switched: true,
            old_sp_slot: &mut self.tasks[current].as_mut().unwrap().saved_sp as *mut u64,
            new_sp: self.tasks[winner].as_ref().unwrap().saved_sp,
        }
    }
}

/// Interrupt-safe handle to the global scheduler.
pub struct Scheduler {
    inner: InterruptSafeLock<SchedulerInner>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Scheduler {
            inner: InterruptSafeLock::new(
                SchedulerInner {
                    tasks: [const { None }; MAX_TASKS],
                    current: 0,
                    dispatching: false,
                },
                "SCHEDULER",
            ),
        }
    }

    /// Install the idle task at pid 0. Must run once, after `mana_pool`
    /// and the capability store are initialized.
    pub fn init(&self, idle_entry: u64, now_ms: u64) -> u64 {
        let mut inner = self.inner.lock();
        let stack = super::stack::Stack::new().expect("out of memory for idle task stack");
        let quantum = quantum_for_priority(255);
        let mut idle = Task::new(0, idle_entry, 255, Uid::Kernel, quantum, now_ms, stack);
        idle.state = TaskState::Running;
        idle.next = 0;
        let sp = idle.saved_sp;
        inner.tasks[0] = Some(idle);
        inner.current = 0;
        sp
    }

    pub fn create_task(
        &self,
        entry_point: u64,
        priority: u8,
        uid: Uid,
        parent: Pid,
        now_ms: u64,
    ) -> Result<Pid, SchedulerError> {
        if entry_point == 0 {
            return Err(SchedulerError::NullEntryPoint);
        }
        let mut inner = self.inner.lock();
        let pid = inner.find_free_slot().ok_or(SchedulerError::OutOfTasks)?;
        let stack = super::stack::Stack::new().ok_or(SchedulerError::AllocationFailed)?;
        let quantum = quantum_for_priority(priority);
        let task = Task::new(pid, entry_point, priority, uid, quantum, now_ms, stack);

        if crate::mana_pool::capabilities().create(pid, parent, uid.baseline_capabilities()).is_err() {
            return Err(SchedulerError::AllocationFailed);
        }

        inner.tasks[pid] = Some(task);
        inner.link_after(parent, pid);
        Ok(pid)
    }

    pub fn dispatch_step(&self, now_ms: u64, tick_ms: u32) -> DispatchOutcome {
        self.inner.lock().dispatch_step(now_ms, tick_ms)
    }

    pub fn current_pid(&self) -> Pid {
        self.inner.lock().current
    }

    pub fn mark_current_sleeping(&self, deadline_ms: u64) {
        let mut inner = self.inner.lock();
        let cur = inner.current;
        let t = inner.tasks[cur].as_mut().unwrap();
        t.state = TaskState::Sleeping;
        t.sleep_deadline_ms = deadline_ms;
    }

    pub fn mark_current_terminated(&self) {
        let mut inner = self.inner.lock();
        let cur = inner.current;
        inner.tasks[cur].as_mut().unwrap().state = TaskState::Terminated;
    }

    pub fn mark_current_waiting_msg(&self) {
        let mut inner = self.inner.lock();
        let cur = inner.current;
        inner.tasks[cur].as_mut().unwrap().state = TaskState::WaitingMsg;
    }

    pub fn wake(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        if let Some(t) = inner.tasks[pid].as_mut() {
            if t.state == TaskState::WaitingMsg || t.state == TaskState::Sleeping {
                t.state = TaskState::Ready;
                t.quantum_remaining = t.base_quantum;
            }
        }
    }

    pub fn permission_mask(&self, pid: Pid) -> Option<u16> {
        self.inner.lock().tasks[pid].as_ref().map(|t| t.permission_mask.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantum_table_monotonic() {
        for i in 1..QUANTUM_TABLE_MS.len() {
            assert!(QUANTUM_TABLE_MS[i] >= QUANTUM_TABLE_MS[i - 1]);
        }
    }

    #[test]
    fn test_quantum_for_priority_buckets() {
        assert_eq!(quantum_for_priority(0), 1);
        assert_eq!(quantum_for_priority(255), 200);
    }
}
