//! # Task
//!
//! A task is the unit of scheduling: one stack, one priority, one
//! permission mask, one slot in the fixed arena the scheduler owns.

use super::context::prepare_initial_stack;
use super::stack::Stack;
use crate::mana_pool::capability_store::Capabilities;

pub type Pid = usize;

/// Sentinel `next` value marking the end of a circular ready-list run.
pub const NO_TASK: Pid = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Sleeping,
    WaitingMsg,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uid {
    Kernel,
    Root,
    User,
}

impl Uid {
    /// The permission mask a freshly created task of this uid starts with,
    /// before any capability inheritance from its parent is applied.
    pub fn baseline_capabilities(self) -> Capabilities {
        match self {
            Uid::Kernel => Capabilities::all(),
            Uid::Root => Capabilities::all() & !Capabilities::KERNEL_MODE,
            Uid::User => {
                Capabilities::MEMORY_ALLOC
                    | Capabilities::MEMORY_FREE
                    | Capabilities::MSG_SEND
                    | Capabilities::MSG_RECEIVE
            }
        }
    }
}

pub struct Task {
    pub pid: Pid,
    pub state: TaskState,
    pub uid: Uid,
    pub priority: u8,
    pub quantum_remaining: u32,
    pub base_quantum: u32,
    pub sleep_deadline_ms: u64,
    pub cpu_time_ms: u64,
    pub start_time_ms: u64,
    pub stack: Stack,
    pub permission_mask: Capabilities,
    /// The task's saved stack pointer. Meaningless while `state ==
    /// Running`, at which point the real value lives in the CPU's `rsp`.
    pub saved_sp: u64,
    /// Index of the next task in the scheduler's circular ready list.
    pub next: Pid,
}

impl Task {
    pub fn new(
        pid: Pid,
        entry_point: u64,
        priority: u8,
        uid: Uid,
        base_quantum: u32,
        start_time_ms: u64,
        stack: Stack,
    ) -> Self {
        let saved_sp = prepare_initial_stack(stack.top(), entry_point);
        Task {
            pid,
            state: TaskState::Ready,
            uid,
            priority,
            quantum_remaining: base_quantum,
            base_quantum,
            sleep_deadline_ms: 0,
            cpu_time_ms: 0,
            start_time_ms,
            stack,
            permission_mask: uid.baseline_capabilities(),
            saved_sp,
            next: NO_TASK,
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_baselines_differ() {
        assert!(Uid::Kernel.baseline_capabilities().contains(Capabilities::KERNEL_MODE));
        assert!(!Uid::Root.baseline_capabilities().contains(Capabilities::KERNEL_MODE));
        assert!(!Uid::User.baseline_capabilities().contains(Capabilities::TASK_CREATE));
    }

    #[test]
    fn test_new_task_starts_ready_with_full_quantum() {
        let stack = Stack::new().unwrap();
        let task = Task::new(1, 0x1000, 128, Uid::User, 20, 0, stack);
        assert_eq!(task.state, TaskState::Ready);
        assert_eq!(task.quantum_remaining, task.base_quantum);
        assert_eq!(task.next, NO_TASK);
        assert!(task.saved_sp < task.stack.top());
    }
}
