//! # Nexus — Inter-task Messaging
//!
//! One bounded queue per task, allocated lazily on first send. `receiver
//! == 0` broadcasts to every other task that currently has a queue,
//! never back to task 0 itself.

pub mod envelope;
pub mod queue;
pub mod slab;

pub use envelope::Envelope;
pub use queue::Queue;

use crate::mana_pool::capability_store::MAX_TASKS;
use crate::mana_pool::InterruptSafeLock;
use alloc::boxed::Box;
use core::mem::MaybeUninit;

const BROADCAST: usize = 0;

struct NexusState {
    queues: [Option<Box<Queue>>; MAX_TASKS],
}

static mut NEXUS: MaybeUninit<InterruptSafeLock<NexusState>> = MaybeUninit::uninit();
static mut NEXUS_INITIALIZED: bool = false;

pub fn init() {
    unsafe {
        let state = NexusState { queues: core::array::from_fn(|_| None) };
        let lock = InterruptSafeLock::new(state, "NEXUS");
        core::ptr::write(core::ptr::addr_of_mut!(NEXUS).cast(), lock);
        NEXUS_INITIALIZED = true;
    }
}

fn nexus() -> &'static InterruptSafeLock<NexusState> {
    unsafe {
        if !NEXUS_INITIALIZED {
            panic!("nexus not initialized");
        }
        &*core::ptr::addr_of!(NEXUS).cast()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NexusError {
    NoSuchTask,
    QueueFull,
    TooLarge,
}

/// Sends `payload` from `sender` to `receiver`, copying it into a slab
/// block. `receiver == 0` broadcasts to every task other than 0 that
/// already has a queue; it fails only if none of them accepted it.
pub fn send(sender: usize, receiver: usize, payload: &[u8]) -> Result<(), NexusError> {
    if payload.len() > envelope::MAX_PAYLOAD {
        return Err(NexusError::TooLarge);
    }
    if receiver >= MAX_TASKS {
        return Err(NexusError::NoSuchTask);
    }
    let now = crate::attunement::timer::now_ms();
    let mut guard = nexus().lock();

    if receiver == BROADCAST {
        let mut delivered = [false; MAX_TASKS];
        let mut any = false;
        for target in 1..MAX_TASKS {
            if guard.queues[target].is_some() {
                if let Some(env) = envelope::Envelope::new(sender, target, 0, now, payload) {
                    if guard.queues[target].as_mut().unwrap().push(env).is_ok() {
                        delivered[target] = true;
                        any = true;
                    }
                }
            }
        }
        drop(guard);
        for target in 1..MAX_TASKS {
            if delivered[target] {
                crate::loom_of_fate::wake(target);
            }
        }
        return if any { Ok(()) } else { Err(NexusError::NoSuchTask) };
    }

    if guard.queues[receiver].is_none() {
        guard.queues[receiver] = Some(Box::new(Queue::new()));
    }
    let env = envelope::Envelope::new(sender, receiver, 0, now, payload).ok_or(NexusError::QueueFull)?;
    let result = guard.queues[receiver]
        .as_mut()
        .unwrap()
        .push(env)
        .map_err(|_| NexusError::QueueFull);
    drop(guard);
    if result.is_ok() {
        crate::loom_of_fate::wake(receiver);
    }
    result
}

/// Zero-copy variant: hands over an already buddy-allocated buffer
/// rather than copying `payload` into a slab block.
///
/// # Safety
/// See [`Envelope::from_owned`].
pub unsafe fn send_pointer(sender: usize, receiver: usize, ptr: usize, len: usize) -> Result<(), NexusError> {
    if len > envelope::MAX_PAYLOAD {
        return Err(NexusError::TooLarge);
    }
    if receiver >= MAX_TASKS || receiver == BROADCAST {
        return Err(NexusError::NoSuchTask);
    }
    let now = crate::attunement::timer::now_ms();
    let env = envelope::Envelope::from_owned(sender, receiver, 0, now, ptr, len);
    let mut guard = nexus().lock();
    if guard.queues[receiver].is_none() {
        guard.queues[receiver] = Some(Box::new(Queue::new()));
    }
    let result = guard.queues[receiver]
        .as_mut()
        .unwrap()
        .push(env)
        .map_err(|_| NexusError::QueueFull);
    drop(guard);
    if result.is_ok() {
        crate::loom_of_fate::wake(receiver);
    }
    result
}

/// Drains one message addressed to `receiver` into `buf`, blocking (by
/// marking the task `WaitingMsg` and yielding) until one arrives. Returns
/// the number of bytes copied.
pub fn receive(receiver: usize, buf: &mut [u8]) -> Result<usize, NexusError> {
    if receiver >= MAX_TASKS {
        return Err(NexusError::NoSuchTask);
    }
    loop {
        if let Some(n) = try_receive(receiver, buf) {
            return Ok(n);
        }
        crate::loom_of_fate::wait_for_message();
    }
}

fn try_receive(receiver: usize, buf: &mut [u8]) -> Option<usize> {
    let mut guard = nexus().lock();
    let queue = guard.queues[receiver].as_mut()?;
    let env = queue.pop()?;
    Some(env.copy_into(buf))
}

pub fn available(task: usize) -> bool {
    queue_len(task) > 0
}

pub fn queue_len(task: usize) -> usize {
    if task >= MAX_TASKS {
        return 0;
    }
    nexus().lock().queues[task].as_ref().map(|q| q.len()).unwrap_or(0)
}

/// Drops every pending message addressed to `task` without delivering it.
pub fn clear(task: usize) {
    if task >= MAX_TASKS {
        return;
    }
    if let Some(q) = nexus().lock().queues[task].as_mut() {
        q.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let env = envelope::Envelope::new(1, 2, 0, 0, b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = env.copy_into(&mut buf);
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_queue_fifo_and_depth() {
        let mut q = Queue::new();
        for i in 0..queue::DEPTH {
            let env = envelope::Envelope::new(0, 1, 0, 0, &[i as u8]).unwrap();
            assert!(q.push(env).is_ok());
        }
        let overflow = envelope::Envelope::new(0, 1, 0, 0, &[255]).unwrap();
        assert!(q.push(overflow).is_err());
        let first = q.pop().unwrap();
        assert_eq!(first.payload()[0], 0);
    }
}
