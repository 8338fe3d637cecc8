//! # Capability Store
//!
//! A flat, per-task rights bitmap. Unlike an object-capability system with
//! opaque sealed handles, this store is deliberately simple: there is one
//! address space and one kernel, so the only thing worth gating is *which
//! task id* may perform *which class of operation* (allocate memory, touch
//! a device port, send a message, create another task, ...). The table is
//! indexed directly by task id rather than by an indirection layer.

use super::interrupt_lock::InterruptSafeLock;

pub const MAX_TASKS: usize = 64;

bitflags::bitflags! {
    /// The 16 rights bits a task may hold.
    pub struct Capabilities: u16 {
        const MEMORY_ALLOC = 1 << 0;
        const MEMORY_FREE  = 1 << 1;
        const IO_READ      = 1 << 2;
        const IO_WRITE     = 1 << 3;
        const MSG_SEND     = 1 << 4;
        const MSG_RECEIVE  = 1 << 5;
        const IRQ_INSTALL  = 1 << 6;
        const IRQ_REMOVE   = 1 << 7;
        const TASK_CREATE  = 1 << 8;
        const TASK_DESTROY = 1 << 9;
        const PERM_GRANT   = 1 << 10;
        const PERM_REVOKE  = 1 << 11;
        const KERNEL_MODE  = 1 << 12;
        const SHELL_ACCESS = 1 << 13;
        const DEBUG        = 1 << 14;
        const ADMIN        = 1 << 15;
    }
}

/// Bits that never propagate from parent to child on `create`.
const NOT_INHERITED: Capabilities = Capabilities::from_bits_truncate(
    Capabilities::PERM_GRANT.bits() | Capabilities::PERM_REVOKE.bits() | Capabilities::KERNEL_MODE.bits(),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityError {
    InvalidTask,
    NotPermitted,
    AlreadyActive,
    NotActive,
}

#[derive(Clone, Copy)]
struct CapabilityRecord {
    capabilities: Capabilities,
    parent_id: usize,
    granted_timestamp: u64,
    active: bool,
}

impl CapabilityRecord {
    const fn empty() -> Self {
        Self {
            capabilities: Capabilities::empty(),
            parent_id: 0,
            granted_timestamp: 0,
            active: false,
        }
    }
}

struct CapabilityStoreInner {
    records: [CapabilityRecord; MAX_TASKS],
    clock: u64,
}

impl CapabilityStoreInner {
    const fn new() -> Self {
        Self {
            records: [CapabilityRecord::empty(); MAX_TASKS],
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn create(&mut self, child: usize, parent: usize, initial: Capabilities) -> Result<(), CapabilityError> {
        if child >= MAX_TASKS || parent >= MAX_TASKS {
            return Err(CapabilityError::InvalidTask);
        }
        if !self.check(parent, Capabilities::TASK_CREATE) {
            return Err(CapabilityError::NotPermitted);
        }
        if self.records[child].active {
            return Err(CapabilityError::AlreadyActive);
        }

        let inherited = self.records[parent].capabilities & !NOT_INHERITED;
        let ts = self.tick();
        self.records[child] = CapabilityRecord {
            capabilities: initial | inherited,
            parent_id: parent,
            granted_timestamp: ts,
            active: true,
        };
        Ok(())
    }

    fn destroy(&mut self, task: usize) -> Result<(), CapabilityError> {
        if task == 0 {
            return Err(CapabilityError::NotPermitted);
        }
        if task >= MAX_TASKS || !self.records[task].active {
            return Err(CapabilityError::InvalidTask);
        }
        self.records[task].active = false;
        self.tick();
        Ok(())
    }

    fn grant(&mut self, granter: usize, target: usize, bits: Capabilities) -> Result<(), CapabilityError> {
        if granter >= MAX_TASKS || target >= MAX_TASKS {
            return Err(CapabilityError::InvalidTask);
        }
        if !self.check(granter, Capabilities::PERM_GRANT) {
            return Err(CapabilityError::NotPermitted);
        }
        if !self.records[target].active {
            return Err(CapabilityError::NotActive);
        }
        self.records[target].capabilities |= bits;
        self.records[target].granted_timestamp = self.tick();
        Ok(())
    }

    fn revoke(&mut self, revoker: usize, target: usize, bits: Capabilities) -> Result<(), CapabilityError> {
        if revoker >= MAX_TASKS || target >= MAX_TASKS {
            return Err(CapabilityError::InvalidTask);
        }
        if target == 0 {
            return Err(CapabilityError::NotPermitted);
        }
        if !self.check(revoker, Capabilities::PERM_REVOKE) {
            return Err(CapabilityError::NotPermitted);
        }
        if !self.records[target].active {
            return Err(CapabilityError::NotActive);
        }
        self.records[target].capabilities &= !bits;
        self.records[target].granted_timestamp = self.tick();
        Ok(())
    }

    fn check(&self, task: usize, bits: Capabilities) -> bool {
        if task >= MAX_TASKS {
            return false;
        }
        let record = &self.records[task];
        record.active
            && (record.capabilities.contains(Capabilities::KERNEL_MODE) || record.capabilities.contains(bits))
    }
}

/// Interrupt-safe handle to the global capability store.
pub struct CapabilityStore {
    inner: InterruptSafeLock<CapabilityStoreInner>,
}

impl CapabilityStore {
    pub const fn new() -> Self {
        Self {
            inner: InterruptSafeLock::new(CapabilityStoreInner::new(), "CAPABILITY_STORE"),
        }
    }

    /// Seed slot 0 (the kernel task) with every bit active.
    pub fn init(&self) {
        let mut inner = self.inner.lock();
        inner.records[0] = CapabilityRecord {
            capabilities: Capabilities::all(),
            parent_id: 0,
            granted_timestamp: 1,
            active: true,
        };
        inner.clock = 1;
    }

    pub fn create(&self, child: usize, parent: usize, initial: Capabilities) -> Result<(), CapabilityError> {
        self.inner.lock().create(child, parent, initial)
    }

    pub fn destroy(&self, task: usize) -> Result<(), CapabilityError> {
        self.inner.lock().destroy(task)
    }

    pub fn grant(&self, granter: usize, target: usize, bits: Capabilities) -> Result<(), CapabilityError> {
        self.inner.lock().grant(granter, target, bits)
    }

    pub fn revoke(&self, revoker: usize, target: usize, bits: Capabilities) -> Result<(), CapabilityError> {
        self.inner.lock().revoke(revoker, target, bits)
    }

    pub fn check(&self, task: usize, bits: Capabilities) -> bool {
        self.inner.lock().check(task, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_store() -> CapabilityStore {
        let store = CapabilityStore::new();
        store.init();
        store
    }

    #[test]
    fn test_kernel_slot_has_all_bits() {
        let store = kernel_store();
        assert!(store.check(0, Capabilities::ADMIN));
        assert!(store.check(0, Capabilities::KERNEL_MODE));
    }

    #[test]
    fn test_create_inherits_minus_masked_bits() {
        let store = kernel_store();
        store.create(1, 0, Capabilities::MSG_SEND | Capabilities::MSG_RECEIVE).unwrap();
        assert!(store.check(1, Capabilities::MSG_SEND));
        assert!(!store.check(1, Capabilities::KERNEL_MODE));
    }

    #[test]
    fn test_destroy_task_zero_rejected() {
        let store = kernel_store();
        assert_eq!(store.destroy(0), Err(CapabilityError::NotPermitted));
    }

    #[test]
    fn test_grant_revoke_round_trip() {
        let store = kernel_store();
        store.create(1, 0, Capabilities::empty()).unwrap();
        let before = store.inner.lock().records[1].capabilities;
        store.grant(0, 1, Capabilities::IO_READ).unwrap();
        assert!(store.check(1, Capabilities::IO_READ));
        store.revoke(0, 1, Capabilities::IO_READ).unwrap();
        let after = store.inner.lock().records[1].capabilities;
        assert_eq!(before, after);
    }

    #[test]
    fn test_timestamp_strictly_increases() {
        let store = kernel_store();
        store.create(1, 0, Capabilities::empty()).unwrap();
        let t1 = store.inner.lock().records[1].granted_timestamp;
        store.grant(0, 1, Capabilities::IO_READ).unwrap();
        let t2 = store.inner.lock().records[1].granted_timestamp;
        assert!(t2 > t1);
    }

    #[test]
    fn test_create_requires_task_create_bit() {
        let store = kernel_store();
        store.create(1, 0, Capabilities::empty()).unwrap();
        // Task 1 has no TASK_CREATE, so it cannot create task 2.
        assert_eq!(store.create(2, 1, Capabilities::empty()), Err(CapabilityError::NotPermitted));
    }

    #[test]
    fn test_invalid_task_id_rejected() {
        let store = kernel_store();
        assert_eq!(store.create(MAX_TASKS, 0, Capabilities::empty()), Err(CapabilityError::InvalidTask));
    }
}
