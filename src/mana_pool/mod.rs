//! # Mana Pool - Memory Subsystem
//!
//! Owns every piece of kernel memory state: the buddy heap, the secure
//! bump region carved from its tail, the per-task capability store, and
//! the interrupt-safe locking primitive the rest of the kernel builds on.

pub mod buddy;
pub mod secure_region;
pub mod capability_store;
pub mod interrupt_lock;

use buddy::LockedBuddyAllocator;
use secure_region::SecureRegion;
use capability_store::CapabilityStore;

pub use interrupt_lock::InterruptSafeLock;

/// Tail of the heap reserved for the secure region before carving the buddy pool.
pub const SECURE_REGION_SIZE: usize = 64 * 1024;

#[global_allocator]
static GLOBAL_ALLOCATOR: LockedBuddyAllocator = LockedBuddyAllocator::new();

static SECURE_REGION: SecureRegion = SecureRegion::new();
static CAPABILITIES: CapabilityStore = CapabilityStore::new();

/// Carve the buddy heap and secure region out of `[heap_base, heap_base + heap_size)`,
/// then seed the capability store's kernel slot. Must run exactly once, after
/// the boot descriptor has been parsed and before any allocation.
///
/// # Safety
/// `heap_base`/`heap_size` must describe memory that is writable and not
/// claimed by anything else (kernel image, stacks, boot structures).
pub unsafe fn init(heap_base: usize, heap_size: usize) {
    let secure_base = heap_base + heap_size - SECURE_REGION_SIZE;
    GLOBAL_ALLOCATOR.init(heap_base, heap_size - SECURE_REGION_SIZE);
    SECURE_REGION.init(secure_base, SECURE_REGION_SIZE);
    CAPABILITIES.init();
}

pub fn allocate(size: usize) -> Option<usize> {
    GLOBAL_ALLOCATOR.allocate(size)
}

pub fn free(addr: usize) {
    GLOBAL_ALLOCATOR.free(addr);
}

pub fn heap_stats() -> buddy::BuddyStats {
    GLOBAL_ALLOCATOR.stats()
}

pub fn secure_alloc(n: usize) -> Option<usize> {
    SECURE_REGION.alloc(n)
}

pub fn capabilities() -> &'static CapabilityStore {
    &CAPABILITIES
}
