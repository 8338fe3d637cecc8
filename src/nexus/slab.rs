//! # Slab Classes
//!
//! Fixed allocation classes layered over the buddy heap so a steady
//! stream of small IPC payloads doesn't force a split/coalesce on the
//! buddy allocator for every send. Each class keeps a small cache of
//! already-carved blocks; a class whose cache is empty (or full, on
//! free) falls through to the buddy heap directly.

use crate::mana_pool::InterruptSafeLock;

pub const CLASSES: [usize; 5] = [16, 64, 256, 1024, 4096];

const CACHE_DEPTH: usize = 8;

struct ClassCache {
    slots: [usize; CACHE_DEPTH],
    len: usize,
}

impl ClassCache {
    const fn new() -> Self {
        ClassCache { slots: [0; CACHE_DEPTH], len: 0 }
    }

    fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.slots[self.len])
    }

    fn push(&mut self, addr: usize) -> bool {
        if self.len == CACHE_DEPTH {
            return false;
        }
        self.slots[self.len] = addr;
        self.len += 1;
        true
    }
}

static CACHES: [InterruptSafeLock<ClassCache>; CLASSES.len()] = [
    InterruptSafeLock::new(ClassCache::new(), "SLAB16"),
    InterruptSafeLock::new(ClassCache::new(), "SLAB64"),
    InterruptSafeLock::new(ClassCache::new(), "SLAB256"),
    InterruptSafeLock::new(ClassCache::new(), "SLAB1024"),
    InterruptSafeLock::new(ClassCache::new(), "SLAB4096"),
];

fn class_index_for(size: usize) -> Option<usize> {
    CLASSES.iter().position(|&c| c >= size)
}

/// Allocate a block big enough for `size` bytes. Returns the address and
/// the class size actually carved (always `>= size`), or `None` if
/// `size` exceeds the largest class or the buddy heap is exhausted.
pub fn alloc(size: usize) -> Option<(usize, usize)> {
    let idx = class_index_for(size)?;
    let class_size = CLASSES[idx];
    if let Some(addr) = CACHES[idx].lock().pop() {
        return Some((addr, class_size));
    }
    crate::mana_pool::allocate(class_size).map(|addr| (addr, class_size))
}

/// Return a block of `class_size` (as returned by `alloc`) to its class
/// cache, or to the buddy heap if the cache is already full.
pub fn free(addr: usize, class_size: usize) {
    if let Some(idx) = CLASSES.iter().position(|&c| c == class_size) {
        if CACHES[idx].lock().push(addr) {
            return;
        }
    }
    crate::mana_pool::free(addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_index_picks_smallest_fit() {
        assert_eq!(class_index_for(1), Some(0));
        assert_eq!(class_index_for(16), Some(0));
        assert_eq!(class_index_for(17), Some(1));
        assert_eq!(class_index_for(4096), Some(4));
        assert_eq!(class_index_for(4097), None);
    }
}
