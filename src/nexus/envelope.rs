//! # Message Envelope
//!
//! The fixed header every message carries: who sent it, who it's for,
//! a caller-defined type tag, and when it was sent. The payload itself
//! lives in a slab-allocated (or, for `from_owned`, buddy-allocated)
//! block whose ownership transfers with the envelope — `receive` hands
//! the receiver the only copy there ever was.

use super::slab;

pub const MAX_PAYLOAD: usize = 4096;

enum Origin {
    Slab(usize),
    Buddy,
}

pub struct Envelope {
    pub sender: usize,
    pub receiver: usize,
    pub msg_type: u32,
    pub timestamp_ms: u64,
    ptr: usize,
    len: usize,
    origin: Origin,
}

impl Envelope {
    /// Copies `payload` into a fresh slab block sized to the smallest
    /// class that fits it. `None` if `payload` exceeds `MAX_PAYLOAD` or
    /// the heap is exhausted.
    pub fn new(sender: usize, receiver: usize, msg_type: u32, timestamp_ms: u64, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        let (ptr, class_size) = slab::alloc(payload.len())?;
        unsafe {
            core::ptr::copy_nonoverlapping(payload.as_ptr(), ptr as *mut u8, payload.len());
        }
        Some(Envelope {
            sender,
            receiver,
            msg_type,
            timestamp_ms,
            ptr,
            len: payload.len(),
            origin: Origin::Slab(class_size),
        })
    }

    /// Takes ownership of an already-allocated buddy-heap buffer instead
    /// of copying into a slab block — the zero-copy path for a sender
    /// that already holds a heap pointer it's willing to give up.
    ///
    /// # Safety
    /// `ptr` must have come from `mana_pool::allocate`, describe at
    /// least `len` writable bytes, and not be freed or read by the
    /// caller again afterward; the envelope is now the sole owner.
    pub unsafe fn from_owned(sender: usize, receiver: usize, msg_type: u32, timestamp_ms: u64, ptr: usize, len: usize) -> Self {
        Envelope { sender, receiver, msg_type, timestamp_ms, ptr, len, origin: Origin::Buddy }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn payload(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    /// Copies as much of the payload as fits into `buf`. Returns the
    /// number of bytes copied.
    pub fn copy_into(&self, buf: &mut [u8]) -> usize {
        let n = core::cmp::min(self.len, buf.len());
        buf[..n].copy_from_slice(&self.payload()[..n]);
        n
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        match self.origin {
            Origin::Slab(class_size) => slab::free(self.ptr, class_size),
            Origin::Buddy => crate::mana_pool::free(self.ptr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_oversized_payload() {
        let oversized = [0u8; MAX_PAYLOAD + 1];
        assert!(Envelope::new(1, 2, 0, 0, &oversized).is_none());
    }

    #[test]
    fn test_copy_into_truncates_to_buffer_len() {
        let env = Envelope::new(1, 2, 0, 0, b"hello world").unwrap();
        let mut small = [0u8; 5];
        let n = env.copy_into(&mut small);
        assert_eq!(n, 5);
        assert_eq!(&small, b"hello");
    }
}
