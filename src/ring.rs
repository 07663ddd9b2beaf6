//! Lock-free SPSC byte ring.
//!
//! Single producer, single consumer: the producer owns the write index
//! and publishes it with Release ordering after the payload bytes are
//! stored; the consumer owns the read index and publishes it after
//! consumption. No locks. The RX ring is fed from the transport's RX
//! callback (interrupt context permitted) and drained by the tick; the
//! TX ring has both ends on the tick.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::ByteQueue;

/// Largest supported ring capacity.
pub const MAX_RING_CAPACITY: usize = 65536;
/// Default TX stream-ring capacity.
pub const DEFAULT_TX_RING_CAPACITY: usize = 1024;
/// Default RX ring capacity.
pub const DEFAULT_RX_RING_CAPACITY: usize = 512;

/// Power-of-two byte ring with one reserved slot (`capacity - 1` usable).
/// Storage is allocated once at construction and never resized.
pub struct RingBuffer {
    storage: Box<[UnsafeCell<u8>]>,
    mask: usize,
    /// Consumer-owned, producer-observed.
    read: AtomicUsize,
    /// Producer-owned, consumer-observed.
    write: AtomicUsize,
    /// Cumulative bytes refused by `append`. Producer-owned.
    rejected: AtomicUsize,
    /// Maximum `used()` observed since construction. Producer-owned.
    highwater: AtomicUsize,
}

// SAFETY: the producer writes only the free region and the consumer reads
// only the used region; the regions are disjoint and hand over through the
// Release/Acquire index pair. Callers uphold single-producer
// single-consumer.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// `capacity` must be a nonzero power of two, at most
    /// [`MAX_RING_CAPACITY`].
    pub fn new(capacity: usize) -> Option<Self> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_RING_CAPACITY {
            return None;
        }
        Some(RingBuffer {
            storage: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
            mask: capacity - 1,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            highwater: AtomicUsize::new(0),
        })
    }

    fn data_ptr(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    /// Cumulative bytes refused because the ring was full.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Highest fill level seen since construction.
    pub fn highwater(&self) -> usize {
        self.highwater.load(Ordering::Relaxed)
    }
}

impl ByteQueue for RingBuffer {
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn used(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }

    fn free(&self) -> usize {
        self.mask - self.used()
    }

    fn clear(&self) {
        let write = self.write.load(Ordering::Acquire);
        self.read.store(write, Ordering::Release);
    }

    fn append(&self, src: &[u8]) -> bool {
        let n = src.len();
        if n == 0 {
            return true;
        }
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let used = write.wrapping_sub(read) & self.mask;
        let free = self.mask - used;
        if n > free {
            self.rejected.fetch_add(n, Ordering::Relaxed);
            return false;
        }

        let ptr = self.data_ptr();
        let first = n.min(self.capacity() - write);
        // SAFETY: [write, write + n) mod capacity lies in the free region,
        // which the consumer never reads; both segment copies stay in
        // bounds. The index store below publishes the bytes.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ptr.add(write), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), ptr, n - first);
        }
        self.write.store((write + n) & self.mask, Ordering::Release);

        let used_now = used + n;
        if used_now > self.highwater.load(Ordering::Relaxed) {
            self.highwater.store(used_now, Ordering::Relaxed);
        }
        true
    }

    fn pop(&self, n: usize) {
        let n = n.min(self.used());
        let read = self.read.load(Ordering::Relaxed);
        self.read.store((read + n) & self.mask, Ordering::Release);
    }

    fn copy_from_tail(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.used());
        if n == 0 {
            return 0;
        }
        let read = self.read.load(Ordering::Relaxed);
        let ptr = self.data_ptr();
        let first = n.min(self.capacity() - read);
        // SAFETY: [read, read + n) mod capacity lies in the used region,
        // already published by the producer's Release store.
        unsafe {
            ptr::copy_nonoverlapping(ptr.add(read), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(ptr, dst.as_mut_ptr().add(first), n - first);
        }
        n
    }

    fn peek_linear(&self) -> &[u8] {
        let used = self.used();
        let read = self.read.load(Ordering::Relaxed);
        let len = used.min(self.capacity() - read);
        // SAFETY: the used region is published and the producer never
        // writes it until the consumer pops; consumer-side call per the
        // SPSC contract.
        unsafe { std::slice::from_raw_parts(self.data_ptr().add(read) as *const u8, len) }
    }
}
