//! Single-writer, multi-reader sequence lock.
//!
//! A `SeqLock` publishes a payload to lock-free readers through a 32-bit
//! counter: the writer makes the counter odd before touching the payload and
//! even again after, and a reader accepts a snapshot only if it saw the same
//! even value on both sides of its copy. Readers never block the writer and
//! hold no lock across their copy; a snapshot that raced a publication is
//! simply discarded and retried.
//!
//! The counter lives in shared memory, so the type is `#[repr(C)]` and its
//! size is fixed. At most one writer may be active at a time; that is an
//! ownership rule of the surrounding layout, not something the lock checks.

use crate::sync::{AtomicU32, Ordering, fence, spin_loop};

/// Sequence counter for lock-free payload publication (4 bytes).
///
/// Odd = a publication is in progress, even = quiescent.
#[repr(C)]
pub struct SeqLock {
    sequence: AtomicU32,
}

#[cfg(not(loom))]
const _: () = assert!(core::mem::size_of::<SeqLock>() == 4);

impl SeqLock {
    /// A quiescent lock, for placements outside shared memory.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
        }
    }

    /// A quiescent lock (loom's atomics cannot be built in const context).
    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
        }
    }

    /// Reset the counter to the initial (even) state.
    ///
    /// # Safety
    ///
    /// `self` must point into exclusively-owned memory; no reader or writer
    /// may be active.
    pub unsafe fn init(&mut self) {
        self.sequence = AtomicU32::new(0);
    }

    /// Raw counter value, for diagnostics and tests.
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Begin a publication: move the counter to the next odd value.
    ///
    /// The release fence orders the counter store before the payload writes
    /// that follow. Only the single writer may call this.
    #[inline]
    pub fn write_begin(&self) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Finish a publication: move the counter to the next even value.
    ///
    /// The release store orders the payload writes before the counter
    /// becoming even again.
    #[inline]
    pub fn write_end(&self) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Release);
    }

    /// Begin a read: spin until the counter is even, return it.
    #[inline]
    pub fn read_begin(&self) -> u32 {
        loop {
            let seq = self.sequence.load(Ordering::Acquire);
            if seq & 1 == 0 {
                return seq;
            }
            spin_loop();
        }
    }

    /// Check whether a snapshot taken since `begin` must be discarded.
    ///
    /// Returns `true` if a publication started or completed while the
    /// caller was copying; the caller retries from [`SeqLock::read_begin`].
    #[inline]
    pub fn read_retry(&self, begin: u32) -> bool {
        fence(Ordering::Acquire);
        self.sequence.load(Ordering::Relaxed) != begin
    }
}
