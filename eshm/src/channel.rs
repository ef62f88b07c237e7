//! Channel operations: seqlock-published writes, baseline-gated reads.

use core::ptr;
use core::sync::atomic::Ordering;

use crate::layout::{CHANNEL_CAPACITY, Channel};

/// Why a channel operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Payload exceeds [`CHANNEL_CAPACITY`], or the destination buffer is
    /// smaller than the pending payload.
    BufferTooSmall,
}

/// View over one channel inside a mapped region.
///
/// Holds a raw pointer rather than a reference so it can outlive no borrow:
/// the caller re-derives a view from a fresh load of the mapping pointer
/// whenever it needs one, and never holds a view across a potential unmap.
#[derive(Clone, Copy)]
pub struct ChannelView {
    channel: *mut Channel,
}

// SAFETY: all shared state behind the pointer is published via atomics and
// the sequence lock; the mapping-lifetime rule above is the caller's part.
unsafe impl Send for ChannelView {}
unsafe impl Sync for ChannelView {}

impl ChannelView {
    /// View the channel at `channel`.
    ///
    /// # Safety
    ///
    /// `channel` must point to an initialized [`Channel`] inside a live
    /// mapping, and the mapping must stay live while this view is used.
    #[inline]
    pub unsafe fn from_raw(channel: *mut Channel) -> Self {
        Self { channel }
    }

    #[inline]
    fn channel(&self) -> &Channel {
        unsafe { &*self.channel }
    }

    /// Publish `bytes` as the channel's current payload.
    ///
    /// Single-writer: only the side that owns this direction may call this.
    /// Overwrites whatever was there — readers that lagged miss the old
    /// payload. A zero-length write is a valid wake trigger and still
    /// advances the write counter.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        if bytes.len() > CHANNEL_CAPACITY {
            return Err(ChannelError::BufferTooSmall);
        }
        let channel = self.channel();

        channel.seqlock.write_begin();
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), channel.data_ptr(), bytes.len());
        }
        channel.len.store(bytes.len() as u32, Ordering::Relaxed);
        channel.seqlock.write_end();

        channel.write_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Snapshot the current payload into `buf` if anything was published
    /// past `baseline`.
    ///
    /// Returns `Ok(None)` when `write_count` has not advanced past the
    /// baseline. On success returns the payload length and the write count
    /// observed going in — the caller's next baseline — and bumps the
    /// advisory read counter. A too-small `buf` fails without consuming or
    /// advancing anything.
    pub fn try_read(
        &self,
        buf: &mut [u8],
        baseline: u64,
    ) -> Result<Option<(usize, u64)>, ChannelError> {
        let channel = self.channel();
        let observed = channel.write_count.load(Ordering::Acquire);
        if observed <= baseline {
            return Ok(None);
        }

        loop {
            let begin = channel.seqlock.read_begin();
            let len = channel.len.load(Ordering::Relaxed) as usize;

            if len > buf.len() {
                // Re-check before failing: the length may be a torn value
                // from a publication in flight.
                if channel.seqlock.read_retry(begin) {
                    continue;
                }
                return Err(ChannelError::BufferTooSmall);
            }

            unsafe {
                ptr::copy_nonoverlapping(channel.data_ptr(), buf.as_mut_ptr(), len);
            }

            if !channel.seqlock.read_retry(begin) {
                channel.read_count.fetch_add(1, Ordering::AcqRel);
                return Ok(Some((len, observed)));
            }
        }
    }

    /// Total publications so far.
    #[inline]
    pub fn write_count(&self) -> u64 {
        self.channel().write_count.load(Ordering::Acquire)
    }

    /// Total snapshots taken so far (advisory).
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.channel().read_count.load(Ordering::Acquire)
    }
}
