//! In-region binary layout.
//!
//! Everything both processes dereference lives in one fixed-size mapping:
//! a header, then the MASTER→SLAVE channel, then the SLAVE→MASTER channel.
//! All three are `#[repr(C)]`, cache-line aligned, and their sizes are
//! asserted at compile time, so any two processes built from this
//! definition agree on every offset. Communicated fields are atomics; the
//! payload buffers are published through the per-channel sequence lock.
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ RegionHeader (64 bytes, cache-line aligned)    │
//! ├────────────────────────────────────────────────┤
//! │ Channel MASTER→SLAVE (4160 bytes)              │
//! ├────────────────────────────────────────────────┤
//! │ Channel SLAVE→MASTER (4160 bytes)              │
//! └────────────────────────────────────────────────┘
//! ```

use core::cell::UnsafeCell;
use core::mem::{align_of, offset_of, size_of};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use eshm_primitives::SeqLock;

/// Magic bytes at the start of every region.
pub const MAGIC: [u8; 4] = *b"ESHM";

/// Region format version.
pub const VERSION: u32 = 2;

/// Payload capacity of one channel, in bytes.
///
/// A build-time constant: both processes must be built with the same value.
pub const CHANNEL_CAPACITY: usize = 4096;

/// Total size of the mapped region in bytes.
pub const REGION_SIZE: usize = size_of::<RegionData>();

/// Region header (64 bytes, one cache line).
///
/// Writer discipline: each side is the sole writer of its own heartbeat,
/// pid, and alive cells; only the MASTER writes magic, version, the stale
/// threshold, and the generation counter. Both sides read everything.
#[repr(C, align(64))]
pub struct RegionHeader {
    /// Magic bytes: `b"ESHM"`.
    pub magic: [u8; 4],
    /// Region format version.
    pub version: u32,
    /// Advanced every heartbeat tick by the MASTER.
    pub master_heartbeat: AtomicU64,
    /// Advanced every heartbeat tick by the SLAVE.
    pub slave_heartbeat: AtomicU64,
    /// MASTER process id (0 = never attached).
    pub master_pid: AtomicU32,
    /// SLAVE process id (0 = never attached).
    pub slave_pid: AtomicU32,
    /// MASTER alive flag (0 or 1).
    pub master_alive: AtomicU32,
    /// SLAVE alive flag (0 or 1).
    pub slave_alive: AtomicU32,
    /// Staleness threshold in milliseconds, written by the creator.
    pub stale_threshold_ms: AtomicU32,
    /// Incremented by every MASTER start; lets the SLAVE spot a restart.
    pub master_generation: AtomicU32,
    _pad: [u8; 16],
}

const _: () = assert!(size_of::<RegionHeader>() == 64);
const _: () = assert!(align_of::<RegionHeader>() == 64);

impl RegionHeader {
    /// Write the creator's initial header state.
    ///
    /// # Safety
    ///
    /// `self` must point into exclusively-owned memory: only the creator of
    /// a fresh region may call this, before publishing the region name.
    pub unsafe fn init(&mut self, stale_threshold_ms: u32) {
        self.magic = MAGIC;
        self.version = VERSION;
        self.master_heartbeat = AtomicU64::new(0);
        self.slave_heartbeat = AtomicU64::new(0);
        self.master_pid = AtomicU32::new(0);
        self.slave_pid = AtomicU32::new(0);
        self.master_alive = AtomicU32::new(0);
        self.slave_alive = AtomicU32::new(0);
        self.stale_threshold_ms = AtomicU32::new(stale_threshold_ms);
        self.master_generation = AtomicU32::new(0);
        self._pad = [0; 16];
    }

    /// Check magic and version.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.magic != MAGIC {
            return Err("bad magic");
        }
        if self.version != VERSION {
            return Err("version mismatch");
        }
        Ok(())
    }

    /// True if the given side's alive flag is set.
    #[inline]
    pub fn is_alive(&self, master: bool) -> bool {
        let cell = if master {
            &self.master_alive
        } else {
            &self.slave_alive
        };
        cell.load(Ordering::Acquire) != 0
    }
}

/// One unidirectional channel (4160 bytes).
///
/// The writing side owns the sequence lock, the length cell, the payload
/// buffer, and `write_count`; `read_count` is an advisory cell owned by the
/// reading side.
#[repr(C, align(64))]
pub struct Channel {
    /// Publication lock for `len` + `data`.
    pub seqlock: SeqLock,
    /// Bytes of `data` occupied by the current payload (`0..=CAPACITY`).
    pub len: AtomicU32,
    /// Total completed publications; advanced by the writer after each one.
    pub write_count: AtomicU64,
    /// Total completed snapshots; advanced by the reader. Advisory.
    pub read_count: AtomicU64,
    /// Payload bytes, valid up to `len` between publications.
    data: UnsafeCell<[u8; CHANNEL_CAPACITY]>,
    _pad: [u8; 40],
}

const _: () = assert!(size_of::<Channel>() == 4160);
const _: () = assert!(align_of::<Channel>() == 64);
const _: () = assert!(offset_of!(Channel, write_count) % 8 == 0);
const _: () = assert!(offset_of!(Channel, read_count) % 8 == 0);

impl Channel {
    /// Zero the channel.
    ///
    /// # Safety
    ///
    /// `self` must point into exclusively-owned memory (fresh region, before
    /// the name is published).
    pub unsafe fn init(&mut self) {
        unsafe { self.seqlock.init() };
        self.len = AtomicU32::new(0);
        self.write_count = AtomicU64::new(0);
        self.read_count = AtomicU64::new(0);
        self.data = UnsafeCell::new([0; CHANNEL_CAPACITY]);
        self._pad = [0; 40];
    }

    /// Pointer to the payload buffer.
    #[inline]
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data.get() as *mut u8
    }
}

/// The complete shared region.
#[repr(C)]
pub struct RegionData {
    pub header: RegionHeader,
    /// MASTER writes, SLAVE reads.
    pub master_to_slave: Channel,
    /// SLAVE writes, MASTER reads.
    pub slave_to_master: Channel,
}

const _: () = assert!(size_of::<RegionData>() == 64 + 2 * 4160);
const _: () = assert!(offset_of!(RegionData, master_to_slave) == 64);
const _: () = assert!(offset_of!(RegionData, slave_to_master) == 64 + 4160);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_one_cache_line() {
        assert_eq!(size_of::<RegionHeader>(), 64);
    }

    #[test]
    fn channel_covers_capacity_plus_bookkeeping() {
        assert_eq!(size_of::<Channel>(), 4160);
        assert_eq!(size_of::<Channel>() % 64, 0);
    }

    #[test]
    fn region_total_is_fixed() {
        assert_eq!(REGION_SIZE, 8384);
    }

    #[test]
    fn init_then_validate() {
        let mut header: RegionHeader = unsafe { core::mem::zeroed() };
        unsafe { header.init(100) };
        assert!(header.validate().is_ok());
        assert_eq!(header.stale_threshold_ms.load(Ordering::Relaxed), 100);
        assert_eq!(header.master_generation.load(Ordering::Relaxed), 0);

        header.magic[0] = b'X';
        assert_eq!(header.validate(), Err("bad magic"));

        header.magic = MAGIC;
        header.version = VERSION + 1;
        assert_eq!(header.validate(), Err("version mismatch"));
    }

    #[test]
    fn alive_flags_start_clear() {
        let mut header: RegionHeader = unsafe { core::mem::zeroed() };
        unsafe { header.init(100) };
        assert!(!header.is_alive(true));
        assert!(!header.is_alive(false));
        header.master_alive.store(1, Ordering::Release);
        assert!(header.is_alive(true));
        assert!(!header.is_alive(false));
    }
}
