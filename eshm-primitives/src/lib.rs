//! Shared-memory building blocks for eshm.
//!
//! This crate holds the primitives that know nothing about eshm's roles or
//! liveness protocol: raw region views, the sequence lock used to publish
//! payloads to lock-free readers, and the POSIX named shared-memory object
//! wrapper. Everything here is usable from both sides of a mapping and is
//! laid out so that two unrelated processes built from the same definition
//! agree on every byte.
//!
//! The core (`region`, `seqlock`) is `no_std`; the OS-level piece
//! (`shm_object`) requires `std` on unix.

#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod region;
pub mod seqlock;
pub mod sync;

#[cfg(any(test, feature = "alloc"))]
pub use region::HeapRegion;
pub use region::Region;
pub use seqlock::SeqLock;

// OS-level shared-memory object (requires std)
#[cfg(all(feature = "std", unix, not(loom)))]
pub mod shm_object;

#[cfg(all(feature = "std", unix, not(loom)))]
pub use shm_object::ShmObject;
