//! POSIX named shared-memory objects.
//!
//! `ShmObject` owns one `shm_open` object mapped with `MAP_SHARED`: the file
//! descriptor, the mapping, and (optionally) responsibility for unlinking
//! the name on drop. Create-exclusive and open are separate entry points so
//! callers can distinguish "I made this region" from "I joined it" — the
//! distinction that drives creator-side cleanup.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::string::String;
use std::string::ToString;

use crate::Region;

/// An owned, mapped POSIX shared-memory object.
#[derive(Debug)]
pub struct ShmObject {
    /// Pointer to the mapped memory
    ptr: *mut u8,
    /// Length of the mapping in bytes
    len: usize,
    /// Descriptor backing the mapping (kept open for the mapping's lifetime)
    fd: OwnedFd,
    /// Object name, `/`-prefixed as shm_open requires
    name: String,
    /// Whether dropping this object should also unlink the name
    unlink_on_drop: bool,
}

fn cstring_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in shm name"))
}

impl ShmObject {
    /// Create a new object exclusively, size it, and map it.
    ///
    /// Fails with `AlreadyExists` if the name is taken. The object is
    /// created with the given mode (subject to umask, then corrected with
    /// `fchmod` so both peers can open it). The new object unlinks on drop
    /// until [`ShmObject::set_unlink_on_drop`] says otherwise, so failed
    /// setup paths do not leave orphan names behind.
    pub fn create_exclusive(name: &str, size: usize, mode: u32) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "size must be > 0",
            ));
        }
        let c_name = cstring_name(name)?;

        let raw = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                mode as libc::c_uint,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // umask may have stripped group/other bits; put them back.
        if unsafe { libc::fchmod(fd.as_raw_fd(), mode as libc::mode_t) } < 0 {
            let err = io::Error::last_os_error();
            let _ = unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } < 0 {
            let err = io::Error::last_os_error();
            let _ = unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        let ptr = unsafe { map_shared(fd.as_raw_fd(), size) }.inspect_err(|_| {
            let _ = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        })?;

        Ok(Self {
            ptr,
            len: size,
            fd,
            name: name.to_string(),
            unlink_on_drop: true,
        })
    }

    /// Open an existing object read/write and map it at its current size.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = cstring_name(name)?;

        let raw = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut stat: libc::stat = unsafe { core::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let size = stat.st_size as usize;
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shm object is empty",
            ));
        }

        let ptr = unsafe { map_shared(fd.as_raw_fd(), size) }?;

        Ok(Self {
            ptr,
            len: size,
            fd,
            name: name.to_string(),
            unlink_on_drop: false,
        })
    }

    /// True if an object with this name currently exists.
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = cstring_name(name) else {
            return false;
        };
        let raw = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if raw < 0 {
            return false;
        }
        unsafe { libc::close(raw) };
        true
    }

    /// Remove the name. A name that is already gone is not an error.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c_name = cstring_name(name)?;
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// `Region` view of the mapping.
    #[inline]
    pub fn region(&self) -> Region {
        unsafe { Region::from_raw(self.ptr, self.len) }
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the mapping covers zero bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Object name (`/`-prefixed).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw descriptor backing the mapping.
    #[inline]
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Choose whether dropping this object also unlinks its name.
    pub fn set_unlink_on_drop(&mut self, unlink: bool) {
        self.unlink_on_drop = unlink;
    }
}

impl Drop for ShmObject {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
        if self.unlink_on_drop {
            let _ = Self::unlink(&self.name);
        }
    }
}

// SAFETY: the mapping stays valid for the lifetime of ShmObject, and all
// cross-thread access to its contents goes through atomics in the layout.
unsafe impl Send for ShmObject {}
unsafe impl Sync for ShmObject {}

unsafe fn map_shared(fd: RawFd, size: usize) -> io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}
