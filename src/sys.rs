//! Thin wrappers around the memory management syscalls used for buffer mapping.
//!
//! In case of errors, the last OS error will be reported, aka errno on Linux.

use std::ffi::CString;
use std::io;
use std::os::raw::{c_int, c_void};
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::ptr;

/// A convenience wrapper around mmap(2).
///
/// Maps `length` bytes of `fd` starting at `offset` as a shared read/write region.
///
/// # Arguments
///
/// * `fd` - File descriptor backing the memory
/// * `length` - Number of bytes to map
/// * `offset` - Offset into the file, must be page aligned
pub fn mmap(fd: RawFd, length: usize, offset: libc::off_t) -> io::Result<*mut c_void> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            length,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset,
        )
    };

    if ptr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr)
    }
}

/// A convenience wrapper around munmap(2).
///
/// # Safety
///
/// `start` and `length` must describe a region previously returned by [`mmap`] that is not
/// referenced anymore.
pub unsafe fn munmap(start: *mut c_void, length: usize) -> io::Result<()> {
    if libc::munmap(start, length) == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Creates an anonymous, sealed-size memory file of `size` bytes.
///
/// Used to back buffers of in-process devices so they can be mapped like dmabufs.
pub fn memfd(name: &str, size: usize) -> io::Result<OwnedFd> {
    let c_name =
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd: c_int = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // take ownership right away so the descriptor is closed on the error path below
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    ftruncate(&fd, size)?;
    Ok(fd)
}

/// Writes `data` into `fd` at `offset` without moving the file position.
pub fn pwrite(fd: RawFd, data: &[u8], offset: usize) -> io::Result<usize> {
    let ret = unsafe {
        libc::pwrite(
            fd,
            data.as_ptr() as *const c_void,
            data.len(),
            offset as libc::off_t,
        )
    };

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn ftruncate(fd: &OwnedFd, size: usize) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn map_memfd_roundtrip() {
        let fd = memfd("sys-test", 4096).unwrap();
        let ptr = mmap(fd.as_raw_fd(), 4096, 0).unwrap();
        unsafe {
            *(ptr as *mut u8) = 0xab;
            assert_eq!(*(ptr as *const u8), 0xab);
            munmap(ptr, 4096).unwrap();
        }
    }

    #[test]
    fn mmap_bad_fd_fails() {
        assert!(mmap(-1, 4096, 0).is_err());
    }
}
