use std::fmt;
use std::os::raw::c_void;
use std::ptr::NonNull;
use std::slice;

use tracing::warn;

use crate::sys;

/// Memory-mapped region
///
/// The backing memory belongs to the device (usually a dmabuf). It is mapped into the process
/// once when the buffer pool is set up, and unmapped exactly once when the last reference to the
/// region goes away, which normally happens when the pool is torn down.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is plain shared memory, the device writes to it only while the owning buffer is
// queued, and callers only read it while they hold the corresponding capture.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` from offset zero.
    pub(crate) fn map(fd: std::os::unix::io::RawFd, len: usize) -> std::io::Result<Self> {
        let ptr = sys::mmap(fd, len, 0)?;
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "mmap returned a null mapping")
        })?;

        Ok(MappedRegion { ptr, len })
    }

    /// Start address of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slice of read-only data
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let res = unsafe { sys::munmap(self.ptr.as_ptr() as *mut c_void, self.len) };
        if let Err(e) = res {
            warn!(error = %e, len = self.len, "failed to unmap buffer region");
        }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
