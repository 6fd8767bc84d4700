//! Anonymous shared memory for the UDF output buffer.
//!
//! A `MAP_SHARED | MAP_ANONYMOUS` mapping created before `fork` is visible
//! to both parent and child, so whatever the child writes survives its exit.

use std::ptr::NonNull;

use crate::error::Result;

/// An anonymous read/write mapping shared across `fork`.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    /// Bytes requested by the caller.
    len: usize,
    /// Bytes actually mapped (never zero).
    map_len: usize,
}

impl SharedRegion {
    /// Map `len` zero-filled bytes.
    pub fn new(len: usize) -> Result<Self> {
        let map_len = len.max(1);

        // SAFETY: anonymous mapping with no fixed address; result checked below.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            std::io::Error::other("mmap returned a null mapping")
        })?;

        tracing::debug!("Mapped {} bytes of shared memory", map_len);
        Ok(Self { ptr, len, map_len })
    }

    /// Base address of the mapping.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the requested length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the region as bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping spans at least `len` bytes while `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Copy the region into `dst`, which must be at least `len` bytes.
    pub fn copy_to(&self, dst: &mut [u8]) {
        dst[..self.len].copy_from_slice(self.as_slice());
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly what `new` mapped.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.map_len) };
        if rc != 0 {
            tracing::warn!(
                "Failed to unmap shared memory: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}
