use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    fmt,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

use crate::error::{OffloadError, Result};

/// Zero-initialised heap block whose start address honours a requested
/// power-of-two alignment. Released exactly once, on drop.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// The buffer uniquely owns its allocation.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        // A zero-sized layout cannot be allocated; keep one byte behind empty buffers.
        let layout = Layout::from_size_align(len.max(1), align).map_err(|_| {
            OffloadError::InvalidArgument(format!(
                "alignment {align} is not a power of two or size {len} overflows"
            ))
        })?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(OffloadError::Allocation { size: len, align })?;
        log::trace!("allocated {} bytes aligned to {}", len, align);
        Ok(Self { ptr, len, layout })
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Address handed to the device.
    pub fn address(&self) -> u64 {
        self.ptr.as_ptr() as usize as u64
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuffer {
    #[inline]
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}
