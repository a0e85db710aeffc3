use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::io;
use std::ops::{Deref, DerefMut};

/// Alignment that satisfies unbuffered I/O on every supported host.
pub const IO_ALIGNMENT: usize = 4096;

/// Zeroed heap buffer whose start and length are multiples of its alignment.
///
/// Unbuffered device reads (`O_DIRECT`, `FILE_FLAG_NO_BUFFERING`) reject
/// memory that is not sector aligned, so reads into arbitrary caller slices
/// bounce through one of these.
pub struct AlignedBuffer {
    ptr: *mut u8,
    len: usize,
    layout: Layout,
}

impl AlignedBuffer {
    pub fn new(len: usize, alignment: usize) -> io::Result<Self> {
        if len == 0 || !alignment.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid aligned buffer: {} bytes at alignment {}", len, alignment),
            ));
        }

        let padded = len
            .checked_add(alignment - 1)
            .map(|n| n & !(alignment - 1))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "buffer too large"))?;
        let layout = Layout::from_size_align(padded, alignment)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("failed to allocate {} aligned bytes", padded),
            ));
        }

        Ok(Self { ptr, len, layout })
    }

    #[inline]
    pub fn with_default_alignment(len: usize) -> io::Result<Self> {
        Self::new(len, IO_ALIGNMENT)
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

/// True when `buf` starts on an `alignment` boundary and may be handed
/// straight to an unbuffered read.
#[inline]
pub fn is_io_aligned(buf: &[u8], alignment: usize) -> bool {
    (buf.as_ptr() as usize).is_multiple_of(alignment)
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr, self.layout);
        }
    }
}

unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
