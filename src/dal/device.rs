//! Device capability interface.
//!
//! A [`RawDevice`] is a byte-addressed, seekable source that can describe its
//! geometry. Sector arithmetic, windows and bounds live in
//! [`DiskHandle`](super::DiskHandle), which is composed around any device.

use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use super::geometry::Geometry;
use crate::error::{DiskError, Result};

/// How a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessFlags {
    /// Request write access from the OS. Writes are still refused by every
    /// device this crate ships.
    pub write: bool,
    /// Bypass the host page cache (`O_DIRECT` / `FILE_FLAG_NO_BUFFERING`).
    pub unbuffered: bool,
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self {
            write: false,
            unbuffered: true,
        }
    }
}

impl AccessFlags {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn buffered(mut self) -> Self {
        self.unbuffered = false;
        self
    }

    pub fn with_write(mut self) -> Self {
        self.write = true;
        self
    }
}

/// A raw, byte-addressed block device.
///
/// `write`, `lock`, `unlock` and `flush` are optional capabilities reserved
/// for specialised variants; the defaults refuse them.
pub trait RawDevice: Read + Seek {
    /// Asks the host for the device layout.
    fn query_geometry(&mut self) -> Result<Geometry>;

    /// Human-readable location, used in logs and errors.
    fn describe(&self) -> String;

    /// Whether `write` can succeed at all; checked before any sector math.
    fn supports_write(&self) -> bool {
        false
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(DiskError::NotSupported("write"))
    }

    fn lock(&mut self) -> Result<()> {
        Err(DiskError::NotSupported("lock"))
    }

    fn unlock(&mut self) -> Result<()> {
        Err(DiskError::NotSupported("unlock"))
    }

    fn flush(&mut self) -> Result<()> {
        Err(DiskError::NotSupported("flush"))
    }

    fn is_locked(&self) -> bool {
        false
    }
}

/// Disk image held in memory.
///
/// Useful for feeding synthetic partition tables or filesystem images to a
/// scan engine without touching real hardware.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Cursor<Vec<u8>>,
    bytes_per_sector: u32,
}

impl MemoryDevice {
    pub fn new(data: Vec<u8>, bytes_per_sector: u32) -> Self {
        Self {
            data: Cursor::new(data),
            bytes_per_sector,
        }
    }

    pub fn zeroed(sectors: usize, bytes_per_sector: u32) -> Self {
        Self::new(vec![0u8; sectors * bytes_per_sector as usize], bytes_per_sector)
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.get_mut()
    }
}

impl Read for MemoryDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for MemoryDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

impl RawDevice for MemoryDevice {
    fn query_geometry(&mut self) -> Result<Geometry> {
        Geometry::from_capacity(self.data.get_ref().len() as u64, self.bytes_per_sector)
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.data.get_ref().len())
    }
}
