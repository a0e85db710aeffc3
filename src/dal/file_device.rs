//! Native device backed by an OS file handle.
//!
//! Works on whole physical drives (`/dev/sda`, `\\.\PhysicalDrive0`) and on
//! raw image files alike.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::aligned_buffer::{AlignedBuffer, IO_ALIGNMENT, is_io_aligned};
use super::device::{AccessFlags, RawDevice};
use super::geometry::Geometry;
use crate::error::{DiskError, Result};

/// Logical sector size assumed for image files.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

pub struct DeviceFile {
    file: File,
    path: PathBuf,
    unbuffered: bool,
}

impl DeviceFile {
    /// Opens `path` read-only (or read-write when requested), sharing it with
    /// other readers and writers, hinting sequential access.
    ///
    /// Unbuffered access is attempted first on devices and silently dropped
    /// when the host refuses it. Image files are always read through the
    /// page cache.
    pub fn open(path: impl AsRef<Path>, flags: AccessFlags) -> io::Result<Self> {
        let path = path.as_ref();
        let (file, unbuffered) = open_native(path, flags)?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};

            let _ = fadvise(&file, 0, None, Advice::Sequential);
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            unbuffered,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn is_unbuffered(&self) -> bool {
        self.unbuffered
    }
}

#[cfg(target_os = "linux")]
fn open_native(path: &Path, flags: AccessFlags) -> io::Result<(File, bool)> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.read(true).write(flags.write);

    if flags.unbuffered && !is_image_file(path) {
        let mut direct = options.clone();
        direct.custom_flags(libc::O_DIRECT);
        if let Ok(file) = direct.open(path) {
            return Ok((file, true));
        }
    }

    Ok((options.open(path)?, false))
}

#[cfg(target_os = "windows")]
fn open_native(path: &Path, flags: AccessFlags) -> io::Result<(File, bool)> {
    use std::os::windows::fs::OpenOptionsExt;
    use windows_sys::Win32::Storage::FileSystem::{
        FILE_FLAG_NO_BUFFERING, FILE_FLAG_SEQUENTIAL_SCAN, FILE_SHARE_READ, FILE_SHARE_WRITE,
    };

    let mut options = OpenOptions::new();
    options
        .read(true)
        .write(flags.write)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE);

    if flags.unbuffered && !is_image_file(path) {
        let mut direct = options.clone();
        direct.custom_flags(FILE_FLAG_SEQUENTIAL_SCAN | FILE_FLAG_NO_BUFFERING);
        if let Ok(file) = direct.open(path) {
            return Ok((file, true));
        }
    }

    options.custom_flags(FILE_FLAG_SEQUENTIAL_SCAN);
    Ok((options.open(path)?, false))
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn open_native(path: &Path, flags: AccessFlags) -> io::Result<(File, bool)> {
    let file = OpenOptions::new()
        .read(true)
        .write(flags.write)
        .open(path)?;
    Ok((file, false))
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
fn is_image_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file())
}

impl Read for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.unbuffered || buf.is_empty() || is_io_aligned(buf, IO_ALIGNMENT) {
            return self.file.read(buf);
        }

        let mut bounce = AlignedBuffer::with_default_alignment(buf.len())?;
        let n = self.file.read(&mut bounce)?;
        buf[..n].copy_from_slice(&bounce[..n]);
        Ok(n)
    }
}

impl Seek for DeviceFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl RawDevice for DeviceFile {
    fn query_geometry(&mut self) -> Result<Geometry> {
        let metadata = self.file.metadata()?;
        if metadata.is_file() {
            return Geometry::from_capacity(metadata.len(), DEFAULT_SECTOR_SIZE);
        }
        native_geometry(&mut self.file)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(target_os = "linux")]
fn native_geometry(file: &mut File) -> Result<Geometry> {
    use std::os::unix::fs::FileTypeExt;

    if !file.metadata()?.file_type().is_block_device() {
        return Err(DiskError::GeometryQueryFailed);
    }

    let bytes_per_sector = rustix::fs::ioctl_blksszget(&*file).map_err(io::Error::from)?;
    let capacity = match block_device_size(file) {
        Ok(size) => size,
        Err(_) => seek_capacity(file)?,
    };

    Geometry::from_capacity(capacity, bytes_per_sector)
}

#[cfg(target_os = "linux")]
fn block_device_size(file: &File) -> io::Result<u64> {
    use std::os::unix::io::AsRawFd;

    const BLKGETSIZE64: libc::c_ulong = 0x80081272;

    let mut size: u64 = 0;
    let result = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };

    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(size)
    }
}

#[cfg(target_os = "windows")]
fn native_geometry(file: &mut File) -> Result<Geometry> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::System::IO::DeviceIoControl;
    use windows_sys::Win32::System::Ioctl::{DISK_GEOMETRY, IOCTL_DISK_GET_DRIVE_GEOMETRY};

    let mut raw: DISK_GEOMETRY = unsafe { std::mem::zeroed() };
    let mut returned = 0u32;
    let ok = unsafe {
        DeviceIoControl(
            file.as_raw_handle() as _,
            IOCTL_DISK_GET_DRIVE_GEOMETRY,
            std::ptr::null(),
            0,
            &mut raw as *mut DISK_GEOMETRY as *mut _,
            std::mem::size_of::<DISK_GEOMETRY>() as u32,
            &mut returned,
            std::ptr::null_mut(),
        )
    };

    if ok == 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(Geometry::new(
        raw.Cylinders.max(0) as u64,
        raw.TracksPerCylinder,
        raw.SectorsPerTrack,
        raw.BytesPerSector,
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn native_geometry(file: &mut File) -> Result<Geometry> {
    let capacity = seek_capacity(file)?;
    if capacity == 0 {
        return Err(DiskError::GeometryQueryFailed);
    }
    Geometry::from_capacity(capacity, DEFAULT_SECTOR_SIZE)
}

/// Size found by seeking to the end; the previous position is restored.
#[cfg(not(target_os = "windows"))]
fn seek_capacity(file: &mut File) -> io::Result<u64> {
    let current = file.stream_position()?;
    let end = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(current))?;
    Ok(end)
}
