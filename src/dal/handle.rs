use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::device::{AccessFlags, RawDevice};
use super::file_device::DeviceFile;
use super::geometry::{Geometry, Window};
use super::naming;
use super::MAX_DISK_INDEX;
use crate::error::{DiskError, Result};

/// What `open_window` should open underneath the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    Index(u32),
    Path(PathBuf),
}

/// Exclusively owned, sector-addressed view of a device.
///
/// All positions are in sectors relative to the window start. The handle
/// never reads past a bounded window and refuses geometry-dependent work when
/// the host could not report the sector size.
pub struct DiskHandle<D: RawDevice = DeviceFile> {
    device: Option<D>,
    geometry: Option<Geometry>,
    window: Window,
    disk_index: Option<u32>,
}

impl DiskHandle<DeviceFile> {
    /// Opens physical drive `disk_index` using the host's raw-device naming.
    pub fn open_by_index(disk_index: u32, flags: AccessFlags) -> Result<Self> {
        if disk_index > MAX_DISK_INDEX {
            debug!(disk_index, max = MAX_DISK_INDEX, "Disk index out of supported range");
            return Err(DiskError::ParameterInvalid(format!(
                "disk index {} exceeds supported maximum {}",
                disk_index, MAX_DISK_INDEX
            )));
        }

        let path =
            naming::raw_device_path(disk_index).map_err(|source| DiskError::DeviceUnavailable {
                path: format!("disk {}", disk_index),
                source,
            })?;

        Ok(Self::open_by_path(&path, flags)?.with_disk_index(disk_index))
    }

    pub fn open_by_path(path: impl AsRef<Path>, flags: AccessFlags) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(DiskError::ParameterInvalid("empty device path".to_string()));
        }

        let device = DeviceFile::open(path, flags).map_err(|source| {
            DiskError::DeviceUnavailable {
                path: path.display().to_string(),
                source,
            }
        })?;

        debug!(
            path = %path.display(),
            unbuffered = device.is_unbuffered(),
            "Opened device"
        );

        Ok(Self::from_device(device))
    }

    /// Opens `base` and restricts the handle to `window`.
    pub fn open_window(base: DeviceAddress, window: Window, flags: AccessFlags) -> Result<Self> {
        let handle = match base {
            DeviceAddress::Index(index) => Self::open_by_index(index, flags)?,
            DeviceAddress::Path(path) => Self::open_by_path(path, flags)?,
        };
        handle.into_window(window)
    }
}

impl<D: RawDevice> DiskHandle<D> {
    /// Wraps an already-open device, unwindowed.
    ///
    /// A failed geometry query is not fatal: the handle stays usable for
    /// operations that do not need the sector size.
    pub fn from_device(mut device: D) -> Self {
        let geometry = match device.query_geometry() {
            Ok(geometry) if geometry.bytes_per_sector != 0 => Some(geometry),
            Ok(_) => {
                warn!(device = %device.describe(), "Device reported a zero sector size");
                None
            }
            Err(e) => {
                warn!(device = %device.describe(), error = %e, "Device geometry query failed");
                None
            }
        };

        Self {
            device: Some(device),
            geometry,
            window: Window::UNBOUNDED,
            disk_index: None,
        }
    }

    pub fn with_disk_index(mut self, disk_index: u32) -> Self {
        self.disk_index = Some(disk_index);
        self
    }

    /// Restricts the handle to `window` and moves to its first sector.
    ///
    /// The device must land exactly on the window start; otherwise the handle
    /// is closed and `WindowMisaligned` returned.
    pub fn into_window(mut self, window: Window) -> Result<Self> {
        self.window = window;

        let bytes_per_sector = self.sector_size()? as u64;
        let expected = window
            .start_sector
            .checked_mul(bytes_per_sector)
            .ok_or_else(|| overflow("window start"))?;

        let landed = self.reposition(0, bytes_per_sector)?;
        if landed != expected {
            warn!(expected, actual = landed, "Window start not reachable, closing handle");
            self.close();
            return Err(DiskError::WindowMisaligned {
                expected,
                actual: landed,
            });
        }

        Ok(self)
    }

    /// Moves to `relative_sector` and returns the position the device reports.
    pub fn seek(&mut self, relative_sector: u64) -> Result<u64> {
        let bytes_per_sector = self.sector_size()? as u64;

        if self.window.is_bounded() && relative_sector > self.window.sector_count {
            return Err(DiskError::BoundaryViolation {
                position: relative_sector,
                requested: 0,
                window: self.window,
            });
        }

        let landed = self.reposition(relative_sector, bytes_per_sector)?;
        self.relative_sector(landed, bytes_per_sector)
    }

    /// Current position in sectors relative to the window start.
    pub fn tell(&mut self) -> Result<u64> {
        let bytes_per_sector = self.sector_size()? as u64;
        let landed = self.device_mut()?.stream_position()?;
        self.relative_sector(landed, bytes_per_sector)
    }

    /// Absolute byte offset of the device cursor.
    pub fn absolute_position(&mut self) -> Result<u64> {
        Ok(self.device_mut()?.stream_position()?)
    }

    /// Reads `sectors` whole sectors at the current position into `buf`.
    ///
    /// Returns the number of whole sectors read, which is smaller than
    /// requested only at the end of the device. A request that would cross a
    /// bounded window fails before any I/O.
    pub fn read(&mut self, sectors: u32, buf: &mut [u8]) -> Result<u32> {
        let bytes_per_sector = self.sector_size()? as u64;
        let position = self.tell()?;

        if !self.window.admits(position, sectors as u64) {
            debug!(
                position,
                requested = sectors,
                window = self.window.sector_count,
                "Invalid boundary read detected"
            );
            return Err(DiskError::BoundaryViolation {
                position,
                requested: sectors as u64,
                window: self.window,
            });
        }

        let len = byte_len(sectors, bytes_per_sector)?;
        if buf.len() < len {
            return Err(DiskError::ParameterInvalid(format!(
                "buffer of {} bytes cannot hold {} sectors of {} bytes",
                buf.len(),
                sectors,
                bytes_per_sector
            )));
        }

        let filled = read_full(self.device_mut()?, &mut buf[..len])?;
        let whole = filled as u64 / bytes_per_sector;

        if filled as u64 % bytes_per_sector != 0 {
            // keep the cursor on a sector boundary after a torn tail
            self.reposition(position + whole, bytes_per_sector)?;
        }

        Ok(whole as u32)
    }

    /// Seeks to `relative_sector`, checks the device landed there, then reads.
    pub fn read_at(&mut self, relative_sector: u64, sectors: u32, buf: &mut [u8]) -> Result<u32> {
        let landed = self.seek(relative_sector)?;
        if landed != relative_sector {
            let bytes_per_sector = self.sector_size()? as u64;
            return Err(DiskError::WindowMisaligned {
                expected: relative_sector.saturating_mul(bytes_per_sector),
                actual: landed.saturating_mul(bytes_per_sector),
            });
        }
        self.read(sectors, buf)
    }

    /// Convenience wrapper around [`read_at`](Self::read_at) that allocates.
    pub fn read_sectors(&mut self, relative_sector: u64, sectors: u32) -> Result<Vec<u8>> {
        let len = byte_len(sectors, self.sector_size()? as u64)?;
        let mut buf = vec![0u8; len];
        let read = self.read_at(relative_sector, sectors, &mut buf)?;
        buf.truncate(read as usize * self.sector_size()? as usize);
        Ok(buf)
    }

    /// Writes whole sectors through the device's write capability, if any.
    ///
    /// A device without the capability refuses with `NotSupported` before
    /// geometry or window checks run.
    pub fn write(&mut self, sectors: u32, buf: &[u8]) -> Result<u32> {
        if !self.device_mut()?.supports_write() {
            return Err(DiskError::NotSupported("write"));
        }

        let bytes_per_sector = self.sector_size()? as u64;
        let position = self.tell()?;

        if !self.window.admits(position, sectors as u64) {
            return Err(DiskError::BoundaryViolation {
                position,
                requested: sectors as u64,
                window: self.window,
            });
        }

        let len = byte_len(sectors, bytes_per_sector)?;
        if buf.len() < len {
            return Err(DiskError::ParameterInvalid(format!(
                "buffer of {} bytes holds fewer than {} sectors",
                buf.len(),
                sectors
            )));
        }

        let written = self.device_mut()?.write(&buf[..len])?;
        Ok((written as u64 / bytes_per_sector) as u32)
    }

    pub fn lock(&mut self) -> Result<()> {
        self.device_mut()?.lock()
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.device_mut()?.unlock()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.device_mut()?.flush()
    }

    pub fn is_locked(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_locked())
    }

    /// Releases the device. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(device) = self.device.take() {
            debug!(device = %device.describe(), "Closed device");
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn geometry(&self) -> Result<Geometry> {
        self.geometry.ok_or(DiskError::GeometryQueryFailed)
    }

    #[inline]
    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn sector_size(&self) -> Result<u32> {
        match self.geometry {
            Some(g) if g.bytes_per_sector != 0 => Ok(g.bytes_per_sector),
            _ => Err(DiskError::GeometryQueryFailed),
        }
    }

    /// Device sector count from geometry; fails rather than truncate to 32 bits.
    pub fn total_sectors(&self) -> Result<u32> {
        if !self.is_open() {
            return Err(DiskError::Closed);
        }
        self.geometry()?.total_sectors()
    }

    #[inline]
    pub fn disk_index(&self) -> Option<u32> {
        self.disk_index
    }

    #[inline]
    pub fn window(&self) -> Window {
        self.window
    }

    #[inline]
    pub fn start_sector(&self) -> u64 {
        self.window.start_sector
    }

    pub fn describe(&self) -> String {
        match &self.device {
            Some(device) => device.describe(),
            None => "<closed>".to_string(),
        }
    }

    fn device_mut(&mut self) -> Result<&mut D> {
        self.device.as_mut().ok_or(DiskError::Closed)
    }

    /// Seeks the device to the byte offset of `relative_sector`, returning
    /// the byte offset it actually landed on.
    fn reposition(&mut self, relative_sector: u64, bytes_per_sector: u64) -> Result<u64> {
        let target = relative_sector
            .checked_add(self.window.start_sector)
            .and_then(|absolute| absolute.checked_mul(bytes_per_sector))
            .ok_or_else(|| overflow("seek target"))?;

        Ok(self.device_mut()?.seek(SeekFrom::Start(target))?)
    }

    fn relative_sector(&self, landed: u64, bytes_per_sector: u64) -> Result<u64> {
        let start = self.window.start_sector;
        (landed / bytes_per_sector)
            .checked_sub(start)
            .ok_or(DiskError::WindowMisaligned {
                expected: start.saturating_mul(bytes_per_sector),
                actual: landed,
            })
    }
}

fn byte_len(sectors: u32, bytes_per_sector: u64) -> Result<usize> {
    (sectors as u64)
        .checked_mul(bytes_per_sector)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| overflow("read length"))
}

fn overflow(what: &str) -> DiskError {
    DiskError::ParameterInvalid(format!("{} overflows 64-bit byte addressing", what))
}

/// Reads until `buf` is full or the device reports end of data.
fn read_full<R: io::Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dal::MemoryDevice;
    use std::io::{Read, Seek};

    fn patterned(sectors: usize) -> MemoryDevice {
        let data: Vec<u8> = (0..sectors * 512).map(|i| (i / 512) as u8).collect();
        MemoryDevice::new(data, 512)
    }

    /// Seeks land one sector past where they were asked to go.
    struct DriftingDevice(MemoryDevice);

    impl Read for DriftingDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for DriftingDevice {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            match pos {
                SeekFrom::Start(n) => self.0.seek(SeekFrom::Start(n + 512)),
                other => self.0.seek(other),
            }
        }
    }

    impl RawDevice for DriftingDevice {
        fn query_geometry(&mut self) -> Result<Geometry> {
            self.0.query_geometry()
        }

        fn describe(&self) -> String {
            "drifting".to_string()
        }
    }

    struct NoGeometry(MemoryDevice);

    impl Read for NoGeometry {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for NoGeometry {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    impl RawDevice for NoGeometry {
        fn query_geometry(&mut self) -> Result<Geometry> {
            Err(DiskError::GeometryQueryFailed)
        }

        fn describe(&self) -> String {
            "no-geometry".to_string()
        }
    }

    #[test]
    fn test_window_translates_positions() {
        let mut handle = DiskHandle::from_device(patterned(32))
            .into_window(Window::new(4, 8))
            .unwrap();

        assert_eq!(handle.tell().unwrap(), 0);
        assert_eq!(handle.absolute_position().unwrap(), 4 * 512);

        let mut buf = vec![0u8; 512];
        assert_eq!(handle.read(1, &mut buf).unwrap(), 1);
        assert!(buf.iter().all(|&b| b == 4));
        assert_eq!(handle.tell().unwrap(), 1);

        assert_eq!(handle.seek(7).unwrap(), 7);
        handle.read(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 11));
    }

    #[test]
    fn test_boundary_read_rejected_without_io() {
        let mut handle = DiskHandle::from_device(patterned(32))
            .into_window(Window::new(4, 8))
            .unwrap();
        handle.seek(6).unwrap();

        let mut buf = vec![0u8; 3 * 512];
        match handle.read(3, &mut buf) {
            Err(DiskError::BoundaryViolation {
                position,
                requested,
                ..
            }) => {
                assert_eq!(position, 6);
                assert_eq!(requested, 3);
            }
            other => panic!("expected boundary violation, got {:?}", other.map(|_| ())),
        }
        assert_eq!(handle.tell().unwrap(), 6);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_seek_past_window_end_rejected() {
        let mut handle = DiskHandle::from_device(patterned(32))
            .into_window(Window::new(4, 8))
            .unwrap();
        assert_eq!(handle.seek(8).unwrap(), 8);
        assert!(matches!(
            handle.seek(9),
            Err(DiskError::BoundaryViolation { .. })
        ));
    }

    #[test]
    fn test_short_read_at_device_end() {
        let mut handle = DiskHandle::from_device(patterned(10));
        handle.seek(8).unwrap();
        let mut buf = vec![0u8; 4 * 512];
        assert_eq!(handle.read(4, &mut buf).unwrap(), 2);
        assert_eq!(handle.tell().unwrap(), 10);
    }

    #[test]
    fn test_torn_tail_keeps_sector_alignment() {
        let mut data: Vec<u8> = vec![1u8; 3 * 512];
        data.extend_from_slice(&[2u8; 100]);
        let mut handle = DiskHandle::from_device(MemoryDevice::new(data, 512));

        let mut buf = vec![0u8; 4 * 512];
        assert_eq!(handle.read(4, &mut buf).unwrap(), 3);
        assert_eq!(handle.tell().unwrap(), 3);
        assert_eq!(handle.absolute_position().unwrap(), 3 * 512);
    }

    #[test]
    fn test_misaligned_window_closes_handle() {
        let device = DriftingDevice(patterned(32));
        match DiskHandle::from_device(device).into_window(Window::new(4, 8)) {
            Err(DiskError::WindowMisaligned { expected, actual }) => {
                assert_eq!(expected, 4 * 512);
                assert_eq!(actual, 5 * 512);
            }
            Err(e) => panic!("unexpected error {:?}", e),
            Ok(_) => panic!("misaligned window must not be returned"),
        }
    }

    #[test]
    fn test_read_at_detects_drift() {
        let mut handle = DiskHandle::from_device(DriftingDevice(patterned(32)));
        let mut buf = vec![0u8; 512];
        assert!(matches!(
            handle.read_at(2, 1, &mut buf),
            Err(DiskError::WindowMisaligned { .. })
        ));
    }

    #[test]
    fn test_unresolved_geometry_fails_cleanly() {
        let mut handle = DiskHandle::from_device(NoGeometry(patterned(4)));
        assert!(handle.is_open());
        assert!(!handle.has_geometry());
        assert!(matches!(handle.seek(0), Err(DiskError::GeometryQueryFailed)));
        assert!(matches!(handle.tell(), Err(DiskError::GeometryQueryFailed)));
        assert!(matches!(
            handle.read(1, &mut [0u8; 512]),
            Err(DiskError::GeometryQueryFailed)
        ));
        assert!(matches!(
            handle.total_sectors(),
            Err(DiskError::GeometryQueryFailed)
        ));
        // byte position does not need the sector size
        assert_eq!(handle.absolute_position().unwrap(), 0);
    }

    #[test]
    fn test_write_capabilities_not_supported() {
        let mut handle = DiskHandle::from_device(patterned(4));
        assert!(matches!(
            handle.write(1, &[0u8; 512]),
            Err(DiskError::NotSupported("write"))
        ));
        assert!(matches!(handle.lock(), Err(DiskError::NotSupported("lock"))));
        assert!(matches!(handle.unlock(), Err(DiskError::NotSupported("unlock"))));
        assert!(matches!(handle.flush(), Err(DiskError::NotSupported("flush"))));
        assert!(!handle.is_locked());
    }

    #[test]
    fn test_write_refused_without_geometry() {
        let mut handle = DiskHandle::from_device(NoGeometry(patterned(4)));
        assert!(!handle.has_geometry());
        assert!(matches!(
            handle.write(1, &[0u8; 512]),
            Err(DiskError::NotSupported("write"))
        ));
    }

    #[test]
    fn test_write_refused_at_window_end() {
        let mut handle = DiskHandle::from_device(patterned(8))
            .into_window(Window::new(2, 4))
            .unwrap();
        handle.seek(4).unwrap();
        assert!(matches!(
            handle.write(1, &[0u8; 512]),
            Err(DiskError::NotSupported("write"))
        ));
        assert!(matches!(
            handle.write(1, &[]),
            Err(DiskError::NotSupported("write"))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut handle = DiskHandle::from_device(patterned(4));
        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert!(matches!(handle.tell(), Err(DiskError::Closed)));
        assert!(matches!(handle.total_sectors(), Err(DiskError::Closed)));
        assert_eq!(handle.describe(), "<closed>");
    }

    #[test]
    fn test_small_buffer_rejected() {
        let mut handle = DiskHandle::from_device(patterned(4));
        let mut buf = vec![0u8; 511];
        assert!(matches!(
            handle.read(1, &mut buf),
            Err(DiskError::ParameterInvalid(_))
        ));
    }

    #[test]
    fn test_seek_overflow_rejected() {
        let mut handle = DiskHandle::from_device(patterned(4));
        assert!(matches!(
            handle.seek(u64::MAX / 2),
            Err(DiskError::ParameterInvalid(_))
        ));
    }

    #[test]
    fn test_read_sectors_truncates_to_whole_sectors() {
        let mut handle = DiskHandle::from_device(patterned(6));
        let data = handle.read_sectors(4, 4).unwrap();
        assert_eq!(data.len(), 2 * 512);
        assert_eq!(data[0], 4);
        assert_eq!(data[512], 5);
    }
}
