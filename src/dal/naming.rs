//! Host raw-device addressing.
//!
//! Maps a disk index onto the path the host uses for the whole physical
//! drive, and reads whatever identification the host exposes for it.

use serde::Serialize;
use std::io;
use std::path::PathBuf;

/// Identification strings for a physical drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriveInfo {
    pub model: Option<String>,
    pub vendor: Option<String>,
}

#[cfg(target_os = "windows")]
pub fn raw_device_path(index: u32) -> io::Result<PathBuf> {
    Ok(PathBuf::from(format!("\\\\.\\PhysicalDrive{}", index)))
}

#[cfg(target_os = "windows")]
pub fn drive_info(_index: u32) -> Option<DriveInfo> {
    None
}

#[cfg(target_os = "macos")]
pub fn raw_device_path(index: u32) -> io::Result<PathBuf> {
    Ok(PathBuf::from(format!("/dev/rdisk{}", index)))
}

#[cfg(target_os = "macos")]
pub fn drive_info(_index: u32) -> Option<DriveInfo> {
    None
}

#[cfg(target_os = "linux")]
pub fn raw_device_path(index: u32) -> io::Result<PathBuf> {
    let disks = linux::whole_disks()?;
    disks
        .get(index as usize)
        .map(|name| PathBuf::from(format!("/dev/{}", name)))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no physical drive at index {} ({} present)", index, disks.len()),
            )
        })
}

#[cfg(target_os = "linux")]
pub fn drive_info(index: u32) -> Option<DriveInfo> {
    let disks = linux::whole_disks().ok()?;
    let name = disks.get(index as usize)?;
    Some(linux::read_drive_info(name))
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
pub fn raw_device_path(index: u32) -> io::Result<PathBuf> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("raw drive {} addressing not supported on this platform", index),
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
pub fn drive_info(_index: u32) -> Option<DriveInfo> {
    None
}

#[cfg(target_os = "linux")]
mod linux {
    use super::DriveInfo;
    use std::fs;
    use std::io;
    use std::path::Path;

    const SYS_BLOCK: &str = "/sys/block";

    /// Whole-disk names under `/sys/block`, sorted so indices are stable.
    pub(super) fn whole_disks() -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(SYS_BLOCK)?
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| !super::is_virtual_device(name))
            .collect();
        names.sort();
        Ok(names)
    }

    pub(super) fn read_drive_info(name: &str) -> DriveInfo {
        let device_dir = Path::new(SYS_BLOCK).join(name).join("device");
        DriveInfo {
            model: read_trimmed(&device_dir.join("model")),
            vendor: read_trimmed(&device_dir.join("vendor")),
        }
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        let value = fs::read_to_string(path).ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

/// Kernel pseudo-devices that never back a physical drive.
pub fn is_virtual_device(name: &str) -> bool {
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("zram")
        || name.starts_with("nbd")
        || name.starts_with("sr")
}
