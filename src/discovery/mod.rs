//! Best-effort partition discovery.
//!
//! Every supported disk index is probed; a drive that is absent or refuses to
//! open is logged and skipped, never allowed to abort the rest.

pub mod gpt;
pub mod mbr;
mod table;

pub use table::{PartitionTable, TableError, read_partition_table};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{DiskEntry, PartitionCatalog, PartitionEntry, PartitionScheme};
use crate::dal::naming::{self, DriveInfo};
use crate::dal::{
    AccessFlags, DeviceAddress, DeviceFile, DiskHandle, MAX_DISK_INDEX, RawDevice, Window,
};
use crate::error::{DiskError, Result};

/// Tunables for a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Highest disk index probed; clamped to [`MAX_DISK_INDEX`].
    pub max_disk_index: u32,
    /// Probe disks on the rayon pool.
    pub parallel: bool,
    pub access: AccessFlags,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_disk_index: MAX_DISK_INDEX,
            parallel: true,
            access: AccessFlags::read_only(),
        }
    }
}

impl DiscoveryOptions {
    pub fn with_max_disk_index(mut self, max_disk_index: u32) -> Self {
        self.max_disk_index = max_disk_index;
        self
    }

    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Probes disks one after another on the calling thread.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    #[inline]
    pub fn effective_max_index(&self) -> u32 {
        self.max_disk_index.min(MAX_DISK_INDEX)
    }
}

/// Where discovery gets its disks from.
///
/// Implementations must be shareable across the probe workers; each probe
/// opens its own handle.
pub trait DeviceSource: Sync {
    type Device: RawDevice;

    fn open(&self, disk_index: u32, flags: AccessFlags) -> Result<DiskHandle<Self::Device>>;

    fn open_window(
        &self,
        disk_index: u32,
        window: Window,
        flags: AccessFlags,
    ) -> Result<DiskHandle<Self::Device>> {
        self.open(disk_index, flags)?.into_window(window)
    }

    fn describe(&self, _disk_index: u32) -> Option<DriveInfo> {
        None
    }
}

/// The host's physical drives.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhysicalDrives;

impl DeviceSource for PhysicalDrives {
    type Device = DeviceFile;

    fn open(&self, disk_index: u32, flags: AccessFlags) -> Result<DiskHandle<DeviceFile>> {
        DiskHandle::open_by_index(disk_index, flags)
    }

    fn open_window(
        &self,
        disk_index: u32,
        window: Window,
        flags: AccessFlags,
    ) -> Result<DiskHandle<DeviceFile>> {
        DiskHandle::open_window(DeviceAddress::Index(disk_index), window, flags)
    }

    fn describe(&self, disk_index: u32) -> Option<DriveInfo> {
        naming::drive_info(disk_index)
    }
}

/// Per-disk progress, traced at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeStage {
    Opened,
    GeometryKnown,
    GeometryUnknown,
    TableRead,
    Classified,
    Closed,
}

/// What a successful probe contributes to the catalog.
#[derive(Debug, Clone)]
struct DiskProbe {
    disk: DiskEntry,
    partitions: Vec<PartitionEntry>,
}

pub struct PartitionDiscoveryService<S: DeviceSource = PhysicalDrives> {
    source: S,
    options: DiscoveryOptions,
}

impl PartitionDiscoveryService<PhysicalDrives> {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self::with_source(PhysicalDrives, options)
    }
}

impl Default for PartitionDiscoveryService<PhysicalDrives> {
    fn default() -> Self {
        Self::new(DiscoveryOptions::default())
    }
}

impl<S: DeviceSource> PartitionDiscoveryService<S> {
    pub fn with_source(source: S, options: DiscoveryOptions) -> Self {
        Self { source, options }
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[inline]
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Builds a fresh catalog from every disk that could be opened.
    ///
    /// Never fails; an empty catalog means no disk was accessible. Disks
    /// appear in ascending index order whether or not probing ran in
    /// parallel.
    pub fn discover(&self) -> PartitionCatalog {
        let max_index = self.options.effective_max_index();
        info!(
            max_disk_index = max_index,
            parallel = self.options.parallel,
            "Starting partition discovery"
        );

        let probes: Vec<Option<DiskProbe>> = if self.options.parallel {
            (0..=max_index)
                .into_par_iter()
                .map(|disk_index| self.probe(disk_index))
                .collect()
        } else {
            (0..=max_index)
                .map(|disk_index| self.probe(disk_index))
                .collect()
        };

        let mut catalog = PartitionCatalog::new();
        for probe in probes.into_iter().flatten() {
            let disk_index = probe.disk.disk_index;
            let disk = catalog.append_disk_with(probe.disk);
            for entry in probe.partitions {
                if let Err(e) = catalog.append_partition(disk, entry) {
                    warn!(disk_index, error = %e, "Failed to record partition");
                }
            }
        }

        info!(
            disks = catalog.disk_count(),
            nodes = catalog.len(),
            "Partition discovery complete"
        );
        catalog
    }

    fn probe(&self, disk_index: u32) -> Option<DiskProbe> {
        let mut handle = match self.source.open(disk_index, self.options.access) {
            Ok(handle) => handle,
            Err(e @ DiskError::DeviceUnavailable { .. }) => {
                debug!(disk_index, error = %e, "Disk not available, skipping");
                return None;
            }
            Err(e) => {
                warn!(disk_index, error = %e, "Failed to open disk, skipping");
                return None;
            }
        };
        trace_stage(disk_index, ProbeStage::Opened);

        let geometry = handle.geometry().ok();
        trace_stage(
            disk_index,
            if geometry.is_some() {
                ProbeStage::GeometryKnown
            } else {
                ProbeStage::GeometryUnknown
            },
        );

        let mut disk = DiskEntry {
            disk_index,
            path: Some(handle.describe()),
            geometry,
            drive: self.source.describe(disk_index),
            scheme: PartitionScheme::None,
        };

        let partitions = match read_partition_table(&mut handle) {
            Ok(table) => {
                trace_stage(disk_index, ProbeStage::TableRead);
                disk.scheme = table.scheme;
                trace_stage(disk_index, ProbeStage::Classified);
                table.entries
            }
            Err(e) => {
                warn!(disk_index, error = %e, "Partition table unreadable");
                disk.scheme = PartitionScheme::Unreadable;
                Vec::new()
            }
        };

        handle.close();
        trace_stage(disk_index, ProbeStage::Closed);

        debug!(
            disk_index,
            scheme = ?disk.scheme,
            partitions = partitions.len(),
            "Disk probed"
        );
        Some(DiskProbe { disk, partitions })
    }
}

#[inline]
fn trace_stage(disk_index: u32, stage: ProbeStage) {
    debug!(disk_index, stage = ?stage, "Probe stage");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_clamped_to_supported_range() {
        let options = DiscoveryOptions::default().with_max_disk_index(1000);
        assert_eq!(options.effective_max_index(), MAX_DISK_INDEX);

        let options = DiscoveryOptions::default().with_max_disk_index(3);
        assert_eq!(options.effective_max_index(), 3);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: DiscoveryOptions =
            serde_json::from_str(r#"{ "max_disk_index": 4, "access": { "unbuffered": false } }"#)
                .unwrap();
        assert_eq!(options.max_disk_index, 4);
        assert!(options.parallel);
        assert!(!options.access.unbuffered);
        assert!(!options.access.write);
    }
}
