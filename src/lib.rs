//! Read-only sector access to physical disks and a catalog of the partitions
//! found on them.

pub mod catalog;
pub mod dal;
pub mod discovery;
pub mod error;
pub mod scan;
pub mod status;

pub use catalog::{
    CatalogSummary, DiskEntry, NodeId, NodeKind, PartitionCatalog, PartitionEntry,
    PartitionFlags, PartitionScheme, PartitionType,
};
pub use dal::{AccessFlags, DeviceAddress, DiskHandle, Geometry, MAX_DISK_INDEX, RawDevice, Window};
pub use discovery::{DeviceSource, DiscoveryOptions, PartitionDiscoveryService, PhysicalDrives};
pub use error::{DiskError, Result};
pub use scan::{FileSystemScanEngine, ScanStatus};
pub use status::Status;
